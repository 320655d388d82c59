//! Bounded HTTP request executer.
//!
//! The request is validated and built once at timer construction; each fire
//! clones and sends it, capturing status, protocol, headers and (when
//! requested) a size-capped response body into a JSON result payload.

use std::collections::HashMap;

use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use serde::{Deserialize, Serialize};

use super::{TaskError, TaskLimits, error_payload};

/// Supported request methods.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    Post,
}

/// Configuration of an HTTP task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HttpTaskConfig {
    pub url: String,
    pub method: HttpMethod,
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    #[serde(default)]
    pub save_response_body: bool,
}

/// Captured outcome of one request, serialized as the result payload.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct HttpResult {
    status_code: u16,
    proto: String,
    headers: HashMap<String, Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    body: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

#[derive(Debug)]
pub struct HttpExecuter {
    client: reqwest::Client,
    request: reqwest::Request,
    save_response_body: bool,
    max_response_body_size: usize,
}

impl HttpExecuter {
    pub fn new(config: &HttpTaskConfig, limits: &TaskLimits) -> Result<Self, TaskError> {
        let url = reqwest::Url::parse(&config.url)
            .map_err(|err| TaskError::InvalidUrl(err.to_string()))?;
        if !url.has_host() {
            return Err(TaskError::RelativeUrl);
        }

        if config.body.len() > limits.max_request_body_size {
            return Err(TaskError::BodyTooLarge {
                got: config.body.len(),
                limit: limits.max_request_body_size,
            });
        }

        // comma-separated header values become repeated header entries
        let mut headers = HeaderMap::new();
        for (name, value) in &config.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|_| TaskError::InvalidHeaderName(name.clone()))?;
            for part in value.split(',') {
                let value = HeaderValue::from_str(part.trim())
                    .map_err(|_| TaskError::InvalidHeaderValue(name.to_string()))?;
                headers.append(name.clone(), value);
            }
        }

        let method = match config.method {
            HttpMethod::Get => reqwest::Method::GET,
            HttpMethod::Post => reqwest::Method::POST,
        };

        let client = reqwest::Client::new();
        let request = client
            .request(method, url)
            .headers(headers)
            .body(config.body.clone())
            .build()
            .map_err(|err| TaskError::Build(err.to_string()))?;

        Ok(Self {
            client,
            request,
            save_response_body: config.save_response_body,
            max_response_body_size: limits.max_response_body_size,
        })
    }

    pub async fn execute(&self) -> Vec<u8> {
        // byte-bodied requests always clone
        let Some(request) = self.request.try_clone() else {
            return error_payload("request is not cloneable");
        };

        let mut response = match self.client.execute(request).await {
            Ok(response) => response,
            Err(err) => return error_payload(&err.to_string()),
        };

        let mut headers: HashMap<String, Vec<String>> = HashMap::new();
        for name in response.headers().keys() {
            let values = response
                .headers()
                .get_all(name)
                .iter()
                .map(|value| String::from_utf8_lossy(value.as_bytes()).into_owned())
                .collect();
            headers.insert(name.as_str().to_string(), values);
        }

        let mut result = HttpResult {
            status_code: response.status().as_u16(),
            proto: format!("{:?}", response.version()),
            headers,
            body: None,
            error: None,
        };

        if self.save_response_body {
            let mut body: Vec<u8> = Vec::new();
            loop {
                match response.chunk().await {
                    Ok(Some(chunk)) => {
                        if body.len() + chunk.len() > self.max_response_body_size {
                            result.error = Some("response body size exceeded limit".to_string());
                            break;
                        }
                        body.extend_from_slice(&chunk);
                    }
                    Ok(None) => {
                        result.body = Some(String::from_utf8_lossy(&body).into_owned());
                        break;
                    }
                    Err(err) => {
                        result.error = Some(err.to_string());
                        break;
                    }
                }
            }
        }

        serde_json::to_vec(&result).unwrap_or_else(|_| error_payload("result serialization failed"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_string, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config(url: String) -> HttpTaskConfig {
        HttpTaskConfig {
            url,
            method: HttpMethod::Get,
            body: String::new(),
            headers: HashMap::new(),
            save_response_body: true,
        }
    }

    fn decode(payload: &[u8]) -> serde_json::Value {
        serde_json::from_slice(payload).unwrap()
    }

    #[tokio::test]
    async fn captures_status_headers_and_body() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/hook"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("x-fire", "7")
                    .set_body_string("hello"),
            )
            .mount(&server)
            .await;

        let executer =
            HttpExecuter::new(&config(format!("{}/hook", server.uri())), &TaskLimits::default())
                .unwrap();
        let result = decode(&executer.execute().await);

        assert_eq!(result["StatusCode"], 200);
        assert_eq!(result["Body"], "hello");
        assert_eq!(result["Headers"]["x-fire"][0], "7");
        assert!(result.get("Error").is_none());
    }

    #[tokio::test]
    async fn body_is_dropped_unless_requested() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("secret"))
            .mount(&server)
            .await;

        let mut cfg = config(server.uri());
        cfg.save_response_body = false;
        let executer = HttpExecuter::new(&cfg, &TaskLimits::default()).unwrap();
        let result = decode(&executer.execute().await);

        assert_eq!(result["StatusCode"], 200);
        assert!(result.get("Body").is_none());
    }

    #[tokio::test]
    async fn oversized_response_body_is_reported_not_fatal() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("0123456789"))
            .mount(&server)
            .await;

        let limits = TaskLimits {
            max_request_body_size: 1_000_000,
            max_response_body_size: 4,
        };
        let executer = HttpExecuter::new(&config(server.uri()), &limits).unwrap();
        let result = decode(&executer.execute().await);

        assert_eq!(result["StatusCode"], 200);
        assert_eq!(result["Error"], "response body size exceeded limit");
        assert!(result.get("Body").is_none());
    }

    #[tokio::test]
    async fn network_failure_lands_in_the_payload() {
        // nothing listens on this port
        let executer = HttpExecuter::new(
            &config("http://127.0.0.1:9/hook".to_string()),
            &TaskLimits::default(),
        )
        .unwrap();
        let result = decode(&executer.execute().await);
        assert!(result["Error"].as_str().unwrap().len() > 0);
    }

    #[tokio::test]
    async fn post_sends_configured_body_and_headers() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/submit"))
            .and(header("x-tenant", "acme"))
            .and(body_string("payload"))
            .respond_with(ResponseTemplate::new(201))
            .mount(&server)
            .await;

        let cfg = HttpTaskConfig {
            url: format!("{}/submit", server.uri()),
            method: HttpMethod::Post,
            body: "payload".to_string(),
            headers: HashMap::from([("x-tenant".to_string(), "acme".to_string())]),
            save_response_body: false,
        };
        let executer = HttpExecuter::new(&cfg, &TaskLimits::default()).unwrap();
        let result = decode(&executer.execute().await);
        assert_eq!(result["StatusCode"], 201);
    }

    #[test]
    fn rejects_relative_and_malformed_urls() {
        assert!(matches!(
            HttpExecuter::new(&config("/relative/path".to_string()), &TaskLimits::default()),
            Err(TaskError::InvalidUrl(_))
        ));
        assert!(matches!(
            HttpExecuter::new(&config("not a url".to_string()), &TaskLimits::default()),
            Err(TaskError::InvalidUrl(_))
        ));
    }

    #[test]
    fn rejects_oversized_request_body() {
        let limits = TaskLimits {
            max_request_body_size: 4,
            max_response_body_size: 1_000_000,
        };
        let mut cfg = config("http://example.com/".to_string());
        cfg.body = "too large".to_string();
        assert!(matches!(
            HttpExecuter::new(&cfg, &limits),
            Err(TaskError::BodyTooLarge { got: 9, limit: 4 })
        ));
    }

    #[test]
    fn rejects_invalid_header_names() {
        let mut cfg = config("http://example.com/".to_string());
        cfg.headers
            .insert("bad header\n".to_string(), "x".to_string());
        assert!(matches!(
            HttpExecuter::new(&cfg, &TaskLimits::default()),
            Err(TaskError::InvalidHeaderName(_))
        ));
    }
}
