//! Task configurations and their executers.
//!
//! A task is the side effect a timer performs on each fire. Kinds are a
//! closed tagged variant: adding one means adding a config variant and an
//! executer, not touching the run loop. Execution is infallible by
//! contract - every failure is captured into the opaque result payload so
//! the schedule loop never stalls on a failing task.

mod http;

pub use http::{HttpExecuter, HttpMethod, HttpTaskConfig};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Immutable task configuration, as carried by create records.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum TaskConfig {
    Http(HttpTaskConfig),
}

/// Validation errors raised at executer construction.
#[derive(Debug, Error)]
pub enum TaskError {
    #[error("invalid url: {0}")]
    InvalidUrl(String),
    #[error("relative url not allowed")]
    RelativeUrl,
    #[error("request body of {got} bytes exceeds limit of {limit}")]
    BodyTooLarge { got: usize, limit: usize },
    #[error("invalid header name: {0:?}")]
    InvalidHeaderName(String),
    #[error("invalid header value for {0:?}")]
    InvalidHeaderValue(String),
    #[error("failed to build request: {0}")]
    Build(String),
}

/// Size limits applied to task construction and execution. Passed in
/// explicitly so tests can vary them per case.
#[derive(Debug, Clone, Copy)]
pub struct TaskLimits {
    pub max_request_body_size: usize,
    pub max_response_body_size: usize,
}

impl Default for TaskLimits {
    fn default() -> Self {
        Self {
            max_request_body_size: 1_000_000,
            max_response_body_size: 1_000_000,
        }
    }
}

/// A validated, ready-to-run task.
#[derive(Debug)]
pub enum Executer {
    Http(HttpExecuter),
}

impl Executer {
    /// Validates the configuration and builds the executer. All
    /// construction-time checks (url shape, method, request body size,
    /// header validity) happen here, before any record is written.
    pub fn new(config: &TaskConfig, limits: &TaskLimits) -> Result<Self, TaskError> {
        match config {
            TaskConfig::Http(http) => Ok(Executer::Http(HttpExecuter::new(http, limits)?)),
        }
    }

    /// Performs the side effect once. Never fails: errors are folded into
    /// the returned payload.
    pub async fn execute(&self) -> Vec<u8> {
        match self {
            Executer::Http(http) => http.execute().await,
        }
    }
}

/// `{"Error": "..."}` payload for failures that happen before a structured
/// result exists.
pub(crate) fn error_payload(message: &str) -> Vec<u8> {
    serde_json::to_vec(&serde_json::json!({ "Error": message })).unwrap_or_default()
}
