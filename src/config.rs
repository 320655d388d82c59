//! Configuration loading from environment variables.
//!
//! Uses the following environment variables:
//! - `BELLTOWER_PARTITIONS`: number of log partitions (default: 32)
//! - `BELLTOWER_HTTP_MAX_REQUEST_BODY_SIZE`: request body limit in bytes (default: 1000000)
//! - `BELLTOWER_HTTP_MAX_RESPONSE_BODY_SIZE`: response body limit in bytes (default: 1000000)
//! - `BELLTOWER_STORE_RETRY_ATTEMPTS`: progress store read attempts at activation (default: 10)
//! - `BELLTOWER_STORE_RETRY_BACKOFF_MS`: delay between store read attempts (default: 500)
//!
//! The parsed [`Config`] is passed explicitly to the components that need
//! it; nothing in the engine reads ambient global state.

use std::env;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};

use crate::task::TaskLimits;

/// Engine configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Number of partitions the timer log is sharded into. Must match the
    /// producing side.
    pub partition_count: u32,

    /// Maximum HTTP request body accepted at timer creation.
    pub max_request_body_size: usize,

    /// Maximum HTTP response body captured per execution.
    pub max_response_body_size: usize,

    /// Progress store read attempts during manager activation.
    pub store_retry_attempts: u32,

    /// Delay between progress store read attempts.
    pub store_retry_backoff: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            partition_count: 32,
            max_request_body_size: 1_000_000,
            max_response_body_size: 1_000_000,
            store_retry_attempts: 10,
            store_retry_backoff: Duration::from_millis(500),
        }
    }
}

impl Config {
    /// Loads configuration from the environment, falling back to defaults
    /// for unset variables.
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();
        Ok(Self {
            partition_count: env_or("BELLTOWER_PARTITIONS", defaults.partition_count)?,
            max_request_body_size: env_or(
                "BELLTOWER_HTTP_MAX_REQUEST_BODY_SIZE",
                defaults.max_request_body_size,
            )?,
            max_response_body_size: env_or(
                "BELLTOWER_HTTP_MAX_RESPONSE_BODY_SIZE",
                defaults.max_response_body_size,
            )?,
            store_retry_attempts: env_or(
                "BELLTOWER_STORE_RETRY_ATTEMPTS",
                defaults.store_retry_attempts,
            )?,
            store_retry_backoff: Duration::from_millis(env_or(
                "BELLTOWER_STORE_RETRY_BACKOFF_MS",
                500u64,
            )?),
        })
    }

    /// The subset handed to task executer construction.
    pub fn task_limits(&self) -> TaskLimits {
        TaskLimits {
            max_request_body_size: self.max_request_body_size,
            max_response_body_size: self.max_response_body_size,
        }
    }
}

fn env_or<T>(name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(name) {
        Ok(raw) => raw
            .parse()
            .with_context(|| format!("invalid value for {name}: {raw:?}")),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_without_environment() {
        let config = Config::default();
        assert_eq!(config.partition_count, 32);
        assert_eq!(config.store_retry_attempts, 10);
        assert_eq!(config.task_limits().max_request_body_size, 1_000_000);
    }
}
