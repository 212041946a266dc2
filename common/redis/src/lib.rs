use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum CustomRedisError {
    #[error("Not found in redis")]
    NotFound,
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),
    #[error("Parse error: {0}")]
    ParseError(String),
    #[error("Timeout error")]
    Timeout,
    #[error(transparent)]
    Redis(#[from] Arc<redis::RedisError>),
}

impl From<redis::RedisError> for CustomRedisError {
    fn from(err: redis::RedisError) -> Self {
        if err.is_timeout() {
            CustomRedisError::Timeout
        } else {
            CustomRedisError::Redis(Arc::new(err))
        }
    }
}

impl From<std::string::FromUtf8Error> for CustomRedisError {
    fn from(err: std::string::FromUtf8Error) -> Self {
        CustomRedisError::ParseError(err.to_string())
    }
}

/// The subset of Redis operations used by the dedup store and the insights cache.
///
/// Values are plain UTF-8 strings; callers own their serialization format.
#[async_trait]
pub trait Client {
    /// Returns `CustomRedisError::NotFound` when the key does not exist.
    async fn get(&self, k: String) -> Result<String, CustomRedisError>;

    async fn setex(&self, k: String, v: String, seconds: u64) -> Result<(), CustomRedisError>;

    async fn batch_del(&self, keys: Vec<String>) -> Result<(), CustomRedisError>;

    /// All keys starting with `prefix`, collected with a cursor-based SCAN.
    async fn scan_prefix(&self, prefix: String) -> Result<Vec<String>, CustomRedisError>;
}

mod client;
mod mock;

pub use client::RedisClient;
pub use mock::{MockRedisCall, MockRedisClient, MockRedisValue};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_redis_errors_are_wrapped() {
        let err: CustomRedisError =
            redis::RedisError::from((redis::ErrorKind::IoError, "Connection refused")).into();
        assert!(matches!(
            &err,
            CustomRedisError::Redis(inner) if inner.kind() == redis::ErrorKind::IoError
        ));
    }

    #[test]
    fn test_invalid_utf8_is_a_parse_error() {
        let err: CustomRedisError = String::from_utf8(vec![0xff, 0xfe]).unwrap_err().into();
        assert!(matches!(err, CustomRedisError::ParseError(_)));
    }
}
