use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;
use std::time::Duration;
use tracing::debug;

use crate::{Client, CustomRedisError};

const SCAN_BATCH_SIZE: usize = 500;

pub struct RedisClient {
    connection: MultiplexedConnection,
}

impl RedisClient {
    /// Create a new RedisClient without response or connection timeouts.
    pub async fn new(addr: String) -> Result<RedisClient, CustomRedisError> {
        Self::with_config(addr, None, None).await
    }

    /// Create a new RedisClient with optional timeouts.
    ///
    /// `None` means no timeout. `Some(Duration::ZERO)` is rejected with
    /// `CustomRedisError::InvalidConfiguration`.
    pub async fn with_config(
        addr: String,
        response_timeout: Option<Duration>,
        connection_timeout: Option<Duration>,
    ) -> Result<RedisClient, CustomRedisError> {
        let client = redis::Client::open(addr)?;

        if response_timeout.is_some_and(|t| t.is_zero()) {
            return Err(CustomRedisError::InvalidConfiguration(
                "Redis response timeout cannot be Duration::ZERO - use None for no timeout"
                    .to_string(),
            ));
        }
        if connection_timeout.is_some_and(|t| t.is_zero()) {
            return Err(CustomRedisError::InvalidConfiguration(
                "Redis connection timeout cannot be Duration::ZERO - use None for no timeout"
                    .to_string(),
            ));
        }

        let mut config = redis::AsyncConnectionConfig::new();
        if let Some(timeout) = response_timeout {
            config = config.set_response_timeout(timeout);
        }
        if let Some(timeout) = connection_timeout {
            config = config.set_connection_timeout(timeout);
        }

        let connection = client
            .get_multiplexed_async_connection_with_config(&config)
            .await?;

        Ok(RedisClient { connection })
    }
}

/// Escape glob metacharacters so a literal prefix can be used in a MATCH pattern.
fn escape_glob(prefix: &str) -> String {
    let mut escaped = String::with_capacity(prefix.len() + 4);
    for c in prefix.chars() {
        if matches!(c, '*' | '?' | '[' | ']' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

#[async_trait]
impl Client for RedisClient {
    async fn get(&self, k: String) -> Result<String, CustomRedisError> {
        let mut conn = self.connection.clone();
        let raw: Option<Vec<u8>> = conn.get(k).await?;

        match raw {
            Some(bytes) if !bytes.is_empty() => Ok(String::from_utf8(bytes)?),
            _ => Err(CustomRedisError::NotFound),
        }
    }

    async fn setex(&self, k: String, v: String, seconds: u64) -> Result<(), CustomRedisError> {
        let mut conn = self.connection.clone();
        conn.set_ex::<_, _, ()>(k, v, seconds).await?;
        Ok(())
    }

    async fn batch_del(&self, keys: Vec<String>) -> Result<(), CustomRedisError> {
        if keys.is_empty() {
            return Ok(());
        }

        let mut conn = self.connection.clone();
        conn.del::<_, ()>(keys).await?;
        Ok(())
    }

    async fn scan_prefix(&self, prefix: String) -> Result<Vec<String>, CustomRedisError> {
        let pattern = format!("{}*", escape_glob(&prefix));
        let mut conn = self.connection.clone();
        let mut cursor: u64 = 0;
        let mut keys = Vec::new();

        loop {
            let (next, batch): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(SCAN_BATCH_SIZE)
                .query_async(&mut conn)
                .await?;

            keys.extend(batch);
            if next == 0 {
                break;
            }
            cursor = next;
        }

        debug!(pattern = %pattern, count = keys.len(), "scanned redis keys");
        Ok(keys)
    }
}
