use std::{path::PathBuf, time::Duration};

use envconfig::Envconfig;
use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} must be greater than zero")]
    ZeroValue(&'static str),
    #[error("kafka consumer topic must not be empty")]
    EmptyTopic,
    #[error("backoff_max_ms ({max}) must be >= backoff_initial_ms ({initial})")]
    BackoffRange { initial: u64, max: u64 },
}

#[derive(Envconfig, Clone, Debug)]
pub struct Config {
    // Kafka configuration
    #[envconfig(default = "localhost:9092")]
    pub kafka_hosts: String,

    #[envconfig(default = "false")]
    pub kafka_tls: bool,

    #[envconfig(default = "campaign-insights")]
    pub kafka_consumer_group: String,

    #[envconfig(default = "campaign_events")]
    pub kafka_consumer_topic: String,

    #[envconfig(default = "earliest")]
    pub kafka_consumer_offset_reset: String,

    #[envconfig(default = "20000")]
    pub kafka_message_timeout_ms: u32,

    // Non-retryable messages are produced here when set, otherwise they are logged and skipped
    pub dead_letter_topic: Option<String>,

    // RocksDB storage configuration
    #[envconfig(default = "/tmp/campaign-insights-store")]
    pub store_path: String,

    // Redis backs both the dedup store and the insights cache. Unset means in-memory.
    pub redis_url: Option<String>,

    #[envconfig(default = "100")]
    pub redis_response_timeout_ms: u64,

    #[envconfig(default = "5000")]
    pub redis_connection_timeout_ms: u64,

    #[envconfig(default = "604800")] // 7 days
    pub dedup_ttl_secs: u64,

    #[envconfig(default = "300")] // 5 minutes
    pub insights_cache_ttl_secs: u64,

    #[envconfig(default = "100000")]
    pub memory_cache_capacity: u64,

    // Consumer retry configuration
    #[envconfig(default = "1000")]
    pub backoff_initial_ms: u64,

    #[envconfig(default = "30000")]
    pub backoff_max_ms: u64,

    #[envconfig(default = "30")]
    pub shutdown_timeout_secs: u64,

    // HTTP server configuration
    #[envconfig(from = "BIND_HOST", default = "0.0.0.0")]
    pub host: String,

    #[envconfig(from = "BIND_PORT", default = "8080")]
    pub port: u16,

    // Platform adapters
    #[envconfig(default = "30")]
    pub platform_api_timeout_secs: u64,

    #[envconfig(default = "https://graph.facebook.com/v16.0")]
    pub meta_api_url: String,

    pub meta_access_token: Option<String>,

    #[envconfig(default = "https://googleads.googleapis.com/v13")]
    pub google_api_url: String,

    pub google_access_token: Option<String>,

    #[envconfig(default = "https://api.linkedin.com/v2")]
    pub linkedin_api_url: String,

    pub linkedin_access_token: Option<String>,

    #[envconfig(default = "https://business-api.tiktok.com/open_api/v2")]
    pub tiktok_api_url: String,

    pub tiktok_access_token: Option<String>,
}

impl Config {
    pub fn init_with_defaults() -> Result<Self, envconfig::Error> {
        Config::init_from_env()
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.kafka_consumer_topic.trim().is_empty() {
            return Err(ConfigError::EmptyTopic);
        }
        if self.dedup_ttl_secs == 0 {
            return Err(ConfigError::ZeroValue("dedup_ttl_secs"));
        }
        if self.insights_cache_ttl_secs == 0 {
            return Err(ConfigError::ZeroValue("insights_cache_ttl_secs"));
        }
        if self.backoff_initial_ms == 0 {
            return Err(ConfigError::ZeroValue("backoff_initial_ms"));
        }
        if self.backoff_max_ms < self.backoff_initial_ms {
            return Err(ConfigError::BackoffRange {
                initial: self.backoff_initial_ms,
                max: self.backoff_max_ms,
            });
        }
        Ok(())
    }

    pub fn store_path_buf(&self) -> PathBuf {
        PathBuf::from(&self.store_path)
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn dedup_ttl(&self) -> Duration {
        Duration::from_secs(self.dedup_ttl_secs)
    }

    pub fn insights_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.insights_cache_ttl_secs)
    }

    pub fn backoff_initial(&self) -> Duration {
        Duration::from_millis(self.backoff_initial_ms)
    }

    pub fn backoff_max(&self) -> Duration {
        Duration::from_millis(self.backoff_max_ms)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }

    pub fn platform_api_timeout(&self) -> Duration {
        Duration::from_secs(self.platform_api_timeout_secs)
    }

    /// `None` disables the timeout, which the redis client requires instead of zero.
    pub fn redis_response_timeout(&self) -> Option<Duration> {
        (self.redis_response_timeout_ms > 0)
            .then(|| Duration::from_millis(self.redis_response_timeout_ms))
    }

    pub fn redis_connection_timeout(&self) -> Option<Duration> {
        (self.redis_connection_timeout_ms > 0)
            .then(|| Duration::from_millis(self.redis_connection_timeout_ms))
    }
}
