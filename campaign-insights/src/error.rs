use common_redis::CustomRedisError;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("missing campaign id")]
    MissingCampaignId,
    #[error("missing platform")]
    MissingPlatform,
    #[error("missing event time")]
    MissingEventTime,
    #[error("missing deduplication key")]
    MissingDeduplicationKey,
}

impl ValidationError {
    pub fn reason(&self) -> &'static str {
        match self {
            ValidationError::MissingCampaignId => "missing_campaign_id",
            ValidationError::MissingPlatform => "missing_platform",
            ValidationError::MissingEventTime => "missing_event_time",
            ValidationError::MissingDeduplicationKey => "missing_deduplication_key",
        }
    }
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("rocksdb error: {0}")]
    RocksDb(#[from] rocksdb::Error),
    #[error("column family not found: {0}")]
    MissingColumnFamily(&'static str),
    #[error("failed to encode value: {0}")]
    Encode(#[source] bincode::Error),
    #[error("corrupt value: {0}")]
    CorruptValue(String),
    #[error("corrupt key: {0}")]
    CorruptKey(String),
}

impl StoreError {
    /// Data errors come from bytes already on disk and will not go away on retry.
    pub fn is_data_error(&self) -> bool {
        matches!(
            self,
            StoreError::Encode(_) | StoreError::CorruptValue(_) | StoreError::CorruptKey(_)
        )
    }
}

#[derive(Error, Debug)]
pub enum DedupError {
    #[error("redis error: {0}")]
    Redis(#[from] CustomRedisError),
}

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("redis error: {0}")]
    Redis(#[from] CustomRedisError),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[derive(Error, Debug)]
pub enum SourceError {
    #[error("kafka error: {0}")]
    Kafka(#[from] rdkafka::error::KafkaError),
    #[error("dead letter produce failed: {0}")]
    DeadLetter(String),
}

#[derive(Error, Debug)]
pub enum ProcessError {
    #[error("received empty payload")]
    EmptyPayload,
    #[error("failed to decode event: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("invalid event: {0}")]
    Validation(#[from] ValidationError),
    #[error("failed to append event: {0}")]
    Store(#[from] StoreError),
    #[error("failed to refresh aggregate: {0}")]
    Aggregation(#[source] StoreError),
}

impl ProcessError {
    /// Malformed messages will never succeed; infrastructure failures might.
    pub fn is_retryable(&self) -> bool {
        match self {
            ProcessError::EmptyPayload
            | ProcessError::Decode(_)
            | ProcessError::Validation(_) => false,
            ProcessError::Store(e) | ProcessError::Aggregation(e) => !e.is_data_error(),
        }
    }

    pub fn reason(&self) -> &'static str {
        match self {
            ProcessError::EmptyPayload => "empty_payload",
            ProcessError::Decode(_) => "decode_error",
            ProcessError::Validation(e) => e.reason(),
            ProcessError::Store(_) => "store_error",
            ProcessError::Aggregation(_) => "aggregation_error",
        }
    }
}

#[derive(Error, Debug)]
pub enum InsightsError {
    #[error("start date {start} is after end date {end}")]
    InvalidRange {
        start: chrono::NaiveDate,
        end: chrono::NaiveDate,
    },
    #[error("failed to read aggregates: {0}")]
    Store(#[from] StoreError),
}

#[derive(Error, Debug)]
pub enum PlatformError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("{platform} API returned status {status}")]
    Status {
        platform: crate::types::Platform,
        status: u16,
    },
    #[error("invalid response from {platform}: {message}")]
    InvalidResponse {
        platform: crate::types::Platform,
        message: String,
    },
    #[error("no client registered for platform {0}")]
    UnknownPlatform(crate::types::Platform),
}

#[derive(Error, Debug)]
pub enum PublishError {
    #[error("failed to serialize: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("failed to produce to kafka: {0}")]
    Kafka(#[from] rdkafka::error::KafkaError),
    #[error("failed to produce to kafka (canceled)")]
    Canceled,
}

#[derive(Error, Debug)]
pub enum FetchError {
    #[error(transparent)]
    Platform(#[from] PlatformError),
    #[error(transparent)]
    Publish(#[from] PublishError),
}
