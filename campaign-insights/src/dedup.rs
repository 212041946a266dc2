//! Fast-path duplicate detection keyed by deduplication key.
//!
//! The store is advisory: the event log's keyed merge is the real guard
//! against double counting. A key is only ever marked after a confirmed
//! append, so a "processed" answer is never wrong; a lapsed or lost mark
//! just means the event is appended (idempotently) again.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use common_redis::{Client, CustomRedisError};
use moka::sync::Cache;
use moka::Expiry;

use crate::error::DedupError;

pub const DEDUP_KEY_PREFIX: &str = "dedup:";

#[async_trait]
pub trait DeduplicationStore: Send + Sync {
    async fn is_processed(&self, key: &str) -> Result<bool, DedupError>;

    async fn mark_processed(&self, key: &str, ttl: Duration) -> Result<(), DedupError>;
}

pub fn namespaced(key: &str) -> String {
    format!("{DEDUP_KEY_PREFIX}{key}")
}

pub struct RedisDeduplicationStore {
    client: Arc<dyn Client + Send + Sync>,
}

impl RedisDeduplicationStore {
    pub fn new(client: Arc<dyn Client + Send + Sync>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl DeduplicationStore for RedisDeduplicationStore {
    async fn is_processed(&self, key: &str) -> Result<bool, DedupError> {
        match self.client.get(namespaced(key)).await {
            Ok(_) => Ok(true),
            Err(CustomRedisError::NotFound) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn mark_processed(&self, key: &str, ttl: Duration) -> Result<(), DedupError> {
        // SETEX rejects a zero expiry
        let seconds = ttl.as_secs().max(1);
        self.client
            .setex(namespaced(key), "1".to_string(), seconds)
            .await?;
        Ok(())
    }
}

/// Value wrapper carrying its own time-to-live.
#[derive(Debug, Clone)]
pub(crate) struct Expiring<T> {
    pub value: T,
    pub ttl: Duration,
}

/// Moka expiry policy that reads the TTL from each entry.
pub(crate) struct PerEntryTtl;

impl<T> Expiry<String, Expiring<T>> for PerEntryTtl {
    fn expire_after_create(
        &self,
        _key: &String,
        value: &Expiring<T>,
        _created_at: Instant,
    ) -> Option<Duration> {
        Some(value.ttl)
    }

    fn expire_after_update(
        &self,
        _key: &String,
        value: &Expiring<T>,
        _updated_at: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        Some(value.ttl)
    }
}

/// Process-local dedup store, for single-instance runs and tests.
#[derive(Clone)]
pub struct MemoryDeduplicationStore {
    cache: Cache<String, Expiring<()>>,
}

impl MemoryDeduplicationStore {
    pub fn new(max_capacity: u64) -> Self {
        let cache = Cache::builder()
            .max_capacity(max_capacity)
            .expire_after(PerEntryTtl)
            .build();
        Self { cache }
    }
}

#[async_trait]
impl DeduplicationStore for MemoryDeduplicationStore {
    async fn is_processed(&self, key: &str) -> Result<bool, DedupError> {
        Ok(self.cache.get(key).is_some())
    }

    async fn mark_processed(&self, key: &str, ttl: Duration) -> Result<(), DedupError> {
        self.cache
            .insert(key.to_string(), Expiring { value: (), ttl });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common_redis::{MockRedisClient, MockRedisValue};

    #[tokio::test]
    async fn test_redis_store_checks_namespaced_key() {
        let client =
            MockRedisClient::new().get_ret("dedup:meta:c1:2024-01-01", Ok("1".to_string()));
        let store = RedisDeduplicationStore::new(Arc::new(client.clone()));

        assert!(store.is_processed("meta:c1:2024-01-01").await.unwrap());
        assert!(!store.is_processed("meta:c1:2024-01-02").await.unwrap());

        let calls = client.get_calls();
        assert_eq!(calls[0].key, "dedup:meta:c1:2024-01-01");
    }

    #[tokio::test]
    async fn test_redis_store_marks_with_ttl() {
        let client = MockRedisClient::new();
        let store = RedisDeduplicationStore::new(Arc::new(client.clone()));

        store
            .mark_processed("k1", Duration::from_secs(604800))
            .await
            .unwrap();

        let calls = client.get_calls();
        assert_eq!(calls[0].op, "setex");
        assert_eq!(calls[0].key, "dedup:k1");
        assert!(matches!(calls[0].value, MockRedisValue::StringWithTTL(_, 604800)));
    }

    #[tokio::test]
    async fn test_redis_errors_surface_to_caller() {
        let client = MockRedisClient::new().get_ret("dedup:k1", Err(CustomRedisError::Timeout));
        let store = RedisDeduplicationStore::new(Arc::new(client));

        assert!(store.is_processed("k1").await.is_err());
    }

    #[tokio::test]
    async fn test_memory_store_marks_and_expires() {
        let store = MemoryDeduplicationStore::new(100);

        assert!(!store.is_processed("k1").await.unwrap());
        store
            .mark_processed("k1", Duration::from_secs(60))
            .await
            .unwrap();
        assert!(store.is_processed("k1").await.unwrap());

        store
            .mark_processed("k2", Duration::from_millis(20))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(!store.is_processed("k2").await.unwrap());
        assert!(store.is_processed("k1").await.unwrap());
    }
}
