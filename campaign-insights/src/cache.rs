use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use common_redis::{Client, CustomRedisError};
use moka::future::Cache;
use tracing::debug;
use uuid::Uuid;

use crate::dedup::{Expiring, PerEntryTtl};
use crate::error::CacheError;
use crate::types::{AggregateRow, ResolvedParams};

pub const INSIGHTS_KEY_PREFIX: &str = "insights:";

/// Read-through cache for insight queries.
///
/// Callers treat every error as a miss; nothing here is allowed to fail a query.
#[async_trait]
pub trait InsightsCache: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Vec<AggregateRow>>, CacheError>;

    async fn set(&self, key: &str, rows: &[AggregateRow], ttl: Duration) -> Result<(), CacheError>;

    /// Remove every entry whose key starts with `prefix`. Returns how many were removed.
    async fn invalidate(&self, prefix: &str) -> Result<u64, CacheError>;
}

/// Deterministic key covering every query parameter.
pub fn cache_key(params: &ResolvedParams) -> String {
    let campaign = params
        .campaign_id
        .map(|id| id.to_string())
        .unwrap_or_else(|| "all".to_string());
    let platform = params.platform.map(|p| p.as_str()).unwrap_or("*");
    let region = params.region.as_deref().unwrap_or("*");

    format!(
        "{INSIGHTS_KEY_PREFIX}{campaign}:start:{}:end:{}:platform:{platform}:region:{region}:granularity:{}:",
        params.start_date.format("%Y-%m-%d"),
        params.end_date.format("%Y-%m-%d"),
        params.granularity,
    )
}

/// Prefix shared by every cached query scoped to `campaign_id`.
pub fn campaign_prefix(campaign_id: &Uuid) -> String {
    format!("{INSIGHTS_KEY_PREFIX}{campaign_id}:")
}

pub struct RedisInsightsCache {
    client: Arc<dyn Client + Send + Sync>,
}

impl RedisInsightsCache {
    pub fn new(client: Arc<dyn Client + Send + Sync>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl InsightsCache for RedisInsightsCache {
    async fn get(&self, key: &str) -> Result<Option<Vec<AggregateRow>>, CacheError> {
        match self.client.get(key.to_string()).await {
            Ok(json) => Ok(Some(serde_json::from_str(&json)?)),
            Err(CustomRedisError::NotFound) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn set(&self, key: &str, rows: &[AggregateRow], ttl: Duration) -> Result<(), CacheError> {
        let json = serde_json::to_string(rows)?;
        self.client
            .setex(key.to_string(), json, ttl.as_secs().max(1))
            .await?;
        Ok(())
    }

    async fn invalidate(&self, prefix: &str) -> Result<u64, CacheError> {
        let keys = self.client.scan_prefix(prefix.to_string()).await?;
        let count = keys.len() as u64;
        if count > 0 {
            self.client.batch_del(keys).await?;
        }
        debug!(prefix, count, "invalidated redis insights keys");
        Ok(count)
    }
}

/// Process-local cache, for single-instance runs and tests.
#[derive(Clone)]
pub struct MemoryInsightsCache {
    cache: Cache<String, Expiring<Arc<Vec<AggregateRow>>>>,
}

impl MemoryInsightsCache {
    pub fn new(max_capacity: u64) -> Self {
        let cache = Cache::builder()
            .max_capacity(max_capacity)
            .expire_after(PerEntryTtl)
            .build();
        Self { cache }
    }
}

#[async_trait]
impl InsightsCache for MemoryInsightsCache {
    async fn get(&self, key: &str) -> Result<Option<Vec<AggregateRow>>, CacheError> {
        Ok(self
            .cache
            .get(key)
            .await
            .map(|entry| entry.value.as_ref().clone()))
    }

    async fn set(&self, key: &str, rows: &[AggregateRow], ttl: Duration) -> Result<(), CacheError> {
        self.cache
            .insert(
                key.to_string(),
                Expiring {
                    value: Arc::new(rows.to_vec()),
                    ttl,
                },
            )
            .await;
        Ok(())
    }

    async fn invalidate(&self, prefix: &str) -> Result<u64, CacheError> {
        let keys: Vec<Arc<String>> = self
            .cache
            .iter()
            .filter(|(key, _)| key.starts_with(prefix))
            .map(|(key, _)| key)
            .collect();

        for key in &keys {
            self.cache.invalidate(key.as_str()).await;
        }
        Ok(keys.len() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Granularity, Platform};
    use chrono::{NaiveDate, TimeZone, Utc};
    use common_redis::{MockRedisClient, MockRedisValue};

    fn params(campaign_id: Option<Uuid>) -> ResolvedParams {
        ResolvedParams {
            campaign_id,
            start_date: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            end_date: NaiveDate::from_ymd_opt(2024, 1, 31).unwrap(),
            platform: None,
            region: None,
            granularity: Granularity::Daily,
        }
    }

    fn row(campaign_id: Uuid) -> AggregateRow {
        AggregateRow {
            campaign_id,
            date: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            platform: Platform::Meta,
            region: "all".to_string(),
            impressions: 1500,
            clicks: 75,
            conversions: 0,
            spend: 75.0,
            revenue: 150.0,
            ctr: 0.05,
            cpc: 1.0,
            cpa: 0.0,
            roas: 2.0,
            conversion_rate: 0.0,
            updated_at: Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap(),
        }
    }

    #[test]
    fn test_cache_key_layout() {
        let id = Uuid::parse_str("6f1c6a3e-2d4b-4c8e-9a57-0a3f1b2c3d4e").unwrap();
        let mut p = params(Some(id));
        assert_eq!(
            cache_key(&p),
            "insights:6f1c6a3e-2d4b-4c8e-9a57-0a3f1b2c3d4e:start:2024-01-01:end:2024-01-31:platform:*:region:*:granularity:daily:"
        );

        p.platform = Some(Platform::Google);
        p.region = Some("eu".to_string());
        p.granularity = Granularity::Weekly;
        assert!(cache_key(&p).ends_with(":platform:google:region:eu:granularity:weekly:"));
        assert!(cache_key(&p).starts_with(&campaign_prefix(&id)));
    }

    #[test]
    fn test_cache_key_without_campaign() {
        assert!(cache_key(&params(None)).starts_with("insights:all:start:"));
    }

    #[tokio::test]
    async fn test_redis_cache_miss_and_hit() {
        let id = Uuid::new_v4();
        let rows = vec![row(id)];
        let client =
            MockRedisClient::new().get_ret("hit", Ok(serde_json::to_string(&rows).unwrap()));
        let cache = RedisInsightsCache::new(Arc::new(client));

        assert_eq!(cache.get("miss").await.unwrap(), None);
        assert_eq!(cache.get("hit").await.unwrap(), Some(rows));
    }

    #[tokio::test]
    async fn test_redis_cache_set_uses_ttl() {
        let client = MockRedisClient::new();
        let cache = RedisInsightsCache::new(Arc::new(client.clone()));

        cache
            .set("k", &[row(Uuid::new_v4())], Duration::from_secs(300))
            .await
            .unwrap();

        let calls = client.get_calls();
        assert!(matches!(calls[0].value, MockRedisValue::StringWithTTL(_, 300)));
    }

    #[tokio::test]
    async fn test_redis_invalidate_deletes_scanned_keys() {
        let id = Uuid::new_v4();
        let prefix = campaign_prefix(&id);
        let keys = vec![format!("{prefix}a"), format!("{prefix}b")];
        let client = MockRedisClient::new().scan_ret(&prefix, Ok(keys.clone()));
        let cache = RedisInsightsCache::new(Arc::new(client.clone()));

        assert_eq!(cache.invalidate(&prefix).await.unwrap(), 2);

        let calls = client.get_calls();
        assert_eq!(calls[1].op, "batch_del");
        assert!(matches!(&calls[1].value, MockRedisValue::VecString(deleted) if *deleted == keys));
    }

    #[tokio::test]
    async fn test_memory_cache_invalidates_by_prefix() {
        let cache = MemoryInsightsCache::new(100);
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let key_a = cache_key(&params(Some(a)));
        let key_b = cache_key(&params(Some(b)));
        let ttl = Duration::from_secs(300);

        cache.set(&key_a, &[row(a)], ttl).await.unwrap();
        cache.set(&key_b, &[row(b)], ttl).await.unwrap();

        assert_eq!(cache.invalidate(&campaign_prefix(&a)).await.unwrap(), 1);
        assert_eq!(cache.get(&key_a).await.unwrap(), None);
        assert_eq!(cache.get(&key_b).await.unwrap().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_memory_cache_entries_expire() {
        let cache = MemoryInsightsCache::new(100);
        cache
            .set("k", &[row(Uuid::new_v4())], Duration::from_millis(20))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(cache.get("k").await.unwrap(), None);
    }
}
