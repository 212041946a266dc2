//! Shared harness for the pipeline integration tests.
//!
//! Wires the consumer loop to an in-memory source, in-memory dedup and cache
//! backends, and a RocksDB store in a temp directory.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use campaign_insights::backoff::Backoff;
use campaign_insights::cache::MemoryInsightsCache;
use campaign_insights::consumer::{ConsumerLoop, ConsumerStats};
use campaign_insights::dedup::MemoryDeduplicationStore;
use campaign_insights::kafka::DeadLetterSink;
use campaign_insights::test_utils::{MemoryDeadLetterSink, MemoryEventSource};
use campaign_insights::types::{AggregateRow, InsightsParams, Platform};
use campaign_insights::{AggregationEngine, CampaignStore, EventProcessor};
use chrono::NaiveDate;
use serde_json::{json, Value};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

pub struct Pipeline {
    pub source: MemoryEventSource,
    pub dead_letter: Option<MemoryDeadLetterSink>,
    pub store: CampaignStore,
    pub engine: Arc<AggregationEngine>,
    pub processor: Arc<EventProcessor>,
    _dir: TempDir,
}

impl Pipeline {
    pub fn new() -> Self {
        Self::build(None)
    }

    pub fn with_dead_letter() -> Self {
        Self::build(Some(MemoryDeadLetterSink::new()))
    }

    fn build(dead_letter: Option<MemoryDeadLetterSink>) -> Self {
        let dir = TempDir::new().unwrap();
        let store = CampaignStore::open(dir.path()).unwrap();
        let engine = Arc::new(AggregationEngine::new(
            store.events.clone(),
            store.aggregates.clone(),
            Arc::new(MemoryInsightsCache::new(1_000)),
            Duration::from_secs(300),
        ));
        let processor = Arc::new(EventProcessor::new(
            Arc::new(MemoryDeduplicationStore::new(1_000)),
            store.events.clone(),
            engine.clone(),
            Duration::from_secs(3600),
        ));

        Self {
            source: MemoryEventSource::new(),
            dead_letter,
            store,
            engine,
            processor,
            _dir: dir,
        }
    }

    pub fn consumer(&self) -> ConsumerLoop {
        ConsumerLoop::new(
            Arc::new(self.source.clone()),
            self.processor.clone(),
            self.dead_letter
                .clone()
                .map(|sink| -> Arc<dyn DeadLetterSink> { Arc::new(sink) }),
            Backoff::new(Duration::from_millis(1), Duration::from_millis(10)),
        )
    }

    /// Run a fresh consumer loop until the source is drained and at least
    /// `expected_commits` offsets were committed in total, then stop it.
    pub async fn drain(&self, expected_commits: usize) -> ConsumerStats {
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(self.consumer().run(cancel.clone()));
        for _ in 0..1_000 {
            if self.source.is_drained() && self.source.commits().len() >= expected_commits {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
        cancel.cancel();
        handle.await.unwrap()
    }

    pub async fn insights(&self, campaign_id: Uuid, date: NaiveDate) -> Vec<AggregateRow> {
        self.engine
            .get_campaign_insights(&InsightsParams {
                campaign_id: Some(campaign_id),
                start_date: Some(date),
                end_date: Some(date),
                ..Default::default()
            })
            .await
            .unwrap()
    }
}

pub fn day(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

#[allow(clippy::too_many_arguments)]
pub fn stats_event(
    campaign_id: Uuid,
    platform: Platform,
    event_time: &str,
    dedup_key: &str,
    impressions: i64,
    clicks: i64,
    spend: f64,
    revenue: f64,
) -> Value {
    json!({
        "campaign_id": campaign_id,
        "platform": platform.as_str(),
        "event_time": event_time,
        "deduplication_key": dedup_key,
        "impressions": impressions,
        "clicks": clicks,
        "spend": spend,
        "revenue": revenue,
    })
}

pub fn assert_close(actual: f64, expected: f64) {
    assert!(
        (actual - expected).abs() < 1e-9,
        "expected {expected}, got {actual}"
    );
}
