use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{Days, NaiveDate, Utc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::aggregation::rollup::roll_up;
use crate::aggregation::totals::Totals;
use crate::cache::{cache_key, campaign_prefix, InsightsCache};
use crate::error::{InsightsError, StoreError};
use crate::metrics_consts::{
    AGGREGATE_ROWS_REMOVED_COUNTER, AGGREGATE_ROWS_WRITTEN_COUNTER, CACHE_ERRORS_COUNTER,
    CACHE_INVALIDATED_KEYS_COUNTER, CACHE_LOOKUPS_COUNTER, REAGGREGATIONS_COUNTER,
};
use crate::store::{AggregateTable, EventLog, RangeFilter};
use crate::types::{AggregateRow, BucketKey, Event, InsightsParams, ResolvedParams};

pub const DEFAULT_LOOKBACK_DAYS: u64 = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReaggregationStatus {
    Completed,
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReaggregationSummary {
    pub status: ReaggregationStatus,
    pub rows_written: usize,
    pub rows_removed: usize,
}

/// Builds aggregate rows from the event log and serves insight queries.
///
/// Every row is recomputed from the full set of matching events, never
/// adjusted by deltas, so concurrent or repeated recomputation of the same
/// bucket converges. Each write is versioned by a timestamp taken *before*
/// the events are read; a computation that saw newer data always carries the
/// newer version.
pub struct AggregationEngine {
    events: EventLog,
    aggregates: AggregateTable,
    cache: Arc<dyn InsightsCache>,
    cache_ttl: Duration,
}

impl AggregationEngine {
    pub fn new(
        events: EventLog,
        aggregates: AggregateTable,
        cache: Arc<dyn InsightsCache>,
        cache_ttl: Duration,
    ) -> Self {
        Self {
            events,
            aggregates,
            cache,
            cache_ttl,
        }
    }

    /// Recompute one bucket from every event it contains. A bucket left with
    /// no events has its row removed and yields `None`.
    pub fn refresh_bucket(
        &self,
        bucket: &BucketKey,
    ) -> Result<Option<AggregateRow>, StoreError> {
        let updated_at = Utc::now();
        let filter = RangeFilter {
            campaign_id: Some(bucket.campaign_id),
            start_date: bucket.date,
            end_date: bucket.date,
            platform: Some(bucket.platform),
            region: Some(bucket.region.clone()),
        };

        let events = self.events.query_range(&filter)?;
        if events.is_empty() {
            self.aggregates.remove(bucket, updated_at)?;
            metrics::counter!(AGGREGATE_ROWS_REMOVED_COUNTER, "path" => "incremental")
                .increment(1);
            return Ok(None);
        }

        let mut totals = Totals::default();
        for event in &events {
            totals.add_event(event);
        }

        let row = totals.into_row(bucket.clone(), updated_at);
        self.aggregates.put(&row)?;
        metrics::counter!(AGGREGATE_ROWS_WRITTEN_COUNTER, "path" => "incremental").increment(1);
        Ok(Some(row))
    }

    /// Incremental path: refresh the bucket an appended event belongs to,
    /// then drop cached queries for its campaign.
    ///
    /// `previous` is whatever the event log held under the same key before
    /// the append. When it sat in a different bucket (another platform or
    /// region), that bucket is refreshed too so the superseded copy stops
    /// counting there.
    pub async fn on_event_appended(
        &self,
        event: &Event,
        previous: Option<&Event>,
    ) -> Result<Option<AggregateRow>, StoreError> {
        let bucket = event.bucket();
        if let Some(previous) = previous {
            let old_bucket = previous.bucket();
            if old_bucket != bucket {
                debug!(
                    campaign_id = %event.campaign_id,
                    dedup_key = %event.deduplication_key,
                    from_region = %old_bucket.region,
                    to_region = %bucket.region,
                    "superseding append moved event to another bucket"
                );
                self.refresh_bucket(&old_bucket)?;
            }
        }

        let row = self.refresh_bucket(&bucket)?;
        self.invalidate_campaign(&event.campaign_id).await;
        Ok(row)
    }

    /// Recompute every bucket of `campaign_id` dated in `[start_date, end_date]`.
    ///
    /// Stored rows in the range with no events behind them are removed, so
    /// the range ends up holding exactly what the event log supports.
    /// Cancellation is checked between buckets; rows already written stay written.
    pub async fn reaggregate(
        &self,
        campaign_id: Uuid,
        start_date: NaiveDate,
        end_date: NaiveDate,
        cancel: &CancellationToken,
    ) -> Result<ReaggregationSummary, StoreError> {
        let updated_at = Utc::now();
        let filter = RangeFilter::campaign(campaign_id, start_date, end_date);
        let events = self.events.query_range(&filter)?;

        let mut buckets: BTreeMap<BucketKey, Totals> = BTreeMap::new();
        for event in &events {
            buckets.entry(event.bucket()).or_default().add_event(event);
        }

        let orphaned: Vec<BucketKey> = self
            .aggregates
            .query(&filter)?
            .iter()
            .map(AggregateRow::bucket)
            .filter(|bucket| !buckets.contains_key(bucket))
            .collect();

        let mut summary = ReaggregationSummary {
            status: ReaggregationStatus::Completed,
            rows_written: 0,
            rows_removed: 0,
        };
        for (bucket, totals) in buckets {
            if cancel.is_cancelled() {
                summary.status = ReaggregationStatus::Cancelled;
                break;
            }
            self.aggregates.put(&totals.into_row(bucket, updated_at))?;
            summary.rows_written += 1;
            // Keep a long backfill from starving the runtime
            tokio::task::yield_now().await;
        }
        for bucket in &orphaned {
            if cancel.is_cancelled() {
                summary.status = ReaggregationStatus::Cancelled;
                break;
            }
            self.aggregates.remove(bucket, updated_at)?;
            summary.rows_removed += 1;
        }

        metrics::counter!(AGGREGATE_ROWS_WRITTEN_COUNTER, "path" => "reaggregation")
            .increment(summary.rows_written as u64);
        metrics::counter!(AGGREGATE_ROWS_REMOVED_COUNTER, "path" => "reaggregation")
            .increment(summary.rows_removed as u64);
        self.invalidate_campaign(&campaign_id).await;

        info!(
            campaign_id = %campaign_id,
            %start_date,
            %end_date,
            events = events.len(),
            rows = summary.rows_written,
            removed = summary.rows_removed,
            status = ?summary.status,
            "reaggregation finished"
        );
        Ok(summary)
    }

    /// Run [`Self::reaggregate`] in the background. Failures are logged, not returned.
    pub fn spawn_reaggregation(
        self: &Arc<Self>,
        campaign_id: Uuid,
        start_date: NaiveDate,
        end_date: NaiveDate,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        let engine = Arc::clone(self);
        tokio::spawn(async move {
            match engine
                .reaggregate(campaign_id, start_date, end_date, &cancel)
                .await
            {
                Ok(summary) => {
                    let status = match summary.status {
                        ReaggregationStatus::Completed => "completed",
                        ReaggregationStatus::Cancelled => "cancelled",
                    };
                    metrics::counter!(REAGGREGATIONS_COUNTER, "status" => status).increment(1);
                }
                Err(e) => {
                    metrics::counter!(REAGGREGATIONS_COUNTER, "status" => "failed").increment(1);
                    error!(
                        campaign_id = %campaign_id,
                        %start_date,
                        %end_date,
                        error = %e,
                        "reaggregation failed"
                    );
                }
            }
        })
    }

    pub async fn get_campaign_insights(
        &self,
        params: &InsightsParams,
    ) -> Result<Vec<AggregateRow>, InsightsError> {
        let resolved = resolve_params(params, Utc::now().date_naive())?;
        self.query_insights(&resolved).await
    }

    pub async fn query_insights(
        &self,
        params: &ResolvedParams,
    ) -> Result<Vec<AggregateRow>, InsightsError> {
        let key = cache_key(params);

        match self.cache.get(&key).await {
            Ok(Some(rows)) => {
                metrics::counter!(CACHE_LOOKUPS_COUNTER, "result" => "hit").increment(1);
                return Ok(rows);
            }
            Ok(None) => {
                metrics::counter!(CACHE_LOOKUPS_COUNTER, "result" => "miss").increment(1);
            }
            Err(e) => {
                metrics::counter!(CACHE_LOOKUPS_COUNTER, "result" => "error").increment(1);
                warn!(key = %key, error = %e, "insights cache read failed, falling back to store");
            }
        }

        let filter = RangeFilter {
            campaign_id: params.campaign_id,
            start_date: params.start_date,
            end_date: params.end_date,
            platform: params.platform,
            region: params.region.clone(),
        };
        let rows = roll_up(self.aggregates.query(&filter)?, params.granularity);

        // Empty results are not cached so fresh data shows up without waiting out the TTL
        if !rows.is_empty() {
            if let Err(e) = self.cache.set(&key, &rows, self.cache_ttl).await {
                metrics::counter!(CACHE_ERRORS_COUNTER, "op" => "set").increment(1);
                warn!(key = %key, error = %e, "failed to populate insights cache");
            }
        }

        Ok(rows)
    }

    async fn invalidate_campaign(&self, campaign_id: &Uuid) {
        let prefix = campaign_prefix(campaign_id);
        match self.cache.invalidate(&prefix).await {
            Ok(count) => {
                metrics::counter!(CACHE_INVALIDATED_KEYS_COUNTER).increment(count);
                debug!(prefix = %prefix, count, "invalidated insights cache");
            }
            Err(e) => {
                metrics::counter!(CACHE_ERRORS_COUNTER, "op" => "invalidate").increment(1);
                warn!(prefix = %prefix, error = %e, "failed to invalidate insights cache");
            }
        }
    }
}

/// Fill in the default window: `end_date` defaults to `today`, and
/// `start_date` to thirty days before `end_date`.
pub fn resolve_params(
    params: &InsightsParams,
    today: NaiveDate,
) -> Result<ResolvedParams, InsightsError> {
    let end_date = params.end_date.unwrap_or(today);
    let start_date = params.start_date.unwrap_or_else(|| {
        end_date
            .checked_sub_days(Days::new(DEFAULT_LOOKBACK_DAYS))
            .unwrap_or(NaiveDate::MIN)
    });

    if start_date > end_date {
        return Err(InsightsError::InvalidRange {
            start: start_date,
            end: end_date,
        });
    }

    Ok(ResolvedParams {
        campaign_id: params.campaign_id,
        start_date,
        end_date,
        platform: params.platform,
        region: params.region.clone(),
        granularity: params.granularity,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryInsightsCache;
    use crate::store::CampaignStore;
    use crate::types::{Granularity, Platform};
    use chrono::{DateTime, TimeZone};
    use tempfile::TempDir;

    struct Fixture {
        engine: Arc<AggregationEngine>,
        store: CampaignStore,
        cache: MemoryInsightsCache,
        _dir: TempDir,
    }

    fn fixture() -> Fixture {
        let dir = TempDir::new().unwrap();
        let store = CampaignStore::open(dir.path()).unwrap();
        let cache = MemoryInsightsCache::new(1000);
        let engine = Arc::new(AggregationEngine::new(
            store.events.clone(),
            store.aggregates.clone(),
            Arc::new(cache.clone()),
            Duration::from_secs(300),
        ));
        Fixture {
            engine,
            store,
            cache,
            _dir: dir,
        }
    }

    fn date(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, d).unwrap()
    }

    fn event(
        campaign_id: Uuid,
        day: u32,
        dedup: &str,
        impressions: i64,
        clicks: i64,
        spend: f64,
        revenue: f64,
    ) -> Event {
        let time: DateTime<Utc> = Utc.with_ymd_and_hms(2024, 1, day, 0, 0, 0).unwrap();
        Event {
            id: Uuid::new_v4(),
            campaign_id,
            platform: Platform::Meta,
            event_type: "stats".to_string(),
            impressions,
            clicks,
            conversions: clicks,
            spend,
            revenue,
            event_time: time,
            region: "all".to_string(),
            currency: "USD".to_string(),
            deduplication_key: dedup.to_string(),
            received_at: time,
            processed_at: Some(Utc::now()),
        }
    }

    fn params(campaign_id: Uuid, start: u32, end: u32) -> InsightsParams {
        InsightsParams {
            campaign_id: Some(campaign_id),
            start_date: Some(date(start)),
            end_date: Some(date(end)),
            ..Default::default()
        }
    }

    #[test]
    fn test_resolve_params_defaults_to_last_thirty_days() {
        let today = date(31);
        let resolved = resolve_params(&InsightsParams::default(), today).unwrap();
        assert_eq!(resolved.end_date, today);
        assert_eq!(resolved.start_date, date(1));
        assert_eq!(resolved.granularity, Granularity::Daily);
    }

    #[test]
    fn test_resolve_params_rejects_inverted_range() {
        let params = InsightsParams {
            start_date: Some(date(5)),
            end_date: Some(date(4)),
            ..Default::default()
        };
        assert!(matches!(
            resolve_params(&params, date(10)),
            Err(InsightsError::InvalidRange { .. })
        ));
    }

    #[tokio::test]
    async fn test_incremental_refresh_sums_all_events_in_bucket() {
        let f = fixture();
        let campaign = Uuid::new_v4();
        let first = event(campaign, 1, "a", 1000, 50, 50.0, 100.0);
        let second = event(campaign, 1, "b", 500, 25, 25.0, 50.0);

        f.store.events.append(&first).unwrap();
        f.engine.on_event_appended(&first, None).await.unwrap();
        f.store.events.append(&second).unwrap();
        let row = f
            .engine
            .on_event_appended(&second, None)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(row.impressions, 1500);
        assert_eq!(row.clicks, 75);
        assert_eq!(row.spend, 75.0);
        assert_eq!(row.revenue, 150.0);
        assert_eq!(row.ctr, 0.05);
        assert_eq!(row.cpc, 1.0);
        assert_eq!(row.roas, 2.0);

        // Refreshing again after a redelivery changes nothing
        f.store.events.append(&second).unwrap();
        let again = f
            .engine
            .on_event_appended(&second, None)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(again.impressions, 1500);
    }

    #[tokio::test]
    async fn test_reaggregate_is_repeatable() {
        let f = fixture();
        let campaign = Uuid::new_v4();
        for (day, dedup) in [(1, "a"), (1, "b"), (2, "c"), (3, "d")] {
            f.store
                .events
                .append(&event(campaign, day, dedup, 100, 10, 3.3, 7.7))
                .unwrap();
        }

        let cancel = CancellationToken::new();
        let range = RangeFilter::campaign(campaign, date(1), date(3));
        let first = f
            .engine
            .reaggregate(campaign, date(1), date(3), &cancel)
            .await
            .unwrap();
        assert_eq!(first.rows_written, 3);
        assert_eq!(first.rows_removed, 0);
        assert_eq!(first.status, ReaggregationStatus::Completed);
        let before = f.store.aggregates.query(&range).unwrap();

        f.engine
            .reaggregate(campaign, date(1), date(3), &cancel)
            .await
            .unwrap();
        let after = f.store.aggregates.query(&range).unwrap();

        let strip = |rows: Vec<AggregateRow>| -> Vec<AggregateRow> {
            rows.into_iter()
                .map(|r| AggregateRow {
                    updated_at: Utc.timestamp_opt(0, 0).unwrap(),
                    ..r
                })
                .collect()
        };
        assert_eq!(strip(before), strip(after));
    }

    #[tokio::test]
    async fn test_reaggregate_stops_when_cancelled() {
        let f = fixture();
        let campaign = Uuid::new_v4();
        f.store
            .events
            .append(&event(campaign, 1, "a", 1, 1, 1.0, 1.0))
            .unwrap();

        let cancel = CancellationToken::new();
        cancel.cancel();
        let summary = f
            .engine
            .reaggregate(campaign, date(1), date(1), &cancel)
            .await
            .unwrap();

        assert_eq!(summary.status, ReaggregationStatus::Cancelled);
        assert_eq!(summary.rows_written, 0);
    }

    #[tokio::test]
    async fn test_insights_are_cached_and_invalidated_by_reaggregation() {
        let f = fixture();
        let campaign = Uuid::new_v4();
        let first = event(campaign, 1, "a", 1000, 50, 50.0, 100.0);
        f.store.events.append(&first).unwrap();
        f.engine.on_event_appended(&first, None).await.unwrap();

        let query = params(campaign, 1, 1);
        let rows = f.engine.get_campaign_insights(&query).await.unwrap();
        assert_eq!(rows[0].impressions, 1000);

        let key = cache_key(&resolve_params(&query, date(1)).unwrap());
        assert!(f.cache.get(&key).await.unwrap().is_some());

        // Written behind the engine's back, so only reaggregation picks it up
        f.store
            .events
            .append(&event(campaign, 1, "b", 500, 25, 25.0, 50.0))
            .unwrap();
        f.engine
            .reaggregate(campaign, date(1), date(1), &CancellationToken::new())
            .await
            .unwrap();

        let rows = f.engine.get_campaign_insights(&query).await.unwrap();
        assert_eq!(rows[0].impressions, 1500);
    }

    #[tokio::test]
    async fn test_empty_results_are_not_cached() {
        let f = fixture();
        let query = params(Uuid::new_v4(), 1, 1);

        assert!(f
            .engine
            .get_campaign_insights(&query)
            .await
            .unwrap()
            .is_empty());
        let key = cache_key(&resolve_params(&query, date(1)).unwrap());
        assert!(f.cache.get(&key).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_spawned_reaggregation_writes_rows() {
        let f = fixture();
        let campaign = Uuid::new_v4();
        f.store
            .events
            .append(&event(campaign, 2, "a", 10, 1, 1.0, 1.0))
            .unwrap();

        f.engine
            .spawn_reaggregation(campaign, date(1), date(3), CancellationToken::new())
            .await
            .unwrap();

        let rows = f
            .store
            .aggregates
            .query(&RangeFilter::campaign(campaign, date(1), date(3)))
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].date, date(2));
    }

    #[tokio::test]
    async fn test_reaggregate_removes_rows_without_events() {
        let f = fixture();
        let campaign = Uuid::new_v4();
        f.store
            .events
            .append(&event(campaign, 1, "a", 100, 10, 1.0, 2.0))
            .unwrap();

        // A row left over from events that are no longer in the log
        let stale = AggregateRow {
            campaign_id: campaign,
            date: date(2),
            platform: Platform::Google,
            region: "all".to_string(),
            impressions: 999,
            clicks: 99,
            conversions: 9,
            spend: 9.0,
            revenue: 9.0,
            ctr: 0.1,
            cpc: 0.1,
            cpa: 1.0,
            roas: 1.0,
            conversion_rate: 0.1,
            updated_at: Utc::now(),
        };
        f.store.aggregates.put(&stale).unwrap();

        let summary = f
            .engine
            .reaggregate(campaign, date(1), date(3), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(summary.rows_written, 1);
        assert_eq!(summary.rows_removed, 1);

        assert!(f.store.aggregates.get(&stale.bucket()).unwrap().is_none());
        let rows = f
            .store
            .aggregates
            .query(&RangeFilter::campaign(campaign, date(1), date(3)))
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].impressions, 100);

        let insights = f
            .engine
            .get_campaign_insights(&params(campaign, 1, 3))
            .await
            .unwrap();
        let impressions: i64 = insights.iter().map(|r| r.impressions).sum();
        assert_eq!(impressions, 100);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_appends_and_reaggregation_converge() {
        let f = fixture();

        for round in 0..20 {
            let campaign = Uuid::new_v4();
            let mut tasks = Vec::new();

            for (dedup, impressions, clicks) in [("a", 1000, 50), ("b", 500, 25)] {
                let engine = f.engine.clone();
                let events = f.store.events.clone();
                let spend = clicks as f64;
                let e = event(campaign, 1, dedup, impressions, clicks, spend, 2.0 * spend);
                tasks.push(tokio::spawn(async move {
                    events.append(&e).unwrap();
                    engine.on_event_appended(&e, None).await.unwrap();
                }));
            }

            let engine = f.engine.clone();
            tasks.push(tokio::spawn(async move {
                engine
                    .reaggregate(campaign, date(1), date(1), &CancellationToken::new())
                    .await
                    .unwrap();
            }));

            for task in tasks {
                task.await.unwrap();
            }

            let bucket = event(campaign, 1, "a", 0, 0, 0.0, 0.0).bucket();
            let row = f.store.aggregates.get(&bucket).unwrap().unwrap();
            assert_eq!(row.impressions, 1500, "round {round}");
            assert_eq!(row.clicks, 75, "round {round}");
            assert_eq!(row.spend, 75.0, "round {round}");
            assert_eq!(row.revenue, 150.0, "round {round}");
        }
    }
}
