// ==== Consumer loop ====
/// Counter for messages received from the event source
pub const MESSAGES_RECEIVED_COUNTER: &str = "campaign_insights_messages_received_total";

/// Counter for message outcomes, labelled with `outcome` (persisted/duplicate/rejected/retried)
pub const MESSAGES_PROCESSED_COUNTER: &str = "campaign_insights_messages_processed_total";

/// Counter for non-retryable messages, labelled with `reason`
pub const MESSAGES_REJECTED_COUNTER: &str = "campaign_insights_messages_rejected_total";

/// Counter for messages produced to the dead letter topic
pub const DEAD_LETTER_COUNTER: &str = "campaign_insights_dead_letter_total";

/// Counter for fetch errors from the event source
pub const FETCH_ERRORS_COUNTER: &str = "campaign_insights_fetch_errors_total";

/// Counter for failed offset commits
pub const COMMIT_ERRORS_COUNTER: &str = "campaign_insights_commit_errors_total";

/// Histogram for time spent sleeping in backoff
pub const BACKOFF_DURATION_HISTOGRAM: &str = "campaign_insights_backoff_duration_seconds";

/// Histogram for end-to-end message processing duration
pub const MESSAGE_PROCESSING_DURATION_HISTOGRAM: &str =
    "campaign_insights_message_processing_duration_seconds";

// ==== Deduplication store ====
/// Counter for dedup store failures, labelled with `op` (check/mark)
pub const DEDUP_ERRORS_COUNTER: &str = "campaign_insights_dedup_errors_total";

// ==== Event log and aggregates ====
/// Histogram for RocksDB operation duration, labelled with `op` and `cf`
pub const STORE_OPERATION_DURATION_HISTOGRAM: &str = "campaign_insights_store_operation_seconds";

/// Counter for keys read by range scans, labelled with `cf`
pub const STORE_SCANNED_KEYS_COUNTER: &str = "campaign_insights_store_scanned_keys_total";

/// Counter for aggregate rows written, labelled with `path` (incremental/reaggregation)
pub const AGGREGATE_ROWS_WRITTEN_COUNTER: &str = "campaign_insights_aggregate_rows_written_total";

/// Counter for aggregate rows retracted because their bucket has no events, labelled with `path`
pub const AGGREGATE_ROWS_REMOVED_COUNTER: &str = "campaign_insights_aggregate_rows_removed_total";

/// Counter for reaggregation runs, labelled with `status` (completed/cancelled/failed)
pub const REAGGREGATIONS_COUNTER: &str = "campaign_insights_reaggregations_total";

// ==== Insights cache ====
/// Counter for insights cache lookups, labelled with `result` (hit/miss/error)
pub const CACHE_LOOKUPS_COUNTER: &str = "campaign_insights_cache_lookups_total";

/// Counter for cache write or invalidation failures, labelled with `op`
pub const CACHE_ERRORS_COUNTER: &str = "campaign_insights_cache_errors_total";

/// Counter for cache entries removed by prefix invalidation
pub const CACHE_INVALIDATED_KEYS_COUNTER: &str = "campaign_insights_cache_invalidated_keys_total";

// ==== Platform fetch ====
/// Counter for events published from platform fetches, labelled with `platform` and `status`
pub const EVENTS_PUBLISHED_COUNTER: &str = "campaign_insights_events_published_total";

/// Counter for platform API failures, labelled with `platform`
pub const PLATFORM_ERRORS_COUNTER: &str = "campaign_insights_platform_errors_total";
