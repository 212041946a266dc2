//! Campaign insights: ingest ad-platform events from Kafka, deduplicate and
//! persist them, and keep per-day aggregates queryable.
//!
//! ## Error logging
//!
//! Log errors with a cause chain as `error = ?e` or `{e:#}`, so root causes
//! stay visible. Build service-level errors with `.context()` instead of
//! formatting the source into a new message.

pub mod aggregation;
pub mod backoff;
pub mod cache;
pub mod config;
pub mod consumer;
pub mod dedup;
pub mod error;
pub mod kafka;
pub mod metrics_consts;
pub mod metrics_server;
pub mod platforms;
pub mod processor;
pub mod publisher;
pub mod service;
pub mod store;
pub mod test_utils;
pub mod types;
pub mod validation;

pub use aggregation::{AggregationEngine, ReaggregationStatus, ReaggregationSummary};
pub use consumer::{ConsumerLoop, ConsumerState, ConsumerStats};
pub use processor::EventProcessor;
pub use store::CampaignStore;
