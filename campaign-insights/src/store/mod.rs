use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use rocksdb::{ColumnFamilyDescriptor, Options};
use uuid::Uuid;

use crate::error::StoreError;
use crate::types::Platform;

pub mod aggregates;
pub mod db;
pub mod event_log;
pub mod keys;
pub mod versioned;

pub use aggregates::AggregateTable;
pub use event_log::EventLog;

pub const EVENTS_CF: &str = "campaign_events";
pub const AGGREGATES_CF: &str = "campaign_insights";

/// The event log and the aggregate table, sharing one RocksDB instance.
#[derive(Debug, Clone)]
pub struct CampaignStore {
    pub events: EventLog,
    pub aggregates: AggregateTable,
    db: Arc<db::RocksDbStore>,
}

impl CampaignStore {
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let store = Arc::new(db::RocksDbStore::new(
            path,
            vec![
                ColumnFamilyDescriptor::new(EVENTS_CF, last_write_wins_options()),
                ColumnFamilyDescriptor::new(AGGREGATES_CF, last_write_wins_options()),
            ],
        )?);

        Ok(Self {
            events: EventLog::new(store.clone()),
            aggregates: AggregateTable::new(store.clone()),
            db: store,
        })
    }

    /// Flush both column families' memtables to disk. Called on shutdown.
    pub fn flush(&self) -> Result<(), StoreError> {
        self.db.flush_cf(EVENTS_CF)?;
        self.db.flush_cf(AGGREGATES_CF)
    }

    pub fn path(&self) -> &Path {
        self.db.path()
    }
}

fn last_write_wins_options() -> Options {
    let mut opts = Options::default();
    opts.set_merge_operator_associative(
        versioned::MERGE_OPERATOR_NAME,
        versioned::last_write_wins,
    );
    opts
}

/// Version for the last-write-wins merge: microseconds since the epoch, floored at zero.
pub(crate) fn version_from(time: DateTime<Utc>) -> u64 {
    u64::try_from(time.timestamp_micros()).unwrap_or(0)
}

/// Inclusive date range plus optional campaign, platform and region filters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RangeFilter {
    pub campaign_id: Option<Uuid>,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub platform: Option<Platform>,
    pub region: Option<String>,
}

impl RangeFilter {
    pub fn campaign(campaign_id: Uuid, start_date: NaiveDate, end_date: NaiveDate) -> Self {
        Self {
            campaign_id: Some(campaign_id),
            start_date,
            end_date,
            platform: None,
            region: None,
        }
    }

    pub fn matches(&self, platform: Platform, region: &str) -> bool {
        self.platform.map_or(true, |p| p == platform)
            && self.region.as_deref().map_or(true, |r| r == region)
    }
}
