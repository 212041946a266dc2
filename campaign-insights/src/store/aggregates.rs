use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::error::StoreError;
use crate::store::db::RocksDbStore;
use crate::store::keys::AggregateKey;
use crate::store::{version_from, versioned, RangeFilter, AGGREGATES_CF};
use crate::types::{AggregateRow, BucketKey};

/// Aggregate rows keyed by `(campaign_id, date, platform, region)`.
/// Rows are replaced whole; the newest `updated_at` wins.
///
/// A removed row is a versioned value with an empty payload. It competes in
/// the same last-write-wins merge as any row, so a row computed later than
/// the removal still takes its place.
#[derive(Debug, Clone)]
pub struct AggregateTable {
    store: Arc<RocksDbStore>,
}

impl AggregateTable {
    pub(crate) fn new(store: Arc<RocksDbStore>) -> Self {
        Self { store }
    }

    pub fn put(&self, row: &AggregateRow) -> Result<(), StoreError> {
        let key = AggregateKey(row.bucket());
        let payload = bincode::serialize(row).map_err(StoreError::Encode)?;

        self.store.merge(
            AGGREGATES_CF,
            &Vec::<u8>::from(&key),
            &versioned::encode(version_from(row.updated_at), &payload),
        )
    }

    /// Retract the row for a bucket that no longer has any events.
    pub fn remove(
        &self,
        bucket: &BucketKey,
        updated_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let key = AggregateKey(bucket.clone());
        self.store.merge(
            AGGREGATES_CF,
            &Vec::<u8>::from(&key),
            &versioned::encode(version_from(updated_at), &[]),
        )
    }

    pub fn get(&self, bucket: &BucketKey) -> Result<Option<AggregateRow>, StoreError> {
        match self
            .store
            .get(AGGREGATES_CF, &Vec::<u8>::from(&AggregateKey(bucket.clone())))?
        {
            Some(value) => decode_row(&value),
            None => Ok(None),
        }
    }

    /// Rows in the filter's inclusive date range, ordered by campaign then date.
    pub fn query(&self, filter: &RangeFilter) -> Result<Vec<AggregateRow>, StoreError> {
        let entries = match filter.campaign_id {
            Some(campaign_id) => {
                let (lower, upper) =
                    AggregateKey::campaign_range(&campaign_id, filter.start_date, filter.end_date);
                self.store.scan(AGGREGATES_CF, lower, Some(upper))?
            }
            None => self.store.scan(AGGREGATES_CF, Vec::new(), None)?,
        };

        let mut rows = Vec::new();
        for (key, value) in entries {
            let AggregateKey(bucket) = AggregateKey::try_from(key.as_ref())?;
            if bucket.date < filter.start_date
                || bucket.date > filter.end_date
                || !filter.matches(bucket.platform, &bucket.region)
            {
                continue;
            }
            if let Some(row) = decode_row(&value)? {
                rows.push(row);
            }
        }

        Ok(rows)
    }
}

fn decode_row(value: &[u8]) -> Result<Option<AggregateRow>, StoreError> {
    let (_, payload) = versioned::decode(value)?;
    if payload.is_empty() {
        return Ok(None);
    }
    bincode::deserialize(payload)
        .map(Some)
        .map_err(|e| StoreError::CorruptValue(format!("failed to decode aggregate row: {e}")))
}
