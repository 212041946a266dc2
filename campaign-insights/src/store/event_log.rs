use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use tracing::debug;

use crate::error::StoreError;
use crate::store::db::RocksDbStore;
use crate::store::keys::EventKey;
use crate::store::{version_from, versioned, RangeFilter, EVENTS_CF};
use crate::types::Event;

/// Append-only event log. Appends are merges keyed by
/// `(campaign_id, event_time, deduplication_key)`, so re-appending the same
/// logical event replaces the stored copy when its `processed_at` is newer.
#[derive(Debug, Clone)]
pub struct EventLog {
    store: Arc<RocksDbStore>,
}

impl EventLog {
    pub(crate) fn new(store: Arc<RocksDbStore>) -> Self {
        Self { store }
    }

    pub fn append(&self, event: &Event) -> Result<(), StoreError> {
        let key = EventKey::new(
            event.campaign_id,
            event.event_time,
            event.deduplication_key.clone(),
        );
        let version = version_from(event.processed_at.unwrap_or_else(Utc::now));
        let payload = bincode::serialize(event).map_err(StoreError::Encode)?;

        self.store.merge(
            EVENTS_CF,
            &Vec::<u8>::from(&key),
            &versioned::encode(version, &payload),
        )?;

        debug!(
            campaign_id = %event.campaign_id,
            deduplication_key = %event.deduplication_key,
            version,
            "appended event"
        );
        Ok(())
    }

    pub fn get(&self, key: &EventKey) -> Result<Option<Event>, StoreError> {
        self.store
            .get(EVENTS_CF, &Vec::<u8>::from(key))?
            .map(|value| decode_event(&value))
            .transpose()
    }

    /// Events whose `event_time` falls on a day in `[start_date, end_date]`,
    /// ordered by campaign, then event time, then deduplication key.
    pub fn query_range(&self, filter: &RangeFilter) -> Result<Vec<Event>, StoreError> {
        let (start, end) = day_bounds(filter.start_date, filter.end_date);

        let entries = match filter.campaign_id {
            Some(campaign_id) => {
                let (lower, upper) = EventKey::campaign_range(&campaign_id, start, end);
                self.store.scan(EVENTS_CF, lower, Some(upper))?
            }
            // No campaign means no usable prefix, so the time window is checked per key
            None => self.store.scan(EVENTS_CF, Vec::new(), None)?,
        };

        let mut events = Vec::new();
        for (key, value) in entries {
            if filter.campaign_id.is_none() {
                let key = EventKey::try_from(key.as_ref())?;
                if key.event_time < start || key.event_time >= end {
                    continue;
                }
            }

            let event = decode_event(&value)?;
            if filter.matches(event.platform, &event.region) {
                events.push(event);
            }
        }

        Ok(events)
    }
}

fn decode_event(value: &[u8]) -> Result<Event, StoreError> {
    let (_, payload) = versioned::decode(value)?;
    bincode::deserialize(payload)
        .map_err(|e| StoreError::CorruptValue(format!("failed to decode event: {e}")))
}

/// `[start_date 00:00, end_date + 1 00:00)` in UTC.
fn day_bounds(start_date: NaiveDate, end_date: NaiveDate) -> (DateTime<Utc>, DateTime<Utc>) {
    let start = start_date.and_time(chrono::NaiveTime::MIN).and_utc();
    let end = match end_date.succ_opt() {
        Some(next) => next.and_time(chrono::NaiveTime::MIN).and_utc(),
        None => DateTime::<Utc>::MAX_UTC,
    };
    (start, end)
}
