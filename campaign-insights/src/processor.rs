use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use metrics::counter;
use tracing::warn;

use crate::aggregation::AggregationEngine;
use crate::dedup::DeduplicationStore;
use crate::error::ProcessError;
use crate::metrics_consts::DEDUP_ERRORS_COUNTER;
use crate::store::keys::EventKey;
use crate::store::EventLog;
use crate::types::{Event, RawEvent};
use crate::validation::validate;

/// Per-message pipeline: decode, validate, dedup check, append, refresh the
/// aggregate, mark processed. Each stage is exposed so the consumer loop can
/// track which state it is in.
pub struct EventProcessor {
    dedup: Arc<dyn DeduplicationStore>,
    events: EventLog,
    engine: Arc<AggregationEngine>,
    dedup_ttl: Duration,
}

impl EventProcessor {
    pub fn new(
        dedup: Arc<dyn DeduplicationStore>,
        events: EventLog,
        engine: Arc<AggregationEngine>,
        dedup_ttl: Duration,
    ) -> Self {
        Self {
            dedup,
            events,
            engine,
            dedup_ttl,
        }
    }

    pub fn decode_and_validate(&self, payload: Option<&[u8]>) -> Result<Event, ProcessError> {
        let payload = match payload {
            Some(p) if !p.is_empty() => p,
            _ => return Err(ProcessError::EmptyPayload),
        };
        let raw: RawEvent = serde_json::from_slice(payload)?;
        Ok(validate(raw)?)
    }

    /// The dedup store is best-effort: when it cannot answer, the event is
    /// treated as new and the keyed append absorbs any redelivery.
    pub async fn is_duplicate(&self, event: &Event) -> bool {
        match self.dedup.is_processed(&event.deduplication_key).await {
            Ok(processed) => processed,
            Err(e) => {
                counter!(DEDUP_ERRORS_COUNTER, "op" => "check").increment(1);
                warn!(
                    dedup_key = %event.deduplication_key,
                    error = %e,
                    "dedup check failed, treating event as new"
                );
                false
            }
        }
    }

    /// Append and refresh the bucket. `processed_at` is stamped here and is
    /// the version the event log keeps on re-append. A re-append that moves
    /// the event to another region or platform also refreshes the bucket it
    /// left.
    pub async fn persist(&self, event: &mut Event) -> Result<(), ProcessError> {
        let previous = self.events.get(&EventKey::new(
            event.campaign_id,
            event.event_time,
            event.deduplication_key.clone(),
        ))?;
        event.processed_at = Some(Utc::now());
        self.events.append(event)?;
        self.engine
            .on_event_appended(event, previous.as_ref())
            .await
            .map_err(ProcessError::Aggregation)?;
        Ok(())
    }

    pub async fn mark(&self, event: &Event) {
        if let Err(e) = self
            .dedup
            .mark_processed(&event.deduplication_key, self.dedup_ttl)
            .await
        {
            counter!(DEDUP_ERRORS_COUNTER, "op" => "mark").increment(1);
            warn!(
                dedup_key = %event.deduplication_key,
                error = %e,
                "failed to mark event as processed"
            );
        }
    }
}
