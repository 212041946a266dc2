use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::ValidationError;
use crate::types::{Event, RawEvent};

pub const DEFAULT_EVENT_TYPE: &str = "stats";
pub const DEFAULT_REGION: &str = "all";
pub const DEFAULT_CURRENCY: &str = "USD";

/// Validate and normalize a raw event.
///
/// Missing identity fields fail hard. Negative metrics are clamped to zero and
/// optional descriptive fields get defaults. `processed_at` is left unset; the
/// caller stamps it when the event is persisted.
pub fn validate(raw: RawEvent) -> Result<Event, ValidationError> {
    validate_at(raw, Utc::now())
}

pub fn validate_at(raw: RawEvent, now: DateTime<Utc>) -> Result<Event, ValidationError> {
    let campaign_id = raw
        .campaign_id
        .filter(|id| !id.is_nil())
        .ok_or(ValidationError::MissingCampaignId)?;
    let platform = raw.platform.ok_or(ValidationError::MissingPlatform)?;
    let event_time = raw.event_time.ok_or(ValidationError::MissingEventTime)?;
    let deduplication_key = non_blank(raw.deduplication_key)
        .ok_or(ValidationError::MissingDeduplicationKey)?;

    Ok(Event {
        id: raw.id.filter(|id| !id.is_nil()).unwrap_or_else(Uuid::now_v7),
        campaign_id,
        platform,
        event_type: non_blank(raw.event_type).unwrap_or_else(|| DEFAULT_EVENT_TYPE.to_string()),
        impressions: raw.impressions.max(0),
        clicks: raw.clicks.max(0),
        conversions: raw.conversions.max(0),
        spend: clamp_amount(raw.spend),
        revenue: clamp_amount(raw.revenue),
        event_time,
        region: non_blank(raw.region).unwrap_or_else(|| DEFAULT_REGION.to_string()),
        currency: non_blank(raw.currency).unwrap_or_else(|| DEFAULT_CURRENCY.to_string()),
        deduplication_key,
        received_at: raw.received_at.unwrap_or(now),
        processed_at: None,
    })
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

// NaN compares false against zero, so it has to be caught explicitly.
fn clamp_amount(value: f64) -> f64 {
    if value.is_nan() || value < 0.0 {
        0.0
    } else {
        value
    }
}
