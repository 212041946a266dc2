//! Binary key layouts for the event log and aggregate column families.
//!
//! Both keys start with the 16 raw campaign id bytes followed by a
//! sign-flipped big-endian time component, so lexicographic order equals
//! `(campaign, time)` order and a campaign's date range is one contiguous scan.

use chrono::{DateTime, Datelike, NaiveDate, Utc};
use uuid::Uuid;

use crate::error::StoreError;
use crate::types::{BucketKey, Platform};

const CAMPAIGN_LEN: usize = 16;
const TIME_LEN: usize = 8;
const DATE_LEN: usize = 4;

fn encode_micros(micros: i64) -> [u8; TIME_LEN] {
    ((micros as u64) ^ (1 << 63)).to_be_bytes()
}

fn decode_micros(bytes: [u8; TIME_LEN]) -> i64 {
    (u64::from_be_bytes(bytes) ^ (1 << 63)) as i64
}

fn encode_date(date: NaiveDate) -> [u8; DATE_LEN] {
    ((date.num_days_from_ce() as u32) ^ (1 << 31)).to_be_bytes()
}

fn decode_date(bytes: [u8; DATE_LEN]) -> Option<NaiveDate> {
    let days = (u32::from_be_bytes(bytes) ^ (1 << 31)) as i32;
    NaiveDate::from_num_days_from_ce_opt(days)
}

fn split_campaign(bytes: &[u8]) -> Result<(Uuid, &[u8]), StoreError> {
    if bytes.len() < CAMPAIGN_LEN {
        return Err(StoreError::CorruptKey(format!(
            "key too short for campaign id: {} bytes",
            bytes.len()
        )));
    }
    let (campaign, rest) = bytes.split_at(CAMPAIGN_LEN);
    let campaign_id = Uuid::from_slice(campaign)
        .map_err(|e| StoreError::CorruptKey(format!("invalid campaign id: {e}")))?;
    Ok((campaign_id, rest))
}

fn campaign_prefix(campaign_id: &Uuid, time_part: &[u8]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(CAMPAIGN_LEN + time_part.len());
    bytes.extend_from_slice(campaign_id.as_bytes());
    bytes.extend_from_slice(time_part);
    bytes
}

/// `[campaign 16][event_time micros 8][deduplication_key utf8]`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventKey {
    pub campaign_id: Uuid,
    pub event_time: DateTime<Utc>,
    pub deduplication_key: String,
}

impl EventKey {
    pub fn new(campaign_id: Uuid, event_time: DateTime<Utc>, deduplication_key: String) -> Self {
        Self {
            campaign_id,
            event_time,
            deduplication_key,
        }
    }

    /// Key bounds covering `[start, end)` for one campaign.
    pub fn campaign_range(
        campaign_id: &Uuid,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> (Vec<u8>, Vec<u8>) {
        (
            campaign_prefix(campaign_id, &encode_micros(start.timestamp_micros())),
            campaign_prefix(campaign_id, &encode_micros(end.timestamp_micros())),
        )
    }
}

impl From<&EventKey> for Vec<u8> {
    fn from(key: &EventKey) -> Vec<u8> {
        let mut bytes = campaign_prefix(
            &key.campaign_id,
            &encode_micros(key.event_time.timestamp_micros()),
        );
        bytes.extend_from_slice(key.deduplication_key.as_bytes());
        bytes
    }
}

impl TryFrom<&[u8]> for EventKey {
    type Error = StoreError;

    fn try_from(bytes: &[u8]) -> Result<Self, StoreError> {
        let (campaign_id, rest) = split_campaign(bytes)?;
        if rest.len() < TIME_LEN {
            return Err(StoreError::CorruptKey(format!(
                "event key too short for event time: {} bytes",
                bytes.len()
            )));
        }
        let (time, dedup) = rest.split_at(TIME_LEN);
        let micros = decode_micros(time.try_into().map_err(|_| {
            StoreError::CorruptKey("event time is not 8 bytes".to_string())
        })?);
        let event_time = DateTime::from_timestamp_micros(micros)
            .ok_or_else(|| StoreError::CorruptKey(format!("event time out of range: {micros}")))?;
        let deduplication_key = std::str::from_utf8(dedup)
            .map_err(|e| StoreError::CorruptKey(format!("invalid utf-8 in dedup key: {e}")))?
            .to_string();

        Ok(Self::new(campaign_id, event_time, deduplication_key))
    }
}

/// `[campaign 16][date 4][platform tag 1][region utf8]`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AggregateKey(pub BucketKey);

impl AggregateKey {
    /// Key bounds covering the inclusive date range `[start, end]` for one campaign.
    pub fn campaign_range(
        campaign_id: &Uuid,
        start: NaiveDate,
        end: NaiveDate,
    ) -> (Vec<u8>, Vec<u8>) {
        let lower = campaign_prefix(campaign_id, &encode_date(start));
        let upper = match end.succ_opt() {
            Some(next) => campaign_prefix(campaign_id, &encode_date(next)),
            None => campaign_prefix(campaign_id, &[0xff; DATE_LEN + 1]),
        };
        (lower, upper)
    }
}

impl From<&AggregateKey> for Vec<u8> {
    fn from(key: &AggregateKey) -> Vec<u8> {
        let bucket = &key.0;
        let mut bytes = campaign_prefix(&bucket.campaign_id, &encode_date(bucket.date));
        bytes.push(bucket.platform.tag());
        bytes.extend_from_slice(bucket.region.as_bytes());
        bytes
    }
}

impl TryFrom<&[u8]> for AggregateKey {
    type Error = StoreError;

    fn try_from(bytes: &[u8]) -> Result<Self, StoreError> {
        let (campaign_id, rest) = split_campaign(bytes)?;
        if rest.len() < DATE_LEN + 1 {
            return Err(StoreError::CorruptKey(format!(
                "aggregate key too short: {} bytes",
                bytes.len()
            )));
        }
        let (date, rest) = rest.split_at(DATE_LEN);
        let date = date
            .try_into()
            .ok()
            .and_then(decode_date)
            .ok_or_else(|| StoreError::CorruptKey("invalid bucket date".to_string()))?;
        let platform = Platform::from_tag(rest[0])
            .ok_or_else(|| StoreError::CorruptKey(format!("unknown platform tag {}", rest[0])))?;
        let region = std::str::from_utf8(&rest[1..])
            .map_err(|e| StoreError::CorruptKey(format!("invalid utf-8 in region: {e}")))?
            .to_string();

        Ok(AggregateKey(BucketKey {
            campaign_id,
            date,
            platform,
            region,
        }))
    }
}
