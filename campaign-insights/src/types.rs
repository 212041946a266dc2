use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("unknown {kind}: {value}")]
pub struct ParseEnumError {
    kind: &'static str,
    value: String,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Meta,
    Google,
    Linkedin,
    Tiktok,
}

impl Platform {
    pub const ALL: [Platform; 4] = [
        Platform::Meta,
        Platform::Google,
        Platform::Linkedin,
        Platform::Tiktok,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Meta => "meta",
            Platform::Google => "google",
            Platform::Linkedin => "linkedin",
            Platform::Tiktok => "tiktok",
        }
    }

    /// Single-byte tag used in aggregate keys. Stable across releases.
    pub fn tag(&self) -> u8 {
        match self {
            Platform::Meta => 1,
            Platform::Google => 2,
            Platform::Linkedin => 3,
            Platform::Tiktok => 4,
        }
    }

    pub fn from_tag(tag: u8) -> Option<Platform> {
        Platform::ALL.into_iter().find(|p| p.tag() == tag)
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Platform {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Platform::ALL
            .into_iter()
            .find(|p| p.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| ParseEnumError {
                kind: "platform",
                value: s.to_string(),
            })
    }
}

/// An event as it arrives on the wire, before validation.
///
/// Every field is optional so that missing mandatory fields surface as
/// validation failures instead of decode failures.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawEvent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Uuid>,
    #[serde(default)]
    pub campaign_id: Option<Uuid>,
    #[serde(default)]
    pub platform: Option<Platform>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_type: Option<String>,
    #[serde(default)]
    pub impressions: i64,
    #[serde(default)]
    pub clicks: i64,
    #[serde(default)]
    pub conversions: i64,
    #[serde(default)]
    pub spend: f64,
    #[serde(default)]
    pub revenue: f64,
    #[serde(default)]
    pub event_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub currency: Option<String>,
    #[serde(default, alias = "dedup_key")]
    pub deduplication_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub received_at: Option<DateTime<Utc>>,
}

/// A validated event. Immutable once appended to the event log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub id: Uuid,
    pub campaign_id: Uuid,
    pub platform: Platform,
    pub event_type: String,
    pub impressions: i64,
    pub clicks: i64,
    pub conversions: i64,
    pub spend: f64,
    pub revenue: f64,
    pub event_time: DateTime<Utc>,
    pub region: String,
    pub currency: String,
    pub deduplication_key: String,
    pub received_at: DateTime<Utc>,
    /// Stamped right before the append; doubles as the event log's write version.
    pub processed_at: Option<DateTime<Utc>>,
}

impl Event {
    pub fn bucket(&self) -> BucketKey {
        BucketKey {
            campaign_id: self.campaign_id,
            date: self.event_time.date_naive(),
            platform: self.platform,
            region: self.region.clone(),
        }
    }
}

/// Identity of one aggregate row.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BucketKey {
    pub campaign_id: Uuid,
    pub date: NaiveDate,
    pub platform: Platform,
    pub region: String,
}

/// Rollup of every event sharing `(campaign_id, date, platform, region)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateRow {
    pub campaign_id: Uuid,
    pub date: NaiveDate,
    pub platform: Platform,
    pub region: String,
    pub impressions: i64,
    pub clicks: i64,
    pub conversions: i64,
    pub spend: f64,
    pub revenue: f64,
    pub ctr: f64,
    pub cpc: f64,
    pub cpa: f64,
    pub roas: f64,
    pub conversion_rate: f64,
    pub updated_at: DateTime<Utc>,
}

impl AggregateRow {
    pub fn bucket(&self) -> BucketKey {
        BucketKey {
            campaign_id: self.campaign_id,
            date: self.date,
            platform: self.platform,
            region: self.region.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Granularity {
    #[default]
    Daily,
    Weekly,
    Monthly,
}

impl Granularity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Granularity::Daily => "daily",
            Granularity::Weekly => "weekly",
            Granularity::Monthly => "monthly",
        }
    }
}

impl fmt::Display for Granularity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Granularity {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "" | "daily" => Ok(Granularity::Daily),
            "weekly" => Ok(Granularity::Weekly),
            "monthly" => Ok(Granularity::Monthly),
            _ => Err(ParseEnumError {
                kind: "granularity",
                value: s.to_string(),
            }),
        }
    }
}

/// Filters for an insights query. Unset dates are resolved against "today".
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InsightsParams {
    pub campaign_id: Option<Uuid>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub platform: Option<Platform>,
    pub region: Option<String>,
    #[serde(default)]
    pub granularity: Granularity,
}

/// An [`InsightsParams`] with both ends of the date range filled in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedParams {
    pub campaign_id: Option<Uuid>,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub platform: Option<Platform>,
    pub region: Option<String>,
    pub granularity: Granularity,
}
