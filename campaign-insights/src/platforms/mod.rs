//! Thin adapters over the ad platforms' reporting APIs. Each adapter turns one
//! campaign's daily report into raw events for the ingestion topic.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer};

use crate::config::Config;
use crate::error::PlatformError;
use crate::types::{Platform, RawEvent};

pub mod google;
pub mod linkedin;
pub mod meta;
pub mod tiktok;

pub use google::GoogleClient;
pub use linkedin::LinkedinClient;
pub use meta::MetaClient;
pub use tiktok::TiktokClient;

pub const DAILY_STATS_EVENT_TYPE: &str = "daily_stats";
pub const PLATFORM_REGION: &str = "all";
pub const PLATFORM_CURRENCY: &str = "USD";

#[async_trait]
pub trait PlatformClient: Send + Sync {
    fn platform(&self) -> Platform;

    /// Daily stats for the platform-side campaign `external_id` covering
    /// `[start, end]`. Returned events carry no campaign id; the caller owns
    /// the mapping to the internal campaign.
    async fn fetch_data(
        &self,
        external_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<RawEvent>, PlatformError>;
}

#[derive(Default, Clone)]
pub struct PlatformClients {
    clients: HashMap<Platform, Arc<dyn PlatformClient>>,
}

impl PlatformClients {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(config: &Config) -> Result<Self, PlatformError> {
        let http = Client::builder()
            .timeout(config.platform_api_timeout())
            .user_agent(concat!("campaign-insights/", env!("CARGO_PKG_VERSION")))
            .build()?;

        let mut clients = Self::new();
        clients.register(Arc::new(MetaClient::new(
            http.clone(),
            config.meta_api_url.clone(),
            config.meta_access_token.clone(),
        )));
        clients.register(Arc::new(GoogleClient::new(
            http.clone(),
            config.google_api_url.clone(),
            config.google_access_token.clone(),
        )));
        clients.register(Arc::new(LinkedinClient::new(
            http.clone(),
            config.linkedin_api_url.clone(),
            config.linkedin_access_token.clone(),
        )));
        clients.register(Arc::new(TiktokClient::new(
            http,
            config.tiktok_api_url.clone(),
            config.tiktok_access_token.clone(),
        )));
        Ok(clients)
    }

    pub fn register(&mut self, client: Arc<dyn PlatformClient>) {
        self.clients.insert(client.platform(), client);
    }

    pub fn get(&self, platform: Platform) -> Result<Arc<dyn PlatformClient>, PlatformError> {
        self.clients
            .get(&platform)
            .cloned()
            .ok_or(PlatformError::UnknownPlatform(platform))
    }

    pub fn platforms(&self) -> Vec<Platform> {
        let mut platforms: Vec<Platform> = self.clients.keys().copied().collect();
        platforms.sort();
        platforms
    }
}

/// One day of campaign totals as reported by a platform.
#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct DailyStats {
    pub date: NaiveDate,
    pub impressions: i64,
    pub clicks: i64,
    pub conversions: i64,
    pub spend: f64,
    pub revenue: f64,
}

pub fn dedup_key(platform: Platform, external_id: &str, date: NaiveDate) -> String {
    format!("{}:{}:{}", platform, external_id, date.format("%Y-%m-%d"))
}

pub(crate) fn daily_event(
    platform: Platform,
    external_id: &str,
    stats: DailyStats,
    received_at: DateTime<Utc>,
) -> RawEvent {
    RawEvent {
        id: None,
        campaign_id: None,
        platform: Some(platform),
        event_type: Some(DAILY_STATS_EVENT_TYPE.to_string()),
        impressions: stats.impressions,
        clicks: stats.clicks,
        conversions: stats.conversions,
        spend: stats.spend,
        revenue: stats.revenue,
        event_time: stats.date.and_hms_opt(0, 0, 0).map(|t| t.and_utc()),
        region: Some(PLATFORM_REGION.to_string()),
        currency: Some(PLATFORM_CURRENCY.to_string()),
        deduplication_key: Some(dedup_key(platform, external_id, stats.date)),
        received_at: Some(received_at),
    }
}

pub(crate) fn parse_date(platform: Platform, value: &str) -> Result<NaiveDate, PlatformError> {
    // Some APIs append a time component to daily rows
    let day = value.get(..10).unwrap_or(value);
    NaiveDate::parse_from_str(day, "%Y-%m-%d").map_err(|e| PlatformError::InvalidResponse {
        platform,
        message: format!("bad date {value:?}: {e}"),
    })
}

pub(crate) async fn read_json<T: DeserializeOwned>(
    platform: Platform,
    response: reqwest::Response,
) -> Result<T, PlatformError> {
    let status = response.status();
    if !status.is_success() {
        return Err(PlatformError::Status {
            platform,
            status: status.as_u16(),
        });
    }

    let body = response.bytes().await?;
    serde_json::from_slice(&body).map_err(|e| PlatformError::InvalidResponse {
        platform,
        message: e.to_string(),
    })
}

pub(crate) fn bearer(
    request: reqwest::RequestBuilder,
    token: Option<&str>,
) -> reqwest::RequestBuilder {
    match token {
        Some(token) => request.bearer_auth(token),
        None => request,
    }
}

// Reporting APIs disagree on whether metrics are JSON numbers or strings.
#[derive(Deserialize)]
#[serde(untagged)]
enum Numeric {
    Int(i64),
    Float(f64),
    Text(String),
}

impl Numeric {
    fn into_f64<E: serde::de::Error>(self) -> Result<f64, E> {
        match self {
            Numeric::Int(v) => Ok(v as f64),
            Numeric::Float(v) => Ok(v),
            Numeric::Text(s) if s.trim().is_empty() => Ok(0.0),
            Numeric::Text(s) => s.trim().parse::<f64>().map_err(E::custom),
        }
    }
}

pub(crate) fn de_i64<'de, D: Deserializer<'de>>(deserializer: D) -> Result<i64, D::Error> {
    match Numeric::deserialize(deserializer)? {
        Numeric::Int(v) => Ok(v),
        other => other.into_f64().map(|v| v.round() as i64),
    }
}

pub(crate) fn de_f64<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
    Numeric::deserialize(deserializer)?.into_f64()
}
