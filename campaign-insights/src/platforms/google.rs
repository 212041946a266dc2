use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use crate::error::PlatformError;
use crate::platforms::{
    bearer, daily_event, de_f64, de_i64, parse_date, read_json, DailyStats, PlatformClient,
};
use crate::types::{Platform, RawEvent};

const MICROS_PER_UNIT: f64 = 1_000_000.0;

/// Google Ads reporting through `googleAds:searchStream`.
pub struct GoogleClient {
    http: Client,
    api_url: String,
    access_token: Option<String>,
}

// searchStream answers with an array of result batches
#[derive(Debug, Deserialize)]
struct StreamBatch {
    #[serde(default)]
    results: Vec<SearchRow>,
}

#[derive(Debug, Deserialize)]
struct SearchRow {
    segments: Segments,
    #[serde(default)]
    metrics: Metrics,
}

#[derive(Debug, Deserialize)]
struct Segments {
    date: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Metrics {
    #[serde(default, deserialize_with = "de_i64")]
    impressions: i64,
    #[serde(default, deserialize_with = "de_i64")]
    clicks: i64,
    #[serde(default, deserialize_with = "de_f64")]
    conversions: f64,
    #[serde(default, deserialize_with = "de_i64")]
    cost_micros: i64,
    #[serde(default, deserialize_with = "de_f64")]
    conversions_value: f64,
}

impl GoogleClient {
    pub fn new(http: Client, api_url: String, access_token: Option<String>) -> Self {
        Self {
            http,
            api_url: api_url.trim_end_matches('/').to_string(),
            access_token,
        }
    }

    fn query(external_id: &str, start: DateTime<Utc>, end: DateTime<Utc>) -> String {
        format!(
            "SELECT segments.date, metrics.impressions, metrics.clicks, metrics.conversions, \
             metrics.cost_micros, metrics.conversions_value FROM campaign \
             WHERE campaign.id = {} AND segments.date BETWEEN '{}' AND '{}'",
            external_id,
            start.format("%Y-%m-%d"),
            end.format("%Y-%m-%d")
        )
    }
}

#[async_trait]
impl PlatformClient for GoogleClient {
    fn platform(&self) -> Platform {
        Platform::Google
    }

    async fn fetch_data(
        &self,
        external_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<RawEvent>, PlatformError> {
        // Google campaign ids are numeric; anything else would be spliced into GAQL
        if external_id.is_empty() || !external_id.chars().all(|c| c.is_ascii_digit()) {
            return Err(PlatformError::InvalidResponse {
                platform: Platform::Google,
                message: format!("campaign id {external_id:?} is not numeric"),
            });
        }

        let url = format!("{}/customers/{}/googleAds:searchStream", self.api_url, external_id);
        let request = self
            .http
            .post(&url)
            .json(&json!({ "query": Self::query(external_id, start, end) }));
        let response = bearer(request, self.access_token.as_deref()).send().await?;
        let batches: Vec<StreamBatch> = read_json(Platform::Google, response).await?;

        let received_at = Utc::now();
        let events = batches
            .into_iter()
            .flat_map(|batch| batch.results)
            .map(|row| -> Result<RawEvent, PlatformError> {
                let stats = DailyStats {
                    date: parse_date(Platform::Google, &row.segments.date)?,
                    impressions: row.metrics.impressions,
                    clicks: row.metrics.clicks,
                    conversions: row.metrics.conversions.round() as i64,
                    spend: row.metrics.cost_micros as f64 / MICROS_PER_UNIT,
                    revenue: row.metrics.conversions_value,
                };
                Ok(daily_event(Platform::Google, external_id, stats, received_at))
            })
            .collect::<Result<Vec<_>, PlatformError>>()?;

        debug!(external_id, rows = events.len(), "fetched google ads stats");
        Ok(events)
    }
}
