use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use crate::error::PlatformError;
use crate::platforms::{
    daily_event, de_f64, de_i64, parse_date, read_json, DailyStats, PlatformClient,
};
use crate::types::{Platform, RawEvent};

const REPORT_METRICS: [&str; 5] = [
    "impressions",
    "clicks",
    "conversion",
    "spend",
    "total_complete_payment_rate",
];

/// TikTok Business API integrated report, daily by campaign.
///
/// TikTok authenticates with an `Access-Token` header rather than a bearer
/// token and signals failures through `code` in a 200 response.
pub struct TiktokClient {
    http: Client,
    api_url: String,
    access_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ReportResponse {
    code: i64,
    #[serde(default)]
    message: String,
    data: Option<ReportData>,
}

#[derive(Debug, Deserialize)]
struct ReportData {
    #[serde(default)]
    list: Vec<ReportRow>,
}

#[derive(Debug, Deserialize)]
struct ReportRow {
    dimensions: Dimensions,
    #[serde(default)]
    metrics: ReportMetrics,
}

#[derive(Debug, Deserialize)]
struct Dimensions {
    stat_time_day: String,
}

#[derive(Debug, Default, Deserialize)]
struct ReportMetrics {
    #[serde(default, deserialize_with = "de_i64")]
    impressions: i64,
    #[serde(default, deserialize_with = "de_i64")]
    clicks: i64,
    #[serde(default, deserialize_with = "de_i64")]
    conversion: i64,
    #[serde(default, deserialize_with = "de_f64")]
    spend: f64,
    #[serde(default, deserialize_with = "de_f64")]
    total_complete_payment_rate: f64,
}

impl TiktokClient {
    pub fn new(http: Client, api_url: String, access_token: Option<String>) -> Self {
        Self {
            http,
            api_url: api_url.trim_end_matches('/').to_string(),
            access_token,
        }
    }
}

#[async_trait]
impl PlatformClient for TiktokClient {
    fn platform(&self) -> Platform {
        Platform::Tiktok
    }

    async fn fetch_data(
        &self,
        external_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<RawEvent>, PlatformError> {
        let dimensions = json!(["campaign_id", "stat_time_day"]).to_string();
        let metrics = json!(REPORT_METRICS).to_string();
        let filtering = json!([{
            "field_name": "campaign_ids",
            "filter_type": "IN",
            "filter_value": json!([external_id]).to_string(),
        }])
        .to_string();
        let start_date = start.format("%Y-%m-%d").to_string();
        let end_date = end.format("%Y-%m-%d").to_string();

        let mut request = self
            .http
            .get(format!("{}/report/integrated/get/", self.api_url))
            .query(&[
                ("report_type", "BASIC"),
                ("data_level", "AUCTION_CAMPAIGN"),
                ("dimensions", dimensions.as_str()),
                ("metrics", metrics.as_str()),
                ("filtering", filtering.as_str()),
                ("start_date", start_date.as_str()),
                ("end_date", end_date.as_str()),
            ]);
        if let Some(token) = self.access_token.as_deref() {
            request = request.header("Access-Token", token);
        }

        let response = request.send().await?;
        let body: ReportResponse = read_json(Platform::Tiktok, response).await?;
        if body.code != 0 {
            return Err(PlatformError::InvalidResponse {
                platform: Platform::Tiktok,
                message: format!("code {}: {}", body.code, body.message),
            });
        }

        let rows = body.data.map(|d| d.list).unwrap_or_default();
        debug!(external_id, rows = rows.len(), "fetched tiktok report");

        let received_at = Utc::now();
        rows.into_iter()
            .map(|row| -> Result<RawEvent, PlatformError> {
                let stats = DailyStats {
                    date: parse_date(Platform::Tiktok, &row.dimensions.stat_time_day)?,
                    impressions: row.metrics.impressions,
                    clicks: row.metrics.clicks,
                    conversions: row.metrics.conversion,
                    spend: row.metrics.spend,
                    revenue: row.metrics.total_complete_payment_rate,
                };
                Ok(daily_event(Platform::Tiktok, external_id, stats, received_at))
            })
            .collect()
    }
}
