use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::{Deserialize, Deserializer};
use tracing::debug;

use crate::error::PlatformError;
use crate::platforms::{
    bearer, daily_event, de_f64, de_i64, parse_date, read_json, DailyStats, PlatformClient,
};
use crate::types::{Platform, RawEvent};

const INSIGHT_FIELDS: &str = "campaign_id,impressions,clicks,actions,spend,action_values";

/// Meta (Facebook) Marketing API insights, one row per day.
pub struct MetaClient {
    http: Client,
    api_url: String,
    access_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct InsightsResponse {
    #[serde(default)]
    data: Vec<InsightsRow>,
}

#[derive(Debug, Deserialize)]
struct InsightsRow {
    date_start: String,
    #[serde(default, deserialize_with = "de_i64")]
    impressions: i64,
    #[serde(default, deserialize_with = "de_i64")]
    clicks: i64,
    #[serde(default, rename = "actions", deserialize_with = "de_action_total")]
    conversions: f64,
    #[serde(default, deserialize_with = "de_f64")]
    spend: f64,
    #[serde(default, rename = "action_values", deserialize_with = "de_action_total")]
    revenue: f64,
}

#[derive(Debug, Deserialize)]
struct ActionValue {
    #[serde(default, deserialize_with = "de_f64")]
    value: f64,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ActionTotal {
    Breakdown(Vec<ActionValue>),
    #[serde(deserialize_with = "de_f64")]
    Total(f64),
}

// `actions` and `action_values` come either as a per-action-type breakdown or a plain total
fn de_action_total<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
    Ok(match ActionTotal::deserialize(deserializer)? {
        ActionTotal::Breakdown(actions) => actions.iter().map(|a| a.value).sum(),
        ActionTotal::Total(total) => total,
    })
}

impl MetaClient {
    pub fn new(http: Client, api_url: String, access_token: Option<String>) -> Self {
        Self {
            http,
            api_url: api_url.trim_end_matches('/').to_string(),
            access_token,
        }
    }
}

#[async_trait]
impl PlatformClient for MetaClient {
    fn platform(&self) -> Platform {
        Platform::Meta
    }

    async fn fetch_data(
        &self,
        external_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<RawEvent>, PlatformError> {
        let url = format!("{}/act_{}/insights", self.api_url, external_id);
        let time_range = format!(
            r#"{{"since":"{}","until":"{}"}}"#,
            start.format("%Y-%m-%d"),
            end.format("%Y-%m-%d")
        );

        let request = self.http.get(&url).query(&[
            ("time_range", time_range.as_str()),
            ("time_increment", "1"),
            ("level", "campaign"),
            ("fields", INSIGHT_FIELDS),
        ]);
        let response = bearer(request, self.access_token.as_deref()).send().await?;
        let body: InsightsResponse = read_json(Platform::Meta, response).await?;
        debug!(external_id, rows = body.data.len(), "fetched meta insights");

        let received_at = Utc::now();
        body.data
            .into_iter()
            .map(|row| -> Result<RawEvent, PlatformError> {
                let stats = DailyStats {
                    date: parse_date(Platform::Meta, &row.date_start)?,
                    impressions: row.impressions,
                    clicks: row.clicks,
                    conversions: row.conversions.round() as i64,
                    spend: row.spend,
                    revenue: row.revenue,
                };
                Ok(daily_event(Platform::Meta, external_id, stats, received_at))
            })
            .collect()
    }
}
