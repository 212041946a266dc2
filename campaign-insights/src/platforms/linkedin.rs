use async_trait::async_trait;
use chrono::{DateTime, Datelike, NaiveDate, Utc};
use reqwest::Client;
use serde::Deserialize;
use tracing::debug;

use crate::error::PlatformError;
use crate::platforms::{bearer, daily_event, de_f64, de_i64, read_json, DailyStats, PlatformClient};
use crate::types::{Platform, RawEvent};

const ANALYTICS_FIELDS: &str =
    "dateRange,impressions,clicks,externalWebsiteConversions,costInUsd,conversionValueInLocalCurrency";

/// LinkedIn Marketing API ad analytics, pivoted by campaign with daily granularity.
pub struct LinkedinClient {
    http: Client,
    api_url: String,
    access_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AnalyticsResponse {
    #[serde(default)]
    elements: Vec<AnalyticsElement>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AnalyticsElement {
    date_range: DateRange,
    #[serde(default, deserialize_with = "de_i64")]
    impressions: i64,
    #[serde(default, deserialize_with = "de_i64")]
    clicks: i64,
    #[serde(default, deserialize_with = "de_i64")]
    external_website_conversions: i64,
    #[serde(default, deserialize_with = "de_f64")]
    cost_in_usd: f64,
    #[serde(default, deserialize_with = "de_f64")]
    conversion_value_in_local_currency: f64,
}

#[derive(Debug, Deserialize)]
struct DateRange {
    start: DateParts,
}

#[derive(Debug, Deserialize)]
struct DateParts {
    year: i32,
    month: u32,
    day: u32,
}

impl DateParts {
    fn to_date(&self) -> Result<NaiveDate, PlatformError> {
        NaiveDate::from_ymd_opt(self.year, self.month, self.day).ok_or_else(|| {
            PlatformError::InvalidResponse {
                platform: Platform::Linkedin,
                message: format!("bad date {}-{}-{}", self.year, self.month, self.day),
            }
        })
    }
}

impl LinkedinClient {
    pub fn new(http: Client, api_url: String, access_token: Option<String>) -> Self {
        Self {
            http,
            api_url: api_url.trim_end_matches('/').to_string(),
            access_token,
        }
    }
}

#[async_trait]
impl PlatformClient for LinkedinClient {
    fn platform(&self) -> Platform {
        Platform::Linkedin
    }

    async fn fetch_data(
        &self,
        external_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<RawEvent>, PlatformError> {
        let campaign_urn = format!("urn:li:sponsoredCampaign:{external_id}");
        let params = [
            ("q", "analytics".to_string()),
            ("pivot", "CAMPAIGN".to_string()),
            ("timeGranularity", "DAILY".to_string()),
            ("dateRange.start.year", start.year().to_string()),
            ("dateRange.start.month", start.month().to_string()),
            ("dateRange.start.day", start.day().to_string()),
            ("dateRange.end.year", end.year().to_string()),
            ("dateRange.end.month", end.month().to_string()),
            ("dateRange.end.day", end.day().to_string()),
            ("campaigns[0]", campaign_urn),
            ("fields", ANALYTICS_FIELDS.to_string()),
        ];

        let request = self
            .http
            .get(format!("{}/adAnalytics", self.api_url))
            .query(&params);
        let response = bearer(request, self.access_token.as_deref()).send().await?;
        let body: AnalyticsResponse = read_json(Platform::Linkedin, response).await?;
        debug!(external_id, rows = body.elements.len(), "fetched linkedin analytics");

        let received_at = Utc::now();
        body.elements
            .into_iter()
            .map(|element| -> Result<RawEvent, PlatformError> {
                let stats = DailyStats {
                    date: element.date_range.start.to_date()?,
                    impressions: element.impressions,
                    clicks: element.clicks,
                    conversions: element.external_website_conversions,
                    spend: element.cost_in_usd,
                    revenue: element.conversion_value_in_local_currency,
                };
                Ok(daily_event(Platform::Linkedin, external_id, stats, received_at))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use httpmock::MockServer;

    fn client(server: &MockServer) -> LinkedinClient {
        LinkedinClient::new(Client::new(), server.url(""), Some("li-token".to_string()))
    }

    #[tokio::test]
    async fn test_fetch_reads_date_parts() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(httpmock::Method::GET)
                .path("/adAnalytics")
                .query_param("q", "analytics")
                .query_param("timeGranularity", "DAILY")
                .query_param("dateRange.start.month", "2")
                .query_param("campaigns[0]", "urn:li:sponsoredCampaign:4455")
                .header("authorization", "Bearer li-token");
            then.status(200).body(
                r#"{"elements": [
                    {"dateRange": {"start": {"year": 2024, "month": 2, "day": 29}, "end": {"year": 2024, "month": 2, "day": 29}},
                     "impressions": 800, "clicks": 30, "externalWebsiteConversions": 2, "costInUsd": "60.25", "conversionValueInLocalCurrency": "120.5"}
                ]}"#,
            );
        });

        let start = Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2024, 2, 29, 0, 0, 0).unwrap();
        let events = client(&server).fetch_data("4455", start, end).await.unwrap();

        mock.assert();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].spend, 60.25);
        assert_eq!(events[0].revenue, 120.5);
        assert_eq!(
            events[0].deduplication_key.as_deref(),
            Some("linkedin:4455:2024-02-29")
        );
    }

    #[tokio::test]
    async fn test_impossible_date_is_invalid_response() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(httpmock::Method::GET).path("/adAnalytics");
            then.status(200).body(
                r#"{"elements": [{"dateRange": {"start": {"year": 2023, "month": 2, "day": 30}}}]}"#,
            );
        });

        let now = Utc::now();
        let err = client(&server).fetch_data("1", now, now).await.unwrap_err();
        assert!(matches!(
            err,
            PlatformError::InvalidResponse {
                platform: Platform::Linkedin,
                ..
            }
        ));
    }
}
