use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use metrics::counter;
use rdkafka::producer::{FutureProducer, FutureRecord};
use tracing::{error, info};
use uuid::Uuid;

use crate::aggregation::engine::DEFAULT_LOOKBACK_DAYS;
use crate::error::{FetchError, PublishError};
use crate::metrics_consts::{EVENTS_PUBLISHED_COUNTER, PLATFORM_ERRORS_COUNTER};
use crate::platforms::PlatformClients;
use crate::types::{Platform, RawEvent};

/// Sink for freshly fetched events. Results come back in input order.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, events: Vec<RawEvent>) -> Vec<Result<(), PublishError>>;
}

/// Produces events as JSON onto the ingestion topic, keyed by campaign id so
/// a campaign's events share a partition.
pub struct KafkaEventPublisher {
    producer: FutureProducer,
    topic: String,
}

impl KafkaEventPublisher {
    pub fn new(producer: FutureProducer, topic: String) -> Self {
        Self { producer, topic }
    }
}

#[async_trait]
impl EventPublisher for KafkaEventPublisher {
    async fn publish(&self, events: Vec<RawEvent>) -> Vec<Result<(), PublishError>> {
        let mut results = Vec::with_capacity(events.len());
        let mut handles = Vec::new();

        for (index, event) in events.into_iter().enumerate() {
            let key = event.campaign_id.map(|id| id.to_string());
            let payload = match serde_json::to_string(&event) {
                Ok(p) => p,
                Err(e) => {
                    results.push((index, Err(PublishError::Serialization(e))));
                    continue;
                }
            };

            let record = FutureRecord {
                topic: &self.topic,
                key: key.as_deref(),
                payload: Some(&payload),
                timestamp: None,
                partition: None,
                headers: None,
            };

            match self.producer.send_result(record) {
                Ok(delivery) => handles.push((index, delivery)),
                Err((e, _)) => results.push((index, Err(PublishError::Kafka(e)))),
            }
        }

        for (index, delivery) in handles {
            let result = match delivery.await {
                Ok(Ok(_)) => Ok(()),
                Ok(Err((e, _))) => Err(PublishError::Kafka(e)),
                Err(_) => Err(PublishError::Canceled),
            };
            results.push((index, result));
        }

        results.sort_by_key(|(index, _)| *index);
        results.into_iter().map(|(_, r)| r).collect()
    }
}

/// The platform-side identity of one internal campaign.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CampaignRef {
    pub id: Uuid,
    pub platform: Platform,
    pub external_id: String,
    pub start_date: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FetchSummary {
    pub fetched: usize,
    pub published: usize,
    pub failed: usize,
}

/// Pulls a campaign's recent stats from its platform and feeds them into
/// the ingestion topic.
pub struct CampaignFetcher {
    clients: PlatformClients,
    publisher: Arc<dyn EventPublisher>,
    lookback: Duration,
}

impl CampaignFetcher {
    pub fn new(clients: PlatformClients, publisher: Arc<dyn EventPublisher>) -> Self {
        Self {
            clients,
            publisher,
            lookback: Duration::days(DEFAULT_LOOKBACK_DAYS as i64),
        }
    }

    pub async fn fetch_data(&self, campaign: &CampaignRef) -> Result<FetchSummary, FetchError> {
        self.fetch_data_at(campaign, Utc::now()).await
    }

    /// Fetch `[max(now - lookback, campaign start), now]` and publish every
    /// event. Individual publish failures are logged and skipped; the call
    /// only fails when the platform fetch fails or nothing could be published.
    pub async fn fetch_data_at(
        &self,
        campaign: &CampaignRef,
        now: DateTime<Utc>,
    ) -> Result<FetchSummary, FetchError> {
        let platform = campaign.platform;
        let client = self.clients.get(platform)?;
        let start = (now - self.lookback).max(campaign.start_date);

        let mut events = match client.fetch_data(&campaign.external_id, start, now).await {
            Ok(events) => events,
            Err(e) => {
                counter!(PLATFORM_ERRORS_COUNTER, "platform" => platform.as_str()).increment(1);
                error!(
                    campaign_id = %campaign.id,
                    platform = %platform,
                    error = ?e,
                    "failed to fetch platform data"
                );
                return Err(e.into());
            }
        };
        for event in &mut events {
            event.campaign_id = Some(campaign.id);
        }

        let mut summary = FetchSummary {
            fetched: events.len(),
            ..Default::default()
        };
        let mut last_error = None;
        for result in self.publisher.publish(events).await {
            match result {
                Ok(()) => {
                    summary.published += 1;
                    counter!(
                        EVENTS_PUBLISHED_COUNTER,
                        "platform" => platform.as_str(),
                        "status" => "ok"
                    )
                    .increment(1);
                }
                Err(e) => {
                    summary.failed += 1;
                    counter!(
                        EVENTS_PUBLISHED_COUNTER,
                        "platform" => platform.as_str(),
                        "status" => "error"
                    )
                    .increment(1);
                    error!(campaign_id = %campaign.id, error = ?e, "failed to publish event");
                    last_error = Some(e);
                }
            }
        }

        if summary.published == 0 {
            if let Some(e) = last_error {
                return Err(e.into());
            }
        }

        info!(
            campaign_id = %campaign.id,
            platform = %platform,
            fetched = summary.fetched,
            published = summary.published,
            "fetched campaign data"
        );
        Ok(summary)
    }
}
