use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use common_redis::RedisClient;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::aggregation::AggregationEngine;
use crate::backoff::Backoff;
use crate::cache::{InsightsCache, MemoryInsightsCache, RedisInsightsCache};
use crate::config::Config;
use crate::consumer::{ConsumerLoop, ConsumerStats};
use crate::dedup::{DeduplicationStore, MemoryDeduplicationStore, RedisDeduplicationStore};
use crate::kafka::config::create_kafka_producer;
use crate::kafka::{DeadLetterSink, EventSource, KafkaDeadLetterSink, KafkaEventSource};
use crate::platforms::PlatformClients;
use crate::processor::EventProcessor;
use crate::publisher::{CampaignFetcher, KafkaEventPublisher};
use crate::store::CampaignStore;

/// All pipeline components, wired from one `Config`.
pub struct InsightsService {
    config: Config,
    store: CampaignStore,
    engine: Arc<AggregationEngine>,
    processor: Arc<EventProcessor>,
    source: Arc<dyn EventSource>,
    dead_letter: Option<Arc<dyn DeadLetterSink>>,
    fetcher: Arc<CampaignFetcher>,
}

impl InsightsService {
    pub async fn new(config: Config) -> Result<Self> {
        config.validate().with_context(|| {
            format!(
                "Configuration validation failed for consumer topic '{}' and group '{}'",
                config.kafka_consumer_topic, config.kafka_consumer_group
            )
        })?;

        let store = CampaignStore::open(&config.store_path_buf())
            .with_context(|| format!("Failed to open store at '{}'", config.store_path))?;

        let (dedup, cache) = Self::build_backends(&config).await?;
        let engine = Arc::new(AggregationEngine::new(
            store.events.clone(),
            store.aggregates.clone(),
            cache,
            config.insights_cache_ttl(),
        ));
        let processor = Arc::new(EventProcessor::new(
            dedup,
            store.events.clone(),
            engine.clone(),
            config.dedup_ttl(),
        ));

        let source: Arc<dyn EventSource> = Arc::new(
            KafkaEventSource::new(&config)
                .context("Failed to create Kafka consumer")?,
        );
        let producer = create_kafka_producer(&config).context("Failed to create Kafka producer")?;
        let dead_letter = config.dead_letter_topic.clone().map(|topic| -> Arc<dyn DeadLetterSink> {
            info!(topic = %topic, "dead letter topic configured");
            Arc::new(KafkaDeadLetterSink::new(producer.clone(), topic))
        });

        let platforms =
            PlatformClients::from_config(&config).context("Failed to build platform clients")?;
        let fetcher = Arc::new(CampaignFetcher::new(
            platforms,
            Arc::new(KafkaEventPublisher::new(
                producer,
                config.kafka_consumer_topic.clone(),
            )),
        ));

        Ok(Self {
            config,
            store,
            engine,
            processor,
            source,
            dead_letter,
            fetcher,
        })
    }

    async fn build_backends(
        config: &Config,
    ) -> Result<(Arc<dyn DeduplicationStore>, Arc<dyn InsightsCache>)> {
        match &config.redis_url {
            Some(url) => {
                let client = Arc::new(
                    RedisClient::with_config(
                        url.clone(),
                        config.redis_response_timeout(),
                        config.redis_connection_timeout(),
                    )
                    .await
                    .context("Failed to connect to Redis")?,
                );
                info!("using redis for deduplication and insights cache");
                Ok((
                    Arc::new(RedisDeduplicationStore::new(client.clone())),
                    Arc::new(RedisInsightsCache::new(client)),
                ))
            }
            None => {
                warn!("REDIS_URL not set, deduplication and insights cache are process-local");
                Ok((
                    Arc::new(MemoryDeduplicationStore::new(config.memory_cache_capacity)),
                    Arc::new(MemoryInsightsCache::new(config.memory_cache_capacity)),
                ))
            }
        }
    }

    /// Query and reaggregation entry point for the request layer.
    pub fn engine(&self) -> Arc<AggregationEngine> {
        self.engine.clone()
    }

    pub fn fetcher(&self) -> Arc<CampaignFetcher> {
        self.fetcher.clone()
    }

    pub fn consumer_loop(&self) -> ConsumerLoop {
        ConsumerLoop::new(
            self.source.clone(),
            self.processor.clone(),
            self.dead_letter.clone(),
            Backoff::new(self.config.backoff_initial(), self.config.backoff_max()),
        )
    }

    /// Run the consumer loop until `shutdown` fires, then give it up to the
    /// configured shutdown timeout to finish its current message.
    pub async fn run(self, shutdown: CancellationToken) -> Result<ConsumerStats> {
        info!(
            topic = %self.config.kafka_consumer_topic,
            store_path = %self.store.path().display(),
            "starting campaign insights service"
        );

        let mut consumer = tokio::spawn(self.consumer_loop().run(shutdown.clone()));

        let finished = tokio::select! {
            result = &mut consumer => Some(result),
            _ = shutdown.cancelled() => None,
        };

        let joined = match finished {
            Some(result) => result,
            None => {
                info!("shutdown requested, waiting for consumer loop");
                let timeout = self.config.shutdown_timeout();
                match tokio::time::timeout(timeout, consumer).await {
                    Ok(result) => result,
                    Err(_) => {
                        error!(?timeout, "consumer loop did not stop in time");
                        return Err(anyhow!("consumer loop did not stop within {timeout:?}"));
                    }
                }
            }
        };
        let stats = joined.context("consumer loop panicked")?;

        self.store.flush().context("Failed to flush store on shutdown")?;
        info!(?stats, "campaign insights service stopped");
        Ok(stats)
    }
}
