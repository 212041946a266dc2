use std::time::Duration;

use async_trait::async_trait;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::error::KafkaError;
use rdkafka::{Message, Offset, TopicPartitionList};
use tracing::info;

use crate::config::Config;
use crate::error::SourceError;
use crate::kafka::config::consumer_client_config;

const SEEK_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessagePosition {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceMessage {
    pub key: Option<Vec<u8>>,
    pub payload: Option<Vec<u8>>,
    pub position: MessagePosition,
}

/// One logical topic of serialized events. Fan-in from several topics is
/// done by running several consumer loops.
#[async_trait]
pub trait EventSource: Send + Sync {
    async fn fetch(&self) -> Result<SourceMessage, SourceError>;

    /// Acknowledge everything up to and including `position`.
    fn commit(&self, position: &MessagePosition) -> Result<(), SourceError>;

    /// Make `position` the next message delivered, so a failed message is retried.
    fn rewind(&self, position: &MessagePosition) -> Result<(), SourceError>;
}

pub struct KafkaEventSource {
    consumer: StreamConsumer,
    topic: String,
}

impl KafkaEventSource {
    pub fn new(config: &Config) -> Result<Self, KafkaError> {
        let consumer: StreamConsumer = consumer_client_config(config).create()?;
        consumer.subscribe(&[config.kafka_consumer_topic.as_str()])?;

        info!(
            topic = %config.kafka_consumer_topic,
            group_id = %config.kafka_consumer_group,
            "Kafka consumer subscribed"
        );

        Ok(Self {
            consumer,
            topic: config.kafka_consumer_topic.clone(),
        })
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }
}

#[async_trait]
impl EventSource for KafkaEventSource {
    async fn fetch(&self) -> Result<SourceMessage, SourceError> {
        let message = self.consumer.recv().await?;

        Ok(SourceMessage {
            key: message.key().map(<[u8]>::to_vec),
            payload: message.payload().map(<[u8]>::to_vec),
            position: MessagePosition {
                topic: message.topic().to_string(),
                partition: message.partition(),
                offset: message.offset(),
            },
        })
    }

    fn commit(&self, position: &MessagePosition) -> Result<(), SourceError> {
        let mut offsets = TopicPartitionList::new();
        // Kafka commits name the next offset to read
        offsets.add_partition_offset(
            &position.topic,
            position.partition,
            Offset::Offset(position.offset + 1),
        )?;
        self.consumer.commit(&offsets, CommitMode::Async)?;
        Ok(())
    }

    fn rewind(&self, position: &MessagePosition) -> Result<(), SourceError> {
        self.consumer.seek(
            &position.topic,
            position.partition,
            Offset::Offset(position.offset),
            SEEK_TIMEOUT,
        )?;
        Ok(())
    }
}
