use std::time::Duration;

use async_trait::async_trait;
use rdkafka::message::{Header, OwnedHeaders};
use rdkafka::producer::{FutureProducer, FutureRecord};

use crate::error::SourceError;
use crate::kafka::source::SourceMessage;

const ENQUEUE_TIMEOUT: Duration = Duration::from_secs(5);

/// Destination for messages that can never be processed.
#[async_trait]
pub trait DeadLetterSink: Send + Sync {
    async fn send(&self, message: &SourceMessage, reason: &str) -> Result<(), SourceError>;
}

pub struct KafkaDeadLetterSink {
    producer: FutureProducer,
    topic: String,
}

impl KafkaDeadLetterSink {
    pub fn new(producer: FutureProducer, topic: String) -> Self {
        Self { producer, topic }
    }
}

pub(crate) fn dead_letter_headers(message: &SourceMessage, reason: &str) -> OwnedHeaders {
    let partition = message.position.partition.to_string();
    let offset = message.position.offset.to_string();

    OwnedHeaders::new()
        .insert(Header {
            key: "error_reason",
            value: Some(reason),
        })
        .insert(Header {
            key: "source_topic",
            value: Some(message.position.topic.as_str()),
        })
        .insert(Header {
            key: "source_partition",
            value: Some(partition.as_str()),
        })
        .insert(Header {
            key: "source_offset",
            value: Some(offset.as_str()),
        })
}

#[async_trait]
impl DeadLetterSink for KafkaDeadLetterSink {
    async fn send(&self, message: &SourceMessage, reason: &str) -> Result<(), SourceError> {
        let payload = message.payload.as_deref().unwrap_or_default();
        let mut record = FutureRecord::<[u8], [u8]>::to(&self.topic)
            .payload(payload)
            .headers(dead_letter_headers(message, reason));
        if let Some(key) = message.key.as_deref() {
            record = record.key(key);
        }

        self.producer
            .send(record, ENQUEUE_TIMEOUT)
            .await
            .map(|_| ())
            .map_err(|(e, _)| SourceError::DeadLetter(e.to_string()))
    }
}
