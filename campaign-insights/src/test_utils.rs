//! In-memory stand-ins for the broker-facing traits, used by unit and
//! integration tests to drive the consumer loop without Kafka.

use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use rdkafka::error::KafkaError;
use rdkafka::types::RDKafkaErrorCode;
use serde::Serialize;

use crate::error::{PublishError, SourceError};
use crate::kafka::{DeadLetterSink, EventSource, MessagePosition, SourceMessage};
use crate::publisher::EventPublisher;
use crate::types::RawEvent;

pub const TEST_TOPIC: &str = "campaign_events";

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[derive(Default)]
struct SourceState {
    messages: Vec<SourceMessage>,
    cursor: usize,
    fetch_failures: usize,
    commit_failures: usize,
    commits: Vec<MessagePosition>,
    rewinds: Vec<MessagePosition>,
}

/// A single-partition log. `fetch` walks the log in order and then pends
/// forever, like a consumer with nothing left to read.
#[derive(Clone, Default)]
pub struct MemoryEventSource {
    state: Arc<Mutex<SourceState>>,
}

impl MemoryEventSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_payload(&self, key: Option<&[u8]>, payload: Option<Vec<u8>>) -> MessagePosition {
        let mut state = lock(&self.state);
        let position = MessagePosition {
            topic: TEST_TOPIC.to_string(),
            partition: 0,
            offset: state.messages.len() as i64,
        };
        state.messages.push(SourceMessage {
            key: key.map(<[u8]>::to_vec),
            payload,
            position: position.clone(),
        });
        position
    }

    pub fn push_json<T: Serialize>(&self, value: &T) -> MessagePosition {
        let payload = serde_json::to_vec(value).unwrap_or_default();
        self.push_payload(None, Some(payload))
    }

    /// Fail the next `count` fetches with a transport error.
    pub fn fail_next_fetches(&self, count: usize) {
        lock(&self.state).fetch_failures = count;
    }

    pub fn fail_next_commits(&self, count: usize) {
        lock(&self.state).commit_failures = count;
    }

    pub fn commits(&self) -> Vec<MessagePosition> {
        lock(&self.state).commits.clone()
    }

    pub fn committed_offsets(&self) -> Vec<i64> {
        self.commits().iter().map(|p| p.offset).collect()
    }

    pub fn rewinds(&self) -> Vec<MessagePosition> {
        lock(&self.state).rewinds.clone()
    }

    /// Messages handed out and not rewound.
    pub fn delivered(&self) -> usize {
        lock(&self.state).cursor
    }

    pub fn is_drained(&self) -> bool {
        let state = lock(&self.state);
        state.cursor >= state.messages.len()
    }
}

#[async_trait]
impl EventSource for MemoryEventSource {
    async fn fetch(&self) -> Result<SourceMessage, SourceError> {
        let next = {
            let mut state = lock(&self.state);
            if state.fetch_failures > 0 {
                state.fetch_failures -= 1;
                return Err(SourceError::Kafka(KafkaError::MessageConsumption(
                    RDKafkaErrorCode::BrokerTransportFailure,
                )));
            }
            let next = state.messages.get(state.cursor).cloned();
            if next.is_some() {
                state.cursor += 1;
            }
            next
        };

        match next {
            Some(message) => Ok(message),
            None => futures::future::pending().await,
        }
    }

    fn commit(&self, position: &MessagePosition) -> Result<(), SourceError> {
        let mut state = lock(&self.state);
        if state.commit_failures > 0 {
            state.commit_failures -= 1;
            return Err(SourceError::Kafka(KafkaError::ConsumerCommit(
                RDKafkaErrorCode::RequestTimedOut,
            )));
        }
        state.commits.push(position.clone());
        Ok(())
    }

    fn rewind(&self, position: &MessagePosition) -> Result<(), SourceError> {
        let mut state = lock(&self.state);
        if let Some(index) = state.messages.iter().position(|m| &m.position == position) {
            state.cursor = index;
        }
        state.rewinds.push(position.clone());
        Ok(())
    }
}

/// Publishing into the source closes the fetch -> topic -> consumer loop in tests.
#[async_trait]
impl EventPublisher for MemoryEventSource {
    async fn publish(&self, events: Vec<RawEvent>) -> Vec<Result<(), PublishError>> {
        events
            .into_iter()
            .map(|event| -> Result<(), PublishError> {
                let key = event.campaign_id.map(|id| id.to_string());
                let payload = serde_json::to_vec(&event)?;
                self.push_payload(key.as_deref().map(str::as_bytes), Some(payload));
                Ok(())
            })
            .collect()
    }
}

#[derive(Clone, Default)]
pub struct MemoryDeadLetterSink {
    sent: Arc<Mutex<Vec<(SourceMessage, String)>>>,
    failures: Arc<Mutex<usize>>,
}

impl MemoryDeadLetterSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_next_sends(&self, count: usize) {
        *lock(&self.failures) = count;
    }

    pub fn sent(&self) -> Vec<(SourceMessage, String)> {
        lock(&self.sent).clone()
    }
}

#[async_trait]
impl DeadLetterSink for MemoryDeadLetterSink {
    async fn send(&self, message: &SourceMessage, reason: &str) -> Result<(), SourceError> {
        {
            let mut failures = lock(&self.failures);
            if *failures > 0 {
                *failures -= 1;
                return Err(SourceError::DeadLetter("dead letter topic unavailable".to_string()));
            }
        }
        lock(&self.sent).push((message.clone(), reason.to_string()));
        Ok(())
    }
}
