use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use metrics::{counter, histogram};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::backoff::Backoff;
use crate::error::ProcessError;
use crate::kafka::{DeadLetterSink, EventSource, MessagePosition, SourceMessage};
use crate::metrics_consts::{
    BACKOFF_DURATION_HISTOGRAM, COMMIT_ERRORS_COUNTER, DEAD_LETTER_COUNTER, FETCH_ERRORS_COUNTER,
    MESSAGES_PROCESSED_COUNTER, MESSAGES_RECEIVED_COUNTER, MESSAGES_REJECTED_COUNTER,
    MESSAGE_PROCESSING_DURATION_HISTOGRAM,
};
use crate::processor::EventProcessor;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumerState {
    Idle,
    Fetching,
    Validating,
    Deduplicating,
    Persisting,
    Committing,
    Backoff,
}

impl fmt::Display for ConsumerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConsumerState::Idle => "idle",
            ConsumerState::Fetching => "fetching",
            ConsumerState::Validating => "validating",
            ConsumerState::Deduplicating => "deduplicating",
            ConsumerState::Persisting => "persisting",
            ConsumerState::Committing => "committing",
            ConsumerState::Backoff => "backoff",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConsumerStats {
    pub received: u64,
    pub persisted: u64,
    pub duplicates: u64,
    pub rejected: u64,
    pub dead_lettered: u64,
    pub retried: u64,
    pub fetch_errors: u64,
    pub commit_errors: u64,
}

/// Drives one event source through the processor until cancelled.
///
/// Offsets are committed only once a message is durably handled: persisted,
/// found to be a duplicate, or dead-lettered. Retryable failures rewind the
/// source and back off, so the same message is attempted again. Cancellation
/// is observed between messages and during backoff sleeps, never while a
/// message is being persisted.
pub struct ConsumerLoop {
    source: Arc<dyn EventSource>,
    processor: Arc<EventProcessor>,
    dead_letter: Option<Arc<dyn DeadLetterSink>>,
    backoff: Backoff,
    state: ConsumerState,
    stats: ConsumerStats,
}

enum Handled {
    Done,
    Retry,
}

impl ConsumerLoop {
    pub fn new(
        source: Arc<dyn EventSource>,
        processor: Arc<EventProcessor>,
        dead_letter: Option<Arc<dyn DeadLetterSink>>,
        backoff: Backoff,
    ) -> Self {
        Self {
            source,
            processor,
            dead_letter,
            backoff,
            state: ConsumerState::Idle,
            stats: ConsumerStats::default(),
        }
    }

    pub fn state(&self) -> ConsumerState {
        self.state
    }

    pub async fn run(mut self, cancel: CancellationToken) -> ConsumerStats {
        info!("consumer loop started");

        loop {
            self.transition(ConsumerState::Fetching);
            let fetched = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                fetched = self.source.fetch() => fetched,
            };

            let handled = match fetched {
                Ok(message) => self.handle_message(message).await,
                Err(e) => {
                    self.stats.fetch_errors += 1;
                    counter!(FETCH_ERRORS_COUNTER).increment(1);
                    error!(error = ?e, "failed to fetch message");
                    Handled::Retry
                }
            };

            if let Handled::Retry = handled {
                if !self.back_off(&cancel).await {
                    break;
                }
            }
            self.transition(ConsumerState::Idle);
        }

        self.transition(ConsumerState::Idle);
        info!(stats = ?self.stats, "consumer loop stopped");
        self.stats
    }

    async fn handle_message(&mut self, message: SourceMessage) -> Handled {
        let started = Instant::now();
        self.stats.received += 1;
        counter!(MESSAGES_RECEIVED_COUNTER).increment(1);

        let handled = self.process_message(&message).await;
        histogram!(MESSAGE_PROCESSING_DURATION_HISTOGRAM).record(started.elapsed().as_secs_f64());
        handled
    }

    async fn process_message(&mut self, message: &SourceMessage) -> Handled {
        self.transition(ConsumerState::Validating);
        let mut event = match self.processor.decode_and_validate(message.payload.as_deref()) {
            Ok(event) => event,
            Err(e) => return self.reject(message, e).await,
        };

        self.transition(ConsumerState::Deduplicating);
        if self.processor.is_duplicate(&event).await {
            debug!(
                dedup_key = %event.deduplication_key,
                offset = message.position.offset,
                "skipping duplicate event"
            );
            self.stats.duplicates += 1;
            counter!(MESSAGES_PROCESSED_COUNTER, "outcome" => "duplicate").increment(1);
            self.commit(&message.position);
            return Handled::Done;
        }

        self.transition(ConsumerState::Persisting);
        if let Err(e) = self.processor.persist(&mut event).await {
            if !e.is_retryable() {
                return self.reject(message, e).await;
            }
            self.stats.retried += 1;
            counter!(MESSAGES_PROCESSED_COUNTER, "outcome" => "retried").increment(1);
            error!(
                campaign_id = %event.campaign_id,
                dedup_key = %event.deduplication_key,
                error = ?e,
                "failed to persist event, will retry"
            );
            self.rewind(&message.position);
            return Handled::Retry;
        }
        self.processor.mark(&event).await;
        self.stats.persisted += 1;
        counter!(MESSAGES_PROCESSED_COUNTER, "outcome" => "persisted").increment(1);

        self.commit(&message.position);
        Handled::Done
    }

    /// Non-retryable failure. Without a dead letter sink the message is
    /// skipped and its offset left uncommitted; a later commit on the
    /// partition moves past it.
    async fn reject(&mut self, message: &SourceMessage, e: ProcessError) -> Handled {
        let reason = e.reason();
        self.stats.rejected += 1;
        counter!(MESSAGES_REJECTED_COUNTER, "reason" => reason).increment(1);
        counter!(MESSAGES_PROCESSED_COUNTER, "outcome" => "rejected").increment(1);
        warn!(
            topic = %message.position.topic,
            partition = message.position.partition,
            offset = message.position.offset,
            reason,
            error = %e,
            "dropping unprocessable message"
        );

        let Some(sink) = self.dead_letter.clone() else {
            return Handled::Done;
        };

        match sink.send(message, reason).await {
            Ok(()) => {
                self.stats.dead_lettered += 1;
                counter!(DEAD_LETTER_COUNTER).increment(1);
                self.commit(&message.position);
                Handled::Done
            }
            Err(dl_err) => {
                error!(
                    offset = message.position.offset,
                    error = ?dl_err,
                    "failed to dead-letter message, will retry"
                );
                self.rewind(&message.position);
                Handled::Retry
            }
        }
    }

    fn commit(&mut self, position: &MessagePosition) {
        self.transition(ConsumerState::Committing);
        match self.source.commit(position) {
            Ok(()) => self.backoff.reset(),
            Err(e) => {
                // The event is already stored, so reprocessing this offset is harmless
                self.stats.commit_errors += 1;
                counter!(COMMIT_ERRORS_COUNTER).increment(1);
                warn!(
                    partition = position.partition,
                    offset = position.offset,
                    error = ?e,
                    "failed to commit offset"
                );
            }
        }
    }

    fn rewind(&self, position: &MessagePosition) {
        if let Err(e) = self.source.rewind(position) {
            error!(
                partition = position.partition,
                offset = position.offset,
                error = ?e,
                "failed to rewind source"
            );
        }
    }

    /// Returns false when cancelled during the sleep.
    async fn back_off(&mut self, cancel: &CancellationToken) -> bool {
        self.transition(ConsumerState::Backoff);
        let delay = self.backoff.next_delay();
        histogram!(BACKOFF_DURATION_HISTOGRAM).record(delay.as_secs_f64());
        debug!(
            delay_ms = delay.as_millis() as u64,
            attempt = self.backoff.attempt(),
            "backing off"
        );

        tokio::select! {
            biased;
            _ = cancel.cancelled() => false,
            _ = tokio::time::sleep(delay) => true,
        }
    }

    fn transition(&mut self, next: ConsumerState) {
        if self.state != next {
            debug!(from = %self.state, to = %next, "consumer state transition");
            self.state = next;
        }
    }
}
