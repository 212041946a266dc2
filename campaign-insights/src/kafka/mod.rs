pub mod config;
pub mod dead_letter;
pub mod source;

pub use dead_letter::{DeadLetterSink, KafkaDeadLetterSink};
pub use source::{EventSource, KafkaEventSource, MessagePosition, SourceMessage};
