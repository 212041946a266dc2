use std::time::Duration;

use rdkafka::error::KafkaError;
use rdkafka::producer::{FutureProducer, Producer};
use rdkafka::ClientConfig;
use tracing::{debug, error, info};

use crate::config::Config;

fn base_client_config(config: &Config) -> ClientConfig {
    let mut client_config = ClientConfig::new();
    client_config
        .set("bootstrap.servers", &config.kafka_hosts)
        .set("statistics.interval.ms", "10000");

    if config.kafka_tls {
        client_config
            .set("security.protocol", "ssl")
            .set("enable.ssl.certificate.verification", "false");
    };

    client_config
}

/// Manual commits only: offsets move after an event is durably stored.
pub fn consumer_client_config(config: &Config) -> ClientConfig {
    let mut client_config = base_client_config(config);
    client_config
        .set("group.id", &config.kafka_consumer_group)
        .set("enable.auto.commit", "false")
        .set("enable.auto.offset.store", "false")
        .set("auto.offset.reset", &config.kafka_consumer_offset_reset)
        .set("enable.partition.eof", "false");
    client_config
}

pub fn producer_client_config(config: &Config) -> ClientConfig {
    let mut client_config = base_client_config(config);
    client_config
        .set("message.timeout.ms", config.kafka_message_timeout_ms.to_string())
        .set("compression.codec", "snappy");
    client_config
}

pub fn create_kafka_producer(config: &Config) -> Result<FutureProducer, KafkaError> {
    let client_config = producer_client_config(config);
    debug!("rdkafka producer configuration: {:?}", client_config);
    let producer: FutureProducer = client_config.create()?;

    // "Ping" the brokers so a bad address fails at startup
    match producer
        .client()
        .fetch_metadata(None, Duration::from_secs(15))
    {
        Ok(metadata) => {
            info!(
                "Successfully connected to Kafka brokers. Found {} topics.",
                metadata.topics().len()
            );
        }
        Err(error) => {
            error!("Failed to fetch metadata from Kafka brokers: {:?}", error);
            return Err(error);
        }
    }

    Ok(producer)
}
