use rdkafka::config::ClientConfig;
use rdkafka::error::KafkaError;
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::util::Timeout;
use serde::Serialize;
use std::time::Duration;
use tracing::debug;

#[derive(Debug, thiserror::Error)]
pub enum EventError {
    #[error("event could not be encoded: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("event not delivered: {0}")]
    Delivery(#[from] KafkaError),
}

/// Publishes seat changes and order events as JSON.
///
/// Records are keyed by seat id or order id, so one seat's history stays in
/// order on a single partition.
#[derive(Clone)]
pub struct EventProducer {
    producer: FutureProducer,
    queue_timeout: Duration,
}

impl EventProducer {
    pub fn new(brokers: &str) -> Result<Self, KafkaError> {
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", brokers)
            .set("client.id", "turnstile")
            .set("enable.idempotence", "true")
            .set("message.timeout.ms", "5000")
            .create()?;

        Ok(Self {
            producer,
            queue_timeout: Duration::from_millis(500),
        })
    }

    pub async fn send<T: Serialize>(&self, topic: &str, key: &str, event: &T) -> Result<(), EventError> {
        let payload = serde_json::to_vec(event)?;
        let record = FutureRecord::to(topic).key(key).payload(&payload);

        let delivery = self
            .producer
            .send(record, Timeout::After(self.queue_timeout))
            .await
            .map_err(|(e, _)| e)?;
        debug!("{} {} -> partition {} offset {}", topic, key, delivery.partition, delivery.offset);
        Ok(())
    }
}
