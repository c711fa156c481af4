//! Kafka-backed event bus
//!
//! Producer side keys every record by user id, which pins a user's events to
//! one partition and gives them total order. Consumer side opens one consumer
//! group per subscribing instance, so every instance sees the full stream.

use super::{EventBus, EventSubscription, PresenceEvent, PRESENCE_TOPIC};
use crate::{Error, Result};
use async_trait::async_trait;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{Consumer, StreamConsumer};
use rdkafka::message::Message;
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::util::Timeout;
use std::time::Duration;
use tracing::warn;

const PUBLISH_TIMEOUT: Duration = Duration::from_secs(5);

/// Event bus backed by a Kafka cluster.
pub struct KafkaBus {
    brokers: String,
    producer: FutureProducer,
}

impl KafkaBus {
    /// Create a bus against the given `host:port[,host:port...]` broker list.
    pub fn new(brokers: &str) -> Result<Self> {
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", brokers)
            .set("message.timeout.ms", "5000")
            .create()?;

        Ok(Self {
            brokers: brokers.to_string(),
            producer,
        })
    }
}

#[async_trait]
impl EventBus for KafkaBus {
    async fn publish(&self, event: &PresenceEvent) -> Result<()> {
        let payload = serde_json::to_vec(event)?;
        let record = FutureRecord::to(PRESENCE_TOPIC)
            .key(&event.user_id)
            .payload(&payload);

        self.producer
            .send(record, Timeout::After(PUBLISH_TIMEOUT))
            .await
            .map_err(|(err, _)| Error::from(err))?;
        Ok(())
    }

    async fn subscribe(&self, group_id: &str) -> Result<Box<dyn EventSubscription>> {
        let consumer: StreamConsumer = ClientConfig::new()
            .set("bootstrap.servers", &self.brokers)
            .set("group.id", group_id)
            .set("enable.auto.commit", "true")
            .set("auto.offset.reset", "latest")
            .create()?;

        consumer.subscribe(&[PRESENCE_TOPIC])?;

        Ok(Box::new(KafkaSubscription { consumer }))
    }
}

struct KafkaSubscription {
    consumer: StreamConsumer,
}

#[async_trait]
impl EventSubscription for KafkaSubscription {
    async fn next_event(&mut self) -> Result<Option<PresenceEvent>> {
        loop {
            let message = self.consumer.recv().await?;
            let Some(payload) = message.payload() else {
                warn!(
                    offset = message.offset(),
                    partition = message.partition(),
                    "presence record with empty payload, skipping"
                );
                continue;
            };
            match serde_json::from_slice::<PresenceEvent>(payload) {
                Ok(event) => return Ok(Some(event)),
                Err(err) => {
                    // At-least-once: a malformed record is logged and
                    // skipped rather than wedging the consumer loop.
                    warn!(
                        error = %err,
                        offset = message.offset(),
                        "malformed presence record, skipping"
                    );
                    continue;
                }
            }
        }
    }
}
