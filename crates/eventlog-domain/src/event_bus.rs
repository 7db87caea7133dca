//! Broker interface used by the relay and the consumer.
//!
//! The event bus is consumed through a narrow trait so the core stays
//! independent of the concrete broker. The relay publishes batches keyed by
//! aggregate id (per-aggregate ordering); the consumer receives messages with
//! an explicit acknowledgement handle.

use crate::outbox::OutboxEvent;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EventBusError {
    #[error("Failed to publish event: {0}")]
    PublishError(String),
    #[error("Failed to subscribe to topic: {0}")]
    SubscribeError(String),
    #[error("Serialization error: {0}")]
    SerializationError(String),
    #[error("Connection error: {0}")]
    ConnectionError(String),
}

/// A message handed to the broker by the relay.
#[derive(Debug, Clone, PartialEq)]
pub struct BrokerMessage {
    /// Destination stream name, taken from the outbox row.
    pub topic: String,
    /// Partitioning key: the aggregate id, preserving per-aggregate order.
    pub key: String,
    /// Raw envelope bytes, published untouched.
    pub payload: Vec<u8>,
    /// The outbox row's creation time.
    pub timestamp: DateTime<Utc>,
}

impl From<&OutboxEvent> for BrokerMessage {
    fn from(event: &OutboxEvent) -> Self {
        Self {
            topic: event.topic.clone(),
            key: event.aggregate_id.to_string(),
            payload: event.payload.clone(),
            timestamp: event.created_at,
        }
    }
}

/// Acknowledgement handle for a single received message.
///
/// Acking marks the message as processed with the broker (the consumer-group
/// offset commit). The dispatcher acks after every dispatch attempt,
/// including poison messages.
#[async_trait]
pub trait MessageAck: Send {
    async fn ack(self: Box<Self>) -> Result<(), EventBusError>;
}

/// A message received from the broker by the consumer.
pub struct InboundMessage {
    pub topic: String,
    pub payload: Vec<u8>,
    pub acker: Box<dyn MessageAck>,
}

impl std::fmt::Debug for InboundMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InboundMessage")
            .field("topic", &self.topic)
            .field("payload_len", &self.payload.len())
            .finish()
    }
}

/// Narrow broker interface consumed by the relay and the dispatcher.
#[async_trait]
pub trait EventBus: Send + Sync {
    /// Publish a whole batch as one call.
    ///
    /// Any failure fails the batch: the relay rolls its transaction back and
    /// retries every row on the next tick. No partial success is reported.
    async fn publish_batch(&self, messages: &[BrokerMessage]) -> Result<(), EventBusError>;

    /// Subscribe to a set of topics under a named group.
    ///
    /// Instances sharing the same `group` partition the stream between them;
    /// each message is delivered to one instance (modulo redelivery).
    async fn subscribe(
        &self,
        topics: &[String],
        group: &str,
    ) -> Result<BoxStream<'static, Result<InboundMessage, EventBusError>>, EventBusError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn test_broker_message_from_outbox_event() {
        let aggregate_id = Uuid::new_v4();
        let event = crate::outbox::OutboxEvent {
            id: Uuid::new_v4(),
            aggregate_id,
            aggregate_type: "shipments".to_string(),
            event_type: "created".to_string(),
            payload: b"{\"x\":1}".to_vec(),
            topic: "shipments".to_string(),
            created_at: Utc::now(),
        };

        let message = BrokerMessage::from(&event);
        assert_eq!(message.topic, "shipments");
        assert_eq!(message.key, aggregate_id.to_string());
        assert_eq!(message.payload, event.payload);
        assert_eq!(message.timestamp, event.created_at);
    }
}
