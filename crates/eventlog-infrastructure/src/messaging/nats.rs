//! NATS JetStream EventBus implementation.
//!
//! Durable, at-least-once transport for outbox events. Each topic becomes a
//! work-queue stream; the outbox row's aggregate id becomes the last subject
//! token, so all events of one aggregate share a subject and keep their
//! relative order. Consumer groups map to durable pull consumers: instances
//! sharing a group name share one consumer and split the messages.

use async_nats::jetstream::consumer::pull::Config as PullConsumerConfig;
use async_nats::jetstream::consumer::{AckPolicy, DeliverPolicy, PullConsumer};
use async_nats::jetstream::stream::Config as StreamConfig;
use async_nats::jetstream::Context as JetStreamContext;
use async_nats::{Client, ConnectOptions};
use async_trait::async_trait;
use chrono::Utc;
use eventlog_domain::event_bus::{
    BrokerMessage, EventBus, EventBusError, InboundMessage, MessageAck,
};
use futures::stream::{BoxStream, SelectAll, StreamExt};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, instrument, warn};

/// NATS connection configuration with production defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NatsConfig {
    /// NATS server URLs
    #[serde(default = "default_urls")]
    pub urls: Vec<String>,
    /// Connection timeout in seconds
    #[serde(default = "default_connect_timeout")]
    pub connection_timeout_secs: u64,
    /// Request timeout in seconds (None = no timeout)
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: Option<u64>,
    /// Max reconnection attempts (None = infinite)
    #[serde(default = "default_max_reconnects")]
    pub max_reconnects: Option<usize>,
    /// Client connection name
    #[serde(default)]
    pub name: Option<String>,
}

impl Default for NatsConfig {
    fn default() -> Self {
        Self {
            urls: default_urls(),
            connection_timeout_secs: default_connect_timeout(),
            request_timeout_secs: default_request_timeout(),
            max_reconnects: default_max_reconnects(),
            name: None,
        }
    }
}

fn default_urls() -> Vec<String> {
    vec!["nats://localhost:4222".to_string()]
}

const fn default_connect_timeout() -> u64 {
    5
}

fn default_request_timeout() -> Option<u64> {
    Some(30)
}

fn default_max_reconnects() -> Option<usize> {
    Some(5)
}

impl NatsConfig {
    /// Default settings for local development.
    pub fn for_local() -> Self {
        Self {
            name: Some("eventlog".to_string()),
            ..Self::default()
        }
    }

    /// Returns the primary URL for connection.
    pub fn primary_url(&self) -> &str {
        self.urls
            .first()
            .map(|s| s.as_str())
            .unwrap_or("nats://localhost:4222")
    }
}

/// NATS EventBus implementation using JetStream.
#[derive(Clone)]
pub struct NatsEventBus {
    client: Arc<Client>,
    jetstream: JetStreamContext,
    /// Stream name and subject prefix for isolation between deployments.
    stream_prefix: String,
}

impl NatsEventBus {
    /// Connects to NATS and opens a JetStream context.
    pub async fn new(config: NatsConfig) -> Result<Self, EventBusError> {
        let mut connect_options = ConnectOptions::default()
            .connection_timeout(Duration::from_secs(config.connection_timeout_secs));

        if let Some(timeout_secs) = config.request_timeout_secs {
            connect_options =
                connect_options.request_timeout(Some(Duration::from_secs(timeout_secs)));
        }
        if let Some(name) = &config.name {
            connect_options = connect_options.name(name);
        }
        if let Some(max_reconnects) = config.max_reconnects {
            connect_options = connect_options.max_reconnects(max_reconnects);
        }

        let client = async_nats::connect_with_options(config.primary_url(), connect_options)
            .await
            .map_err(|e| EventBusError::ConnectionError(e.to_string()))?;

        let jetstream = async_nats::jetstream::new(client.clone());

        Ok(Self {
            client: Arc::new(client),
            jetstream,
            stream_prefix: "EVENTLOG".to_string(),
        })
    }

    /// Overrides the stream prefix, for multi-tenant or test isolation.
    pub async fn with_prefix(
        config: NatsConfig,
        stream_prefix: &str,
    ) -> Result<Self, EventBusError> {
        let mut bus = Self::new(config).await?;
        bus.stream_prefix = stream_prefix.to_string();
        Ok(bus)
    }

    /// Maps a topic and partitioning key to a subject.
    ///
    /// `{prefix}.{topic}.{key}`: one subject per aggregate, so per-aggregate
    /// order is preserved while the stream fans out across aggregates.
    fn subject_for(&self, topic: &str, key: &str) -> String {
        format!("{}.{}.{}", self.stream_prefix.to_lowercase(), topic, key)
    }

    fn stream_name(&self, topic: &str) -> String {
        format!("{}_{}", self.stream_prefix, topic.replace('.', "_"))
    }

    /// Ensures the work-queue stream for `topic` exists.
    async fn ensure_stream(&self, topic: &str) -> Result<(), EventBusError> {
        let stream_name = self.stream_name(topic);

        if self.jetstream.get_stream(&stream_name).await.is_ok() {
            debug!("Stream {} already exists", stream_name);
            return Ok(());
        }

        info!("Creating stream {} for topic {}", stream_name, topic);
        let stream_config = StreamConfig {
            name: stream_name,
            subjects: vec![format!(
                "{}.{}.>",
                self.stream_prefix.to_lowercase(),
                topic
            )],
            retention: async_nats::jetstream::stream::RetentionPolicy::WorkQueue,
            storage: async_nats::jetstream::stream::StorageType::File,
            num_replicas: 1,
            ..Default::default()
        };

        self.jetstream
            .create_stream(stream_config)
            .await
            .map_err(|e| EventBusError::ConnectionError(e.to_string()))?;

        Ok(())
    }

    /// Gets or creates the durable pull consumer backing a group on a topic.
    async fn group_consumer(
        &self,
        topic: &str,
        group: &str,
    ) -> Result<PullConsumer, EventBusError> {
        self.ensure_stream(topic).await?;

        let stream = self
            .jetstream
            .get_stream(self.stream_name(topic))
            .await
            .map_err(|e| EventBusError::ConnectionError(e.to_string()))?;

        let consumer_name = format!("{}-{}", group, topic.replace('.', "-"));
        if let Ok(consumer) = stream.get_consumer(&consumer_name).await {
            debug!("Consumer {} already exists", consumer_name);
            return Ok(consumer);
        }

        info!("Creating consumer {} on topic {}", consumer_name, topic);
        let consumer_config = PullConsumerConfig {
            durable_name: Some(consumer_name),
            deliver_policy: DeliverPolicy::All,
            ack_policy: AckPolicy::Explicit,
            ack_wait: Duration::from_secs(30),
            max_ack_pending: 1000,
            ..Default::default()
        };

        stream
            .create_consumer(consumer_config)
            .await
            .map_err(|e| EventBusError::SubscribeError(e.to_string()))
    }
}

struct NatsAck {
    message: async_nats::jetstream::Message,
}

#[async_trait]
impl MessageAck for NatsAck {
    async fn ack(self: Box<Self>) -> Result<(), EventBusError> {
        self.message
            .ack()
            .await
            .map_err(|e| EventBusError::PublishError(e.to_string()))
    }
}

#[async_trait]
impl EventBus for NatsEventBus {
    #[instrument(skip(self, messages), fields(count = messages.len()))]
    async fn publish_batch(&self, messages: &[BrokerMessage]) -> Result<(), EventBusError> {
        for message in messages {
            self.ensure_stream(&message.topic).await?;

            let subject = self.subject_for(&message.topic, &message.key);
            let ack = self
                .jetstream
                .publish(subject, message.payload.clone().into())
                .await
                .map_err(|e| EventBusError::PublishError(e.to_string()))?;

            // Wait for the ack so a broker-side failure fails the batch.
            ack.await
                .map_err(|e| EventBusError::PublishError(e.to_string()))?;
        }

        debug!("Published batch");
        Ok(())
    }

    #[instrument(skip(self), fields(group = group))]
    async fn subscribe(
        &self,
        topics: &[String],
        group: &str,
    ) -> Result<BoxStream<'static, Result<InboundMessage, EventBusError>>, EventBusError> {
        let mut merged = SelectAll::new();

        for topic in topics {
            let consumer = self.group_consumer(topic, group).await?;
            let topic = topic.clone();

            let stream = async_stream::stream! {
                let mut messages = match consumer.messages().await {
                    Ok(msgs) => msgs,
                    Err(e) => {
                        error!(topic = %topic, "Failed to open consumer messages: {}", e);
                        yield Err(EventBusError::ConnectionError(e.to_string()));
                        return;
                    }
                };

                while let Some(result) = messages.next().await {
                    match result {
                        Ok(message) => {
                            yield Ok(InboundMessage {
                                topic: topic.clone(),
                                payload: message.payload.to_vec(),
                                acker: Box::new(NatsAck { message }),
                            });
                        }
                        Err(e) => {
                            warn!(topic = %topic, "Error receiving message: {}", e);
                            yield Err(EventBusError::ConnectionError(e.to_string()));
                        }
                    }
                }
            };

            merged.push(Box::pin(stream)
                as BoxStream<'static, Result<InboundMessage, EventBusError>>);
        }

        Ok(Box::pin(merged))
    }
}

impl NatsEventBus {
    /// Publishes a single message; convenience wrapper over [`publish_batch`].
    ///
    /// [`publish_batch`]: EventBus::publish_batch
    pub async fn publish(&self, message: BrokerMessage) -> Result<(), EventBusError> {
        self.publish_batch(std::slice::from_ref(&message)).await
    }

    /// The underlying client, for health checks.
    pub fn client(&self) -> &Client {
        &self.client
    }

    /// Builds a message for ad hoc publishing outside the relay.
    pub fn message(topic: &str, key: &str, payload: Vec<u8>) -> BrokerMessage {
        BrokerMessage {
            topic: topic.to_string(),
            key: key.to_string(),
            payload,
            timestamp: Utc::now(),
        }
    }
}
