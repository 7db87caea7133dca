//! In-memory EventBus for tests and local development.
//!
//! Mirrors the broker contract closely enough to exercise the relay and the
//! consumer without a running NATS: published messages are retained and
//! replayed to late subscribers, and acknowledgements are counted so tests
//! can assert on them. Not suitable for production.

use async_trait::async_trait;
use eventlog_domain::event_bus::{
    BrokerMessage, EventBus, EventBusError, InboundMessage, MessageAck,
};
use futures::stream::BoxStream;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

#[derive(Default)]
struct Inner {
    published: Vec<BrokerMessage>,
    subscribers: Vec<Subscriber>,
}

struct Subscriber {
    topics: Vec<String>,
    sender: mpsc::UnboundedSender<BrokerMessage>,
}

/// In-memory bus retaining everything it publishes.
#[derive(Clone, Default)]
pub struct InMemoryEventBus {
    inner: Arc<Mutex<Inner>>,
    failing: Arc<AtomicBool>,
    acked: Arc<AtomicU64>,
}

impl InMemoryEventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent publish fail, for relay failure-path tests.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Everything published so far, in publish order.
    pub fn published(&self) -> Vec<BrokerMessage> {
        self.inner.lock().unwrap().published.clone()
    }

    /// Number of messages acknowledged by consumers.
    pub fn acked_count(&self) -> u64 {
        self.acked.load(Ordering::SeqCst)
    }
}

struct MemoryAck {
    acked: Arc<AtomicU64>,
}

#[async_trait]
impl MessageAck for MemoryAck {
    async fn ack(self: Box<Self>) -> Result<(), EventBusError> {
        self.acked.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[async_trait]
impl EventBus for InMemoryEventBus {
    async fn publish_batch(&self, messages: &[BrokerMessage]) -> Result<(), EventBusError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(EventBusError::PublishError(
                "in-memory bus set to fail".to_string(),
            ));
        }

        let mut inner = self.inner.lock().unwrap();
        for message in messages {
            inner.published.push(message.clone());
            inner.subscribers.retain(|subscriber| {
                if !subscriber.topics.contains(&message.topic) {
                    return true;
                }
                // A closed channel means the subscriber is gone.
                subscriber.sender.send(message.clone()).is_ok()
            });
        }
        Ok(())
    }

    async fn subscribe(
        &self,
        topics: &[String],
        _group: &str,
    ) -> Result<BoxStream<'static, Result<InboundMessage, EventBusError>>, EventBusError> {
        let (sender, mut receiver) = mpsc::unbounded_channel();

        {
            let mut inner = self.inner.lock().unwrap();
            // Replay the backlog so subscribers started after the relay
            // still see everything, matching a durable consumer.
            for message in &inner.published {
                if topics.contains(&message.topic) {
                    let _ = sender.send(message.clone());
                }
            }
            inner.subscribers.push(Subscriber {
                topics: topics.to_vec(),
                sender,
            });
        }

        let acked = self.acked.clone();
        let stream = async_stream::stream! {
            while let Some(message) = receiver.recv().await {
                yield Ok(InboundMessage {
                    topic: message.topic,
                    payload: message.payload,
                    acker: Box::new(MemoryAck {
                        acked: acked.clone(),
                    }),
                });
            }
        };

        Ok(Box::pin(stream))
    }
}
