//! Messaging adapters and the moving parts of the pipeline.

pub mod consumer;
pub mod memory;
pub mod nats;
pub mod relay;

pub use consumer::{ConsumerConfig, DispatchOutcome, EventConsumer, EventDispatcher};
pub use memory::InMemoryEventBus;
pub use nats::{NatsConfig, NatsEventBus};
pub use relay::{OutboxRelay, OutboxRelayConfig, OutboxRelayMetrics};
