//! Infrastructure layer for the transactional event log.
//!
//! Concrete adapters behind the domain traits:
//! - [`persistence`]: PostgreSQL outbox repository and rule store
//! - [`messaging`]: NATS JetStream event bus, the outbox relay, and the
//!   dispatching consumer
//! - [`telemetry`]: tracing subscriber setup

pub mod messaging;
pub mod persistence;
pub mod telemetry;
