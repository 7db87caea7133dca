//! Domain layer for the transactional event log.
//!
//! This crate holds the pure building blocks of the outbox pipeline:
//! - [`events`]: the event envelope written by producers and consumed downstream
//! - [`outbox`]: the outbox row model and the repository abstraction
//! - [`event_bus`]: the narrow broker interface used by the relay and the consumer
//! - [`rules`]: declarative routing rules and the matching engine
//! - [`registry`]: immutable action and system-handler registries

pub mod event_bus;
pub mod events;
pub mod outbox;
pub mod registry;
pub mod rules;
