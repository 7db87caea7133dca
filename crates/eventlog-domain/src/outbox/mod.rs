//! Transactional Outbox Pattern abstractions.
//!
//! The outbox solves the dual-write problem: an event row is written in the
//! same database transaction as the business mutation it describes, then
//! relayed to the broker by a separate background process.

pub mod model;
pub mod repository;

pub use model::{OutboxError, OutboxEvent, OutboxStats};
pub use repository::OutboxRepository;
