//! PostgreSQL persistence adapters.

pub mod outbox;
pub mod rules;

pub use outbox::PostgresOutboxRepository;
pub use rules::PostgresRuleStore;
