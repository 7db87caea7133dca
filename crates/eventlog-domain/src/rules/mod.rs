//! Declarative routing rules.
//!
//! Rules map an event filter (entity type + action, optional condition over
//! the payload) to a named action. They are stored rows, edited by operators
//! at runtime, and re-fetched per dispatch so consumers never need a restart
//! to pick up changes.

pub mod engine;
pub mod model;
pub mod store;

pub use engine::{conditions_match, ConditionError, RuleEngine};
pub use model::{EventRule, NewEventRule, RuleStoreError};
pub use store::{InMemoryRuleStore, RuleStore};
