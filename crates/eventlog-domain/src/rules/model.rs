//! Rule Model
//!
//! A rule is a dynamic routing entry: "when shipments/created and the payload
//! matches these conditions, run the `notify` action with this config".

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Error types for rule store operations
#[derive(Debug, thiserror::Error)]
pub enum RuleStoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Infrastructure error: {message}")]
    InfrastructureError { message: String },
}

/// A stored routing rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRule {
    pub id: Uuid,
    /// Optional topic scope; `None` matches events from any topic.
    pub topic: Option<String>,
    /// Filter key matched against the event's action verb.
    pub event_type: String,
    /// Predicate over the event payload. `null` or `{}` always matches.
    pub conditions: serde_json::Value,
    /// Name resolved against the action registry at dispatch time.
    pub action_type: String,
    /// Opaque parameters handed to the action handler.
    pub action_config: serde_json::Value,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

/// A rule ready to be inserted into the store.
#[derive(Debug, Clone)]
pub struct NewEventRule {
    pub topic: Option<String>,
    pub event_type: String,
    pub conditions: serde_json::Value,
    pub action_type: String,
    pub action_config: serde_json::Value,
    pub is_active: bool,
}

impl NewEventRule {
    /// An always-matching rule for the given filter key.
    pub fn unconditional(
        topic: Option<String>,
        event_type: impl Into<String>,
        action_type: impl Into<String>,
        action_config: serde_json::Value,
    ) -> Self {
        Self {
            topic,
            event_type: event_type.into(),
            conditions: serde_json::Value::Null,
            action_type: action_type.into(),
            action_config,
            is_active: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_unconditional_rule() {
        let rule = NewEventRule::unconditional(
            Some("shipments".to_string()),
            "created",
            "notify",
            json!({"template": "shipment_created"}),
        );

        assert!(rule.is_active);
        assert!(rule.conditions.is_null());
        assert_eq!(rule.action_type, "notify");
    }
}
