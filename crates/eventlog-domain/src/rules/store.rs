//! Rule Store Trait
//!
//! Read-mostly access to stored rules. The engine fetches candidates per
//! dispatch; implementations must never block dispatch on a writer lock.

use crate::rules::{EventRule, RuleStoreError};
use std::sync::Mutex;

/// Store of routing rules, queried by the rule engine.
#[async_trait::async_trait]
pub trait RuleStore: Send + Sync {
    /// Active rules whose filter key matches the incoming event: rules with
    /// `event_type = action` scoped to `entity_type` or unscoped.
    async fn active_rules(
        &self,
        entity_type: &str,
        action: &str,
    ) -> Result<Vec<EventRule>, RuleStoreError>;
}

/// In-memory rule store for tests and local development.
#[derive(Default)]
pub struct InMemoryRuleStore {
    rules: Mutex<Vec<EventRule>>,
}

impl InMemoryRuleStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, rule: EventRule) {
        self.rules.lock().unwrap().push(rule);
    }
}

#[async_trait::async_trait]
impl RuleStore for InMemoryRuleStore {
    async fn active_rules(
        &self,
        entity_type: &str,
        action: &str,
    ) -> Result<Vec<EventRule>, RuleStoreError> {
        let rules = self.rules.lock().unwrap();
        Ok(rules
            .iter()
            .filter(|r| r.is_active)
            .filter(|r| r.event_type == action)
            .filter(|r| r.topic.as_deref().map_or(true, |t| t == entity_type))
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::json;
    use uuid::Uuid;

    fn rule(topic: Option<&str>, event_type: &str, is_active: bool) -> EventRule {
        EventRule {
            id: Uuid::new_v4(),
            topic: topic.map(str::to_string),
            event_type: event_type.to_string(),
            conditions: serde_json::Value::Null,
            action_type: "notify".to_string(),
            action_config: json!({}),
            is_active,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_filters_by_event_type_and_topic() {
        let store = InMemoryRuleStore::new();
        store.push(rule(Some("shipments"), "created", true));
        store.push(rule(Some("orders"), "created", true));
        store.push(rule(None, "created", true));
        store.push(rule(Some("shipments"), "deleted", true));

        let matches = store.active_rules("shipments", "created").await.unwrap();
        assert_eq!(matches.len(), 2);
    }

    #[tokio::test]
    async fn test_inactive_rules_excluded() {
        let store = InMemoryRuleStore::new();
        store.push(rule(Some("shipments"), "created", false));

        let matches = store.active_rules("shipments", "created").await.unwrap();
        assert!(matches.is_empty());
    }
}
