//! Rule Engine
//!
//! Matches incoming events against stored rules. Candidate rules come from
//! the store by filter key; conditions are then evaluated in memory against
//! the event payload. Evaluation is fail-safe: a malformed condition makes
//! that one rule non-matching, it never blocks the others.

use crate::rules::{EventRule, RuleStore, RuleStoreError};
use std::sync::Arc;
use tracing::warn;

/// Error produced while evaluating a rule's conditions.
///
/// Any of these means "the rule does not match"; the engine logs and moves on.
#[derive(Debug, thiserror::Error)]
pub enum ConditionError {
    #[error("conditions must be a JSON object, got {0}")]
    ConditionsNotAnObject(String),

    #[error("event data must be a JSON object to evaluate conditions")]
    DataNotAnObject,

    #[error("unknown operator: {0}")]
    UnknownOperator(String),

    #[error("malformed predicate for field {0}: operators cannot be mixed with literals")]
    MalformedPredicate(String),

    #[error("operator {op} on field {field} requires a numeric value")]
    NotComparable { op: String, field: String },

    #[error("operator {op} on field {field} has an invalid operand")]
    InvalidOperand { op: String, field: String },
}

/// Evaluates which stored rules match a given event.
pub struct RuleEngine<S> {
    store: Arc<S>,
}

impl<S: RuleStore> RuleEngine<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// Rules matching the `(entity_type, action)` pair whose conditions hold
    /// for `data`. Matches are unordered; every returned rule fires
    /// independently.
    pub async fn matching_rules(
        &self,
        entity_type: &str,
        action: &str,
        data: &serde_json::Value,
    ) -> Result<Vec<EventRule>, RuleStoreError> {
        let candidates = self.store.active_rules(entity_type, action).await?;

        let mut matched = Vec::new();
        for rule in candidates {
            // The store contract already excludes inactive rules; filter
            // again so a misbehaving store cannot break the invariant.
            if !rule.is_active {
                continue;
            }
            match conditions_match(&rule.conditions, data) {
                Ok(true) => matched.push(rule),
                Ok(false) => {}
                Err(e) => {
                    warn!(
                        rule_id = %rule.id,
                        action_type = %rule.action_type,
                        error = %e,
                        "Rule condition evaluation failed, treating as non-matching"
                    );
                }
            }
        }

        Ok(matched)
    }
}

/// Evaluate a conditions object against event data.
///
/// `null`, absent, or `{}` conditions always match. Otherwise conditions must
/// be an object of `field path -> predicate`, combined with AND. A predicate
/// is either a literal (equality) or an operator object using
/// `$eq`/`$ne`/`$gt`/`$gte`/`$lt`/`$lte`/`$in`/`$exists`. Field paths may be
/// dotted to reach nested values.
pub fn conditions_match(
    conditions: &serde_json::Value,
    data: &serde_json::Value,
) -> Result<bool, ConditionError> {
    let object = match conditions {
        serde_json::Value::Null => return Ok(true),
        serde_json::Value::Object(map) if map.is_empty() => return Ok(true),
        serde_json::Value::Object(map) => map,
        other => {
            return Err(ConditionError::ConditionsNotAnObject(
                value_kind(other).to_string(),
            ));
        }
    };

    if !data.is_object() {
        return Err(ConditionError::DataNotAnObject);
    }

    for (path, predicate) in object {
        if !field_matches(path, predicate, lookup_path(data, path))? {
            return Ok(false);
        }
    }

    Ok(true)
}

fn field_matches(
    path: &str,
    predicate: &serde_json::Value,
    actual: Option<&serde_json::Value>,
) -> Result<bool, ConditionError> {
    let operators = match predicate {
        serde_json::Value::Object(map) if map.keys().any(|k| k.starts_with('$')) => {
            if !map.keys().all(|k| k.starts_with('$')) {
                return Err(ConditionError::MalformedPredicate(path.to_string()));
            }
            map
        }
        // Anything else is literal equality.
        literal => return Ok(actual == Some(literal)),
    };

    for (op, operand) in operators {
        let holds = match op.as_str() {
            "$eq" => actual == Some(operand),
            "$ne" => actual != Some(operand),
            "$gt" | "$gte" | "$lt" | "$lte" => {
                numeric_compare(op, path, operand, actual)?
            }
            "$in" => {
                let candidates = operand.as_array().ok_or_else(|| {
                    ConditionError::InvalidOperand {
                        op: op.clone(),
                        field: path.to_string(),
                    }
                })?;
                actual.map_or(false, |value| candidates.contains(value))
            }
            "$exists" => {
                let expected = operand.as_bool().ok_or_else(|| {
                    ConditionError::InvalidOperand {
                        op: op.clone(),
                        field: path.to_string(),
                    }
                })?;
                actual.is_some() == expected
            }
            unknown => return Err(ConditionError::UnknownOperator(unknown.to_string())),
        };

        if !holds {
            return Ok(false);
        }
    }

    Ok(true)
}

fn numeric_compare(
    op: &str,
    path: &str,
    operand: &serde_json::Value,
    actual: Option<&serde_json::Value>,
) -> Result<bool, ConditionError> {
    let operand = operand
        .as_f64()
        .ok_or_else(|| ConditionError::InvalidOperand {
            op: op.to_string(),
            field: path.to_string(),
        })?;

    let actual = match actual {
        // A missing field fails the comparison without being an error.
        None => return Ok(false),
        Some(value) => value
            .as_f64()
            .ok_or_else(|| ConditionError::NotComparable {
                op: op.to_string(),
                field: path.to_string(),
            })?,
    };

    Ok(match op {
        "$gt" => actual > operand,
        "$gte" => actual >= operand,
        "$lt" => actual < operand,
        "$lte" => actual <= operand,
        _ => unreachable!("caller matches only comparison operators"),
    })
}

fn lookup_path<'a>(
    data: &'a serde_json::Value,
    path: &str,
) -> Option<&'a serde_json::Value> {
    let mut current = data;
    for segment in path.split('.') {
        current = current.as_object()?.get(segment)?;
    }
    Some(current)
}

fn value_kind(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "boolean",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::InMemoryRuleStore;
    use chrono::Utc;
    use serde_json::json;
    use uuid::Uuid;

    #[test]
    fn test_empty_conditions_always_match() {
        let data = json!({"role": "admin"});
        assert!(conditions_match(&serde_json::Value::Null, &data).unwrap());
        assert!(conditions_match(&json!({}), &data).unwrap());
    }

    #[test]
    fn test_literal_equality() {
        let data = json!({"role": "admin", "count": 3});
        assert!(conditions_match(&json!({"role": "admin"}), &data).unwrap());
        assert!(!conditions_match(&json!({"role": "driver"}), &data).unwrap());
        assert!(conditions_match(&json!({"count": 3}), &data).unwrap());
        assert!(!conditions_match(&json!({"missing": "x"}), &data).unwrap());
    }

    #[test]
    fn test_multiple_fields_are_anded() {
        let data = json!({"role": "admin", "region": "eu"});
        assert!(conditions_match(&json!({"role": "admin", "region": "eu"}), &data).unwrap());
        assert!(!conditions_match(&json!({"role": "admin", "region": "us"}), &data).unwrap());
    }

    #[test]
    fn test_comparison_operators() {
        let data = json!({"weight_kg": 120});
        assert!(conditions_match(&json!({"weight_kg": {"$gt": 100}}), &data).unwrap());
        assert!(conditions_match(&json!({"weight_kg": {"$gte": 120}}), &data).unwrap());
        assert!(!conditions_match(&json!({"weight_kg": {"$lt": 120}}), &data).unwrap());
        assert!(conditions_match(&json!({"weight_kg": {"$lte": 120}}), &data).unwrap());
        assert!(
            conditions_match(&json!({"weight_kg": {"$gt": 100, "$lt": 200}}), &data).unwrap()
        );
    }

    #[test]
    fn test_in_and_exists_operators() {
        let data = json!({"status": "in_transit"});
        assert!(
            conditions_match(&json!({"status": {"$in": ["pending", "in_transit"]}}), &data)
                .unwrap()
        );
        assert!(!conditions_match(&json!({"status": {"$in": ["delivered"]}}), &data).unwrap());
        assert!(conditions_match(&json!({"status": {"$exists": true}}), &data).unwrap());
        assert!(conditions_match(&json!({"carrier": {"$exists": false}}), &data).unwrap());
    }

    #[test]
    fn test_dotted_paths() {
        let data = json!({"destination": {"country": "ES", "zone": {"code": 7}}});
        assert!(conditions_match(&json!({"destination.country": "ES"}), &data).unwrap());
        assert!(
            conditions_match(&json!({"destination.zone.code": {"$gte": 5}}), &data).unwrap()
        );
        assert!(!conditions_match(&json!({"destination.city": "Madrid"}), &data).unwrap());
    }

    #[test]
    fn test_missing_field_fails_comparison_without_error() {
        let data = json!({"weight_kg": 120});
        assert!(!conditions_match(&json!({"height_cm": {"$gt": 10}}), &data).unwrap());
    }

    #[test]
    fn test_malformed_conditions_are_errors() {
        let data = json!({"role": "admin"});

        assert!(matches!(
            conditions_match(&json!("role = admin"), &data),
            Err(ConditionError::ConditionsNotAnObject(_))
        ));
        assert!(matches!(
            conditions_match(&json!({"role": {"$like": "adm%"}}), &data),
            Err(ConditionError::UnknownOperator(_))
        ));
        assert!(matches!(
            conditions_match(&json!({"role": {"$eq": "admin", "literal": 1}}), &data),
            Err(ConditionError::MalformedPredicate(_))
        ));
        assert!(matches!(
            conditions_match(&json!({"role": {"$gt": 3}}), &data),
            Err(ConditionError::NotComparable { .. })
        ));
        assert!(matches!(
            conditions_match(&json!({"role": "admin"}), &json!("not an object")),
            Err(ConditionError::DataNotAnObject)
        ));
    }

    fn rule(conditions: serde_json::Value, is_active: bool) -> EventRule {
        EventRule {
            id: Uuid::new_v4(),
            topic: Some("shipments".to_string()),
            event_type: "created".to_string(),
            conditions,
            action_type: "notify".to_string(),
            action_config: json!({}),
            is_active,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_engine_returns_matching_rules() {
        let store = Arc::new(InMemoryRuleStore::new());
        store.push(rule(json!({}), true));
        store.push(rule(json!({"priority": "high"}), true));

        let engine = RuleEngine::new(store);
        let matched = engine
            .matching_rules("shipments", "created", &json!({"priority": "low"}))
            .await
            .unwrap();

        // Only the unconditional rule matches.
        assert_eq!(matched.len(), 1);
        assert!(matched[0].conditions.as_object().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_engine_skips_inactive_rules_defensively() {
        let store = Arc::new(InMemoryRuleStore::new());
        store.push(rule(json!({}), false));

        let engine = RuleEngine::new(store);
        let matched = engine
            .matching_rules("shipments", "created", &json!({}))
            .await
            .unwrap();
        assert!(matched.is_empty());
    }

    #[tokio::test]
    async fn test_engine_bad_rule_does_not_block_others() {
        let store = Arc::new(InMemoryRuleStore::new());
        store.push(rule(json!({"role": {"$like": "adm%"}}), true));
        store.push(rule(json!({"role": "admin"}), true));

        let engine = RuleEngine::new(store);
        let matched = engine
            .matching_rules("shipments", "created", &json!({"role": "admin"}))
            .await
            .unwrap();

        assert_eq!(matched.len(), 1);
        assert_eq!(matched[0].conditions, json!({"role": "admin"}));
    }
}
