//! PostgreSQL Rule Store
//!
//! Stores routing rules in an `event_rules` table and serves the engine's
//! per-dispatch lookups. Rules are re-fetched on every dispatch, so inserts
//! and activation toggles take effect without restarting consumers.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use eventlog_domain::rules::{EventRule, NewEventRule, RuleStore, RuleStoreError};
use sqlx::PgPool;
use tracing::debug;
use uuid::Uuid;

/// PostgreSQL implementation of the rule store.
#[derive(Clone)]
pub struct PostgresRuleStore {
    pool: PgPool,
}

#[derive(sqlx::FromRow)]
struct RuleRow {
    id: Uuid,
    topic: Option<String>,
    event_type: String,
    conditions: serde_json::Value,
    action_type: String,
    action_config: serde_json::Value,
    is_active: bool,
    created_at: DateTime<Utc>,
}

impl From<RuleRow> for EventRule {
    fn from(row: RuleRow) -> Self {
        Self {
            id: row.id,
            topic: row.topic,
            event_type: row.event_type,
            conditions: row.conditions,
            action_type: row.action_type,
            action_config: row.action_config,
            is_active: row.is_active,
            created_at: row.created_at,
        }
    }
}

impl PostgresRuleStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Creates the rules table and its lookup index if missing.
    pub async fn run_migrations(&self) -> Result<(), RuleStoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS event_rules (
                id UUID PRIMARY KEY,
                topic VARCHAR(255),
                event_type VARCHAR(255) NOT NULL,
                conditions JSONB NOT NULL DEFAULT 'null'::JSONB,
                action_type VARCHAR(255) NOT NULL,
                action_config JSONB NOT NULL DEFAULT '{}'::JSONB,
                is_active BOOLEAN NOT NULL DEFAULT TRUE,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_event_rules_lookup
            ON event_rules (event_type, is_active)
            "#,
        )
        .execute(&self.pool)
        .await?;

        debug!("Rule store migrations applied");
        Ok(())
    }

    /// Inserts a rule and returns its generated id.
    pub async fn insert_rule(&self, rule: &NewEventRule) -> Result<Uuid, RuleStoreError> {
        let id = Uuid::new_v4();

        sqlx::query(
            r#"
            INSERT INTO event_rules
                (id, topic, event_type, conditions, action_type, action_config, is_active)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(id)
        .bind(&rule.topic)
        .bind(&rule.event_type)
        .bind(&rule.conditions)
        .bind(&rule.action_type)
        .bind(&rule.action_config)
        .bind(rule.is_active)
        .execute(&self.pool)
        .await?;

        Ok(id)
    }

    /// Toggles a rule without deleting it.
    pub async fn set_active(&self, id: Uuid, is_active: bool) -> Result<(), RuleStoreError> {
        let result = sqlx::query("UPDATE event_rules SET is_active = $2 WHERE id = $1")
            .bind(id)
            .bind(is_active)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(RuleStoreError::InfrastructureError {
                message: format!("rule {id} not found"),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl RuleStore for PostgresRuleStore {
    async fn active_rules(
        &self,
        entity_type: &str,
        action: &str,
    ) -> Result<Vec<EventRule>, RuleStoreError> {
        let rows: Vec<RuleRow> = sqlx::query_as(
            r#"
            SELECT id, topic, event_type, conditions, action_type, action_config,
                   is_active, created_at
            FROM event_rules
            WHERE event_type = $1
              AND is_active = TRUE
              AND (topic IS NULL OR topic = $2)
            "#,
        )
        .bind(action)
        .bind(entity_type)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(EventRule::from).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    async fn setup_test_db() -> Option<PostgresRuleStore> {
        let url = std::env::var("DATABASE_URL").ok()?;
        let pool = PgPool::connect(&url).await.ok()?;
        let store = PostgresRuleStore::new(pool.clone());
        store.run_migrations().await.ok()?;
        sqlx::query("TRUNCATE event_rules").execute(&pool).await.ok()?;
        Some(store)
    }

    #[tokio::test]
    #[ignore = "Requires PostgreSQL"]
    async fn test_insert_and_lookup() {
        let Some(store) = setup_test_db().await else {
            return;
        };

        store
            .insert_rule(&NewEventRule::unconditional(
                Some("shipments".to_string()),
                "created",
                "notify",
                json!({"template": "shipment_created"}),
            ))
            .await
            .unwrap();
        store
            .insert_rule(&NewEventRule::unconditional(
                None,
                "created",
                "audit",
                json!({}),
            ))
            .await
            .unwrap();
        store
            .insert_rule(&NewEventRule::unconditional(
                Some("orders".to_string()),
                "created",
                "notify",
                json!({}),
            ))
            .await
            .unwrap();

        // Scoped rule plus the unscoped one; the orders rule stays out.
        let rules = store.active_rules("shipments", "created").await.unwrap();
        assert_eq!(rules.len(), 2);

        let rules = store.active_rules("shipments", "deleted").await.unwrap();
        assert!(rules.is_empty());
    }

    #[tokio::test]
    #[ignore = "Requires PostgreSQL"]
    async fn test_set_active_toggles_visibility() {
        let Some(store) = setup_test_db().await else {
            return;
        };

        let id = store
            .insert_rule(&NewEventRule::unconditional(
                Some("shipments".to_string()),
                "created",
                "notify",
                json!({}),
            ))
            .await
            .unwrap();

        assert_eq!(store.active_rules("shipments", "created").await.unwrap().len(), 1);

        store.set_active(id, false).await.unwrap();
        assert!(store.active_rules("shipments", "created").await.unwrap().is_empty());

        store.set_active(id, true).await.unwrap();
        assert_eq!(store.active_rules("shipments", "created").await.unwrap().len(), 1);
    }

    #[tokio::test]
    #[ignore = "Requires PostgreSQL"]
    async fn test_set_active_unknown_rule_is_an_error() {
        let Some(store) = setup_test_db().await else {
            return;
        };

        let result = store.set_active(Uuid::new_v4(), false).await;
        assert!(matches!(
            result,
            Err(RuleStoreError::InfrastructureError { .. })
        ));
    }
}
