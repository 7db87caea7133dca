//! PostgreSQL Outbox Repository
//!
//! Implements the transactional outbox on a single `outbox_events` table.
//! Writers insert rows inside their own business transaction; the relay
//! claims batches with `FOR UPDATE SKIP LOCKED` and deletes rows after a
//! successful publish, all within one relay-owned transaction.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use eventlog_domain::events::EventEnvelope;
use eventlog_domain::outbox::{OutboxError, OutboxEvent, OutboxRepository, OutboxStats};
use sqlx::{PgPool, PgTransaction, Row};
use tracing::{debug, instrument};
use uuid::Uuid;

/// PostgreSQL implementation of the outbox repository.
#[derive(Clone)]
pub struct PostgresOutboxRepository {
    pool: PgPool,
}

#[derive(sqlx::FromRow)]
struct OutboxRow {
    id: Uuid,
    aggregate_id: Uuid,
    aggregate_type: String,
    event_type: String,
    payload: Vec<u8>,
    topic: String,
    created_at: DateTime<Utc>,
}

impl From<OutboxRow> for OutboxEvent {
    fn from(row: OutboxRow) -> Self {
        Self {
            id: row.id,
            aggregate_id: row.aggregate_id,
            aggregate_type: row.aggregate_type,
            event_type: row.event_type,
            payload: row.payload,
            topic: row.topic,
            created_at: row.created_at,
        }
    }
}

impl PostgresOutboxRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Creates the outbox table and its claim index if missing.
    pub async fn run_migrations(&self) -> Result<(), OutboxError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS outbox_events (
                id UUID PRIMARY KEY,
                aggregate_id UUID NOT NULL,
                aggregate_type VARCHAR(255) NOT NULL,
                event_type VARCHAR(255) NOT NULL,
                payload BYTEA NOT NULL,
                topic VARCHAR(255) NOT NULL,
                status VARCHAR(50) NOT NULL DEFAULT 'PENDING',
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                processed_at TIMESTAMPTZ
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_outbox_events_pending
            ON outbox_events (status, created_at)
            WHERE status = 'PENDING'
            "#,
        )
        .execute(&self.pool)
        .await?;

        debug!("Outbox migrations applied");
        Ok(())
    }
}

#[async_trait]
impl OutboxRepository for PostgresOutboxRepository {
    #[instrument(skip(self, tx, envelope), fields(entity_type = %envelope.entity_type, action = %envelope.action))]
    async fn insert_event_with_tx(
        &self,
        tx: &mut PgTransaction<'_>,
        topic: &str,
        envelope: &EventEnvelope,
    ) -> Result<(), OutboxError> {
        let payload = serde_json::to_vec(envelope)?;

        sqlx::query(
            r#"
            INSERT INTO outbox_events
                (id, aggregate_id, aggregate_type, event_type, payload, topic, status, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, 'PENDING', $7)
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(envelope.entity_id)
        .bind(&envelope.entity_type)
        .bind(&envelope.action)
        .bind(&payload)
        .bind(topic)
        .bind(envelope.timestamp)
        .execute(&mut **tx)
        .await?;

        debug!(event_id = %envelope.event_id, "Outbox row inserted");
        Ok(())
    }

    async fn claim_pending_batch(
        &self,
        tx: &mut PgTransaction<'_>,
        limit: usize,
    ) -> Result<Vec<OutboxEvent>, OutboxError> {
        let rows: Vec<OutboxRow> = sqlx::query_as(
            r#"
            SELECT id, aggregate_id, aggregate_type, event_type, payload, topic, created_at
            FROM outbox_events
            WHERE status = 'PENDING'
            ORDER BY created_at ASC
            LIMIT $1
            FOR UPDATE SKIP LOCKED
            "#,
        )
        .bind(limit as i64)
        .fetch_all(&mut **tx)
        .await?;

        Ok(rows.into_iter().map(OutboxEvent::from).collect())
    }

    async fn delete_batch(
        &self,
        tx: &mut PgTransaction<'_>,
        ids: &[Uuid],
    ) -> Result<(), OutboxError> {
        if ids.is_empty() {
            return Ok(());
        }

        sqlx::query("DELETE FROM outbox_events WHERE id = ANY($1)")
            .bind(ids)
            .execute(&mut **tx)
            .await?;

        Ok(())
    }

    async fn count_pending(&self) -> Result<u64, OutboxError> {
        let row = sqlx::query("SELECT COUNT(*) AS count FROM outbox_events WHERE status = 'PENDING'")
            .fetch_one(&self.pool)
            .await?;

        let count: i64 = row.try_get("count")?;
        Ok(count as u64)
    }

    async fn get_stats(&self) -> Result<OutboxStats, OutboxError> {
        let row = sqlx::query(
            r#"
            SELECT
                COUNT(*) AS pending_count,
                EXTRACT(EPOCH FROM (NOW() - MIN(created_at)))::BIGINT AS oldest_age_seconds
            FROM outbox_events
            WHERE status = 'PENDING'
            "#,
        )
        .fetch_one(&self.pool)
        .await?;

        let pending_count: i64 = row.try_get("pending_count")?;
        let oldest_pending_age_seconds: Option<i64> = row.try_get("oldest_age_seconds")?;

        Ok(OutboxStats {
            pending_count: pending_count as u64,
            oldest_pending_age_seconds,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    async fn setup_test_db() -> Option<PostgresOutboxRepository> {
        let url = std::env::var("DATABASE_URL").ok()?;
        let pool = PgPool::connect(&url).await.ok()?;
        let repo = PostgresOutboxRepository::new(pool.clone());
        repo.run_migrations().await.ok()?;
        sqlx::query("TRUNCATE outbox_events")
            .execute(&pool)
            .await
            .ok()?;
        Some(repo)
    }

    fn envelope(entity_id: Uuid) -> EventEnvelope {
        EventEnvelope::new(
            "shipments",
            entity_id,
            "created",
            "shipping-api",
            json!({"status": "pending"}),
        )
    }

    #[tokio::test]
    #[ignore = "Requires PostgreSQL"]
    async fn test_insert_and_claim_roundtrip() {
        let Some(repo) = setup_test_db().await else {
            return;
        };
        let entity_id = Uuid::new_v4();

        let mut tx = repo.pool.begin().await.unwrap();
        repo.insert_event_with_tx(&mut tx, "shipments", &envelope(entity_id))
            .await
            .unwrap();
        tx.commit().await.unwrap();

        assert_eq!(repo.count_pending().await.unwrap(), 1);

        let mut tx = repo.pool.begin().await.unwrap();
        let claimed = repo.claim_pending_batch(&mut tx, 10).await.unwrap();
        assert_eq!(claimed.len(), 1);
        assert_eq!(claimed[0].aggregate_id, entity_id);
        assert_eq!(claimed[0].aggregate_type, "shipments");
        assert_eq!(claimed[0].event_type, "created");

        let decoded: EventEnvelope = serde_json::from_slice(&claimed[0].payload).unwrap();
        assert_eq!(decoded.entity_id, entity_id);

        let ids: Vec<Uuid> = claimed.iter().map(|e| e.id).collect();
        repo.delete_batch(&mut tx, &ids).await.unwrap();
        tx.commit().await.unwrap();

        assert_eq!(repo.count_pending().await.unwrap(), 0);
    }

    #[tokio::test]
    #[ignore = "Requires PostgreSQL"]
    async fn test_insert_rolls_back_with_transaction() {
        let Some(repo) = setup_test_db().await else {
            return;
        };

        let mut tx = repo.pool.begin().await.unwrap();
        repo.insert_event_with_tx(&mut tx, "shipments", &envelope(Uuid::new_v4()))
            .await
            .unwrap();
        drop(tx);

        assert_eq!(repo.count_pending().await.unwrap(), 0);
    }

    #[tokio::test]
    #[ignore = "Requires PostgreSQL"]
    async fn test_claim_skips_rows_locked_elsewhere() {
        let Some(repo) = setup_test_db().await else {
            return;
        };

        let mut tx = repo.pool.begin().await.unwrap();
        for _ in 0..4 {
            repo.insert_event_with_tx(&mut tx, "shipments", &envelope(Uuid::new_v4()))
                .await
                .unwrap();
        }
        tx.commit().await.unwrap();

        let mut first = repo.pool.begin().await.unwrap();
        let first_batch = repo.claim_pending_batch(&mut first, 2).await.unwrap();
        assert_eq!(first_batch.len(), 2);

        let mut second = repo.pool.begin().await.unwrap();
        let second_batch = repo.claim_pending_batch(&mut second, 10).await.unwrap();
        assert_eq!(second_batch.len(), 2);

        let first_ids: Vec<Uuid> = first_batch.iter().map(|e| e.id).collect();
        assert!(second_batch.iter().all(|e| !first_ids.contains(&e.id)));
    }

    #[tokio::test]
    #[ignore = "Requires PostgreSQL"]
    async fn test_stats_report_oldest_age() {
        let Some(repo) = setup_test_db().await else {
            return;
        };

        let stats = repo.get_stats().await.unwrap();
        assert_eq!(stats.pending_count, 0);
        assert!(stats.oldest_pending_age_seconds.is_none());

        let mut tx = repo.pool.begin().await.unwrap();
        repo.insert_event_with_tx(&mut tx, "shipments", &envelope(Uuid::new_v4()))
            .await
            .unwrap();
        tx.commit().await.unwrap();

        let stats = repo.get_stats().await.unwrap();
        assert!(stats.has_pending());
        assert!(stats.oldest_pending_age_seconds.is_some());
    }
}
