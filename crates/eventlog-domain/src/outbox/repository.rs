//! Outbox Repository Trait
//!
//! Abstraction for outbox row persistence. All mutating operations take the
//! caller's transaction: the writer joins the business transaction, and the
//! relay claims, publishes and deletes within a transaction of its own so a
//! crashed batch simply releases its row locks on rollback.

use crate::events::EventEnvelope;
use crate::outbox::{OutboxError, OutboxEvent, OutboxStats};
use sqlx::PgTransaction;
use uuid::Uuid;

/// Repository for outbox row persistence.
#[async_trait::async_trait]
pub trait OutboxRepository: Send + Sync {
    /// Serialize the envelope and insert an outbox row inside the caller's
    /// transaction.
    ///
    /// This is the write half of the Transactional Outbox Pattern: the caller
    /// supplies the transaction it is already using for the business
    /// mutation, so either both commit or neither does. Serialization failure
    /// returns an error without writing anything; storage failure propagates
    /// and rolls the enclosing transaction back.
    async fn insert_event_with_tx(
        &self,
        tx: &mut PgTransaction<'_>,
        topic: &str,
        envelope: &EventEnvelope,
    ) -> Result<(), OutboxError>;

    /// Claim up to `limit` pending rows, oldest first, inside the relay's
    /// transaction.
    ///
    /// Uses `FOR UPDATE SKIP LOCKED` so concurrent relay instances never
    /// claim the same row; rows locked by a crashed instance become visible
    /// again as soon as its transaction rolls back.
    async fn claim_pending_batch(
        &self,
        tx: &mut PgTransaction<'_>,
        limit: usize,
    ) -> Result<Vec<OutboxEvent>, OutboxError>;

    /// Delete exactly the claimed rows after a successful publish.
    ///
    /// Must run in the same transaction as the claim; committing it completes
    /// the batch.
    async fn delete_batch(
        &self,
        tx: &mut PgTransaction<'_>,
        ids: &[Uuid],
    ) -> Result<(), OutboxError>;

    /// Count pending rows, for monitoring.
    async fn count_pending(&self) -> Result<u64, OutboxError>;

    /// Outbox statistics, for monitoring and alerting on stuck rows.
    async fn get_stats(&self) -> Result<OutboxStats, OutboxError>;
}
