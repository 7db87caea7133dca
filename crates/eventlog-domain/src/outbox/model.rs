//! Outbox Event Model
//!
//! Domain model for outbox rows used in the Transactional Outbox Pattern.
//! A row's existence is its "pending" state: the relay deletes rows after a
//! successful publish, so there is no terminal SENT status to track.

use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Error types for outbox operations
#[derive(Debug, thiserror::Error)]
pub enum OutboxError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Infrastructure error: {message}")]
    InfrastructureError { message: String },
}

/// A pending outbox row claimed from the database.
///
/// The routing keys (`aggregate_id`, `aggregate_type`, `event_type`) mirror
/// envelope fields so the relay can build broker messages without
/// deserializing the payload.
#[derive(Debug, Clone)]
pub struct OutboxEvent {
    pub id: Uuid,
    pub aggregate_id: Uuid,
    pub aggregate_type: String,
    pub event_type: String,
    /// Serialized envelope, opaque to the relay.
    pub payload: Vec<u8>,
    /// Destination stream name.
    pub topic: String,
    pub created_at: DateTime<Utc>,
}

impl OutboxEvent {
    /// Age of the row, used for stuck-row monitoring.
    pub fn age(&self) -> chrono::Duration {
        Utc::now().signed_duration_since(self.created_at)
    }
}

/// Statistics about the outbox table, for monitoring and alerting.
///
/// The core retries failing rows forever; operators are expected to watch
/// `oldest_pending_age_seconds` for rows that never drain.
#[derive(Debug, Clone)]
pub struct OutboxStats {
    pub pending_count: u64,
    pub oldest_pending_age_seconds: Option<i64>,
}

impl OutboxStats {
    pub fn has_pending(&self) -> bool {
        self.pending_count > 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outbox_event_age() {
        let event = OutboxEvent {
            id: Uuid::new_v4(),
            aggregate_id: Uuid::new_v4(),
            aggregate_type: "shipments".to_string(),
            event_type: "created".to_string(),
            payload: b"{}".to_vec(),
            topic: "shipments".to_string(),
            created_at: Utc::now() - chrono::Duration::seconds(90),
        };

        assert!(event.age().num_seconds() >= 90);
    }

    #[test]
    fn test_stats_has_pending() {
        let stats = OutboxStats {
            pending_count: 0,
            oldest_pending_age_seconds: None,
        };
        assert!(!stats.has_pending());

        let stats = OutboxStats {
            pending_count: 3,
            oldest_pending_age_seconds: Some(12),
        };
        assert!(stats.has_pending());
    }
}
