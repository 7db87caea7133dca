//! Event envelope and change tracking.
//!
//! The envelope is the standard message format for every event that flows
//! through the outbox. It is immutable after construction: `event_id` and
//! `timestamp` are assigned exactly once, at write time.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A single field-level change carried alongside an `updated` event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Change {
    pub field: String,
    pub old_value: serde_json::Value,
    pub new_value: serde_json::Value,
}

impl Change {
    pub fn new(
        field: impl Into<String>,
        old_value: serde_json::Value,
        new_value: serde_json::Value,
    ) -> Self {
        Self {
            field: field.into(),
            old_value,
            new_value,
        }
    }
}

/// Standard message format for all events published through the event log.
///
/// Serialized as JSON into the outbox row's payload; the same bytes travel
/// through the broker untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub event_id: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actor_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actor_role: Option<String>,
    /// Logical aggregate name, e.g. "shipments".
    pub entity_type: String,
    pub entity_id: Uuid,
    /// Lifecycle verb, e.g. "created", "updated", "deleted".
    pub action: String,
    pub source_service: String,
    /// Correlates the event with the inbound request that produced it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub data: serde_json::Value,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub changes: Vec<Change>,
}

impl EventEnvelope {
    /// Create a new envelope. `event_id` and `timestamp` are assigned here
    /// and never change afterwards.
    pub fn new(
        entity_type: impl Into<String>,
        entity_id: Uuid,
        action: impl Into<String>,
        source_service: impl Into<String>,
        data: serde_json::Value,
    ) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            actor_id: None,
            actor_role: None,
            entity_type: entity_type.into(),
            entity_id,
            action: action.into(),
            source_service: source_service.into(),
            request_id: None,
            timestamp: Utc::now(),
            data,
            changes: Vec::new(),
        }
    }

    /// Attach the actor that triggered the event. The identity is passed
    /// explicitly by the caller, never read from ambient context.
    pub fn with_actor(mut self, actor_id: Uuid, actor_role: impl Into<String>) -> Self {
        self.actor_id = Some(actor_id);
        self.actor_role = Some(actor_role.into());
        self
    }

    /// Attach the id of the request that triggered the event.
    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    /// Attach a field-level change list, usually built via [`TrackChanges`].
    pub fn with_changes(mut self, changes: Vec<Change>) -> Self {
        self.changes = changes;
        self
    }
}

/// Explicit per-entity change tracking.
///
/// Entities implement this by comparing their own fields, typically with
/// [`compare_field`]. This keeps the change list stable under refactors,
/// unlike runtime field inspection.
pub trait TrackChanges {
    /// Field-level differences between `old` and `self`.
    fn changes_since(&self, old: &Self) -> Vec<Change>;
}

/// Push a [`Change`] for `field` when `old` and `new` differ.
///
/// Serialization failures are silently treated as "no change"; a value that
/// cannot be serialized cannot appear in the envelope either.
pub fn compare_field<T: Serialize + PartialEq>(
    changes: &mut Vec<Change>,
    field: &str,
    old: &T,
    new: &T,
) {
    if old == new {
        return;
    }
    if let (Ok(old_value), Ok(new_value)) =
        (serde_json::to_value(old), serde_json::to_value(new))
    {
        changes.push(Change::new(field, old_value, new_value));
    }
}
