//! Handler registries for the dispatcher.
//!
//! Two kinds of handlers run against incoming events. System handlers are
//! hard-wired per entity type and run for every event of that type. Actions
//! are named handlers resolved through rules at dispatch time. Both
//! registries are built once at startup and shared immutably; runtime
//! behavior changes go through rules, not through registry mutation.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

/// Error returned by a handler execution.
///
/// The dispatcher logs these and moves on; a failing handler never blocks
/// the rest of the dispatch.
#[derive(Debug, Error)]
pub enum ActionError {
    #[error("Action failed: {0}")]
    Failed(String),

    #[error("Invalid action config: {0}")]
    InvalidConfig(String),
}

/// A named handler invoked when a rule matches.
///
/// `config` is the matched rule's `action_config`, opaque to the dispatcher.
#[async_trait]
pub trait Action: Send + Sync {
    async fn execute(
        &self,
        data: &serde_json::Value,
        config: &serde_json::Value,
    ) -> Result<(), ActionError>;
}

/// A hard-wired handler that runs for every event of its entity type.
#[async_trait]
pub trait SystemHandler: Send + Sync {
    async fn handle(&self, data: &serde_json::Value) -> Result<(), ActionError>;
}

/// Immutable map from action name to handler.
#[derive(Clone, Default)]
pub struct ActionRegistry {
    actions: HashMap<String, Arc<dyn Action>>,
}

impl ActionRegistry {
    pub fn builder() -> ActionRegistryBuilder {
        ActionRegistryBuilder::default()
    }

    pub fn get(&self, action_type: &str) -> Option<&Arc<dyn Action>> {
        self.actions.get(action_type)
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }
}

impl std::fmt::Debug for ActionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActionRegistry")
            .field("actions", &self.actions.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[derive(Default)]
pub struct ActionRegistryBuilder {
    actions: HashMap<String, Arc<dyn Action>>,
}

impl ActionRegistryBuilder {
    /// Registers a handler under `name`. Re-registering a name replaces the
    /// previous handler.
    pub fn register(mut self, name: impl Into<String>, action: Arc<dyn Action>) -> Self {
        self.actions.insert(name.into(), action);
        self
    }

    pub fn build(self) -> ActionRegistry {
        ActionRegistry {
            actions: self.actions,
        }
    }
}

/// Immutable map from entity type to its system handlers.
///
/// An entity type may carry several handlers; they all run, in registration
/// order, for every event of that type.
#[derive(Clone, Default)]
pub struct SystemHandlerRegistry {
    handlers: HashMap<String, Vec<Arc<dyn SystemHandler>>>,
}

impl SystemHandlerRegistry {
    pub fn builder() -> SystemHandlerRegistryBuilder {
        SystemHandlerRegistryBuilder::default()
    }

    pub fn handlers_for(&self, entity_type: &str) -> &[Arc<dyn SystemHandler>] {
        self.handlers
            .get(entity_type)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}

impl std::fmt::Debug for SystemHandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let counts: HashMap<_, _> = self
            .handlers
            .iter()
            .map(|(k, v)| (k.as_str(), v.len()))
            .collect();
        f.debug_struct("SystemHandlerRegistry")
            .field("handlers", &counts)
            .finish()
    }
}

#[derive(Default)]
pub struct SystemHandlerRegistryBuilder {
    handlers: HashMap<String, Vec<Arc<dyn SystemHandler>>>,
}

impl SystemHandlerRegistryBuilder {
    pub fn register(
        mut self,
        entity_type: impl Into<String>,
        handler: Arc<dyn SystemHandler>,
    ) -> Self {
        self.handlers
            .entry(entity_type.into())
            .or_default()
            .push(handler);
        self
    }

    pub fn build(self) -> SystemHandlerRegistry {
        SystemHandlerRegistry {
            handlers: self.handlers,
        }
    }
}
