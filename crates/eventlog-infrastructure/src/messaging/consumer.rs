//! Event Consumer and Dispatcher
//!
//! The consumer pulls messages from the broker, decodes the envelope and
//! hands it to the dispatcher. Every message is acknowledged after dispatch,
//! including malformed ones: a poison message is logged and skipped rather
//! than redelivered forever, and a failing handler never blocks the stream.
//!
//! Dispatch runs two independent paths per event. System handlers are
//! hard-wired per entity type and always run. Rule actions are resolved at
//! dispatch time from the rule store, so routing changes apply without a
//! restart.

use eventlog_domain::event_bus::{EventBus, InboundMessage};
use eventlog_domain::events::EventEnvelope;
use eventlog_domain::registry::{ActionRegistry, SystemHandlerRegistry};
use eventlog_domain::rules::{RuleEngine, RuleStore};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, instrument, warn};

/// Consumer tuning knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsumerConfig {
    /// Topics to subscribe to.
    pub topics: Vec<String>,
    /// Consumer group name; instances sharing it split the stream.
    #[serde(default = "default_group")]
    pub group: String,
    /// How long to wait on an idle stream before re-checking shutdown.
    #[serde(default = "default_idle_timeout_ms")]
    pub idle_timeout_ms: u64,
}

fn default_group() -> String {
    "eventlog-dispatcher".to_string()
}

const fn default_idle_timeout_ms() -> u64 {
    500
}

impl ConsumerConfig {
    pub fn new(topics: Vec<String>) -> Self {
        Self {
            topics,
            group: default_group(),
            idle_timeout_ms: default_idle_timeout_ms(),
        }
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms)
    }
}

/// What happened during a single dispatch.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct DispatchOutcome {
    pub system_handlers_run: usize,
    pub system_handlers_failed: usize,
    pub actions_run: usize,
    pub actions_failed: usize,
    /// Rules that matched but named an unregistered action type.
    pub actions_skipped: usize,
}

/// Routes a decoded envelope to system handlers and rule actions.
///
/// Both registries are immutable; all runtime variability goes through the
/// rule store. Handler failures are logged and counted, never propagated,
/// so one bad handler cannot stall the stream.
pub struct EventDispatcher<S> {
    engine: RuleEngine<S>,
    actions: ActionRegistry,
    system_handlers: SystemHandlerRegistry,
}

impl<S: RuleStore> EventDispatcher<S> {
    pub fn new(
        rule_store: Arc<S>,
        actions: ActionRegistry,
        system_handlers: SystemHandlerRegistry,
    ) -> Self {
        Self {
            engine: RuleEngine::new(rule_store),
            actions,
            system_handlers,
        }
    }

    #[instrument(skip(self, envelope), fields(entity_type = %envelope.entity_type, action = %envelope.action, event_id = %envelope.event_id))]
    pub async fn dispatch(&self, envelope: &EventEnvelope) -> DispatchOutcome {
        let mut outcome = DispatchOutcome::default();

        for handler in self.system_handlers.handlers_for(&envelope.entity_type) {
            match handler.handle(&envelope.data).await {
                Ok(()) => outcome.system_handlers_run += 1,
                Err(e) => {
                    outcome.system_handlers_failed += 1;
                    error!(error = %e, "System handler failed");
                }
            }
        }

        let rules = match self
            .engine
            .matching_rules(&envelope.entity_type, &envelope.action, &envelope.data)
            .await
        {
            Ok(rules) => rules,
            Err(e) => {
                error!(error = %e, "Rule lookup failed, skipping rule actions");
                return outcome;
            }
        };

        for rule in rules {
            let Some(action) = self.actions.get(&rule.action_type) else {
                outcome.actions_skipped += 1;
                warn!(
                    rule_id = %rule.id,
                    action_type = %rule.action_type,
                    "No action registered for rule, skipping"
                );
                continue;
            };

            match action.execute(&envelope.data, &rule.action_config).await {
                Ok(()) => outcome.actions_run += 1,
                Err(e) => {
                    outcome.actions_failed += 1;
                    error!(rule_id = %rule.id, error = %e, "Rule action failed");
                }
            }
        }

        outcome
    }
}

/// Background worker consuming broker messages and dispatching them.
pub struct EventConsumer<S> {
    event_bus: Arc<dyn EventBus>,
    dispatcher: EventDispatcher<S>,
    config: ConsumerConfig,
    shutdown: Arc<AtomicBool>,
}

impl<S: RuleStore> EventConsumer<S> {
    pub fn new(
        event_bus: Arc<dyn EventBus>,
        dispatcher: EventDispatcher<S>,
        config: ConsumerConfig,
    ) -> Self {
        Self {
            event_bus,
            dispatcher,
            config,
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Handle that stops [`run`] after the in-flight message.
    ///
    /// [`run`]: EventConsumer::run
    pub fn shutdown_handle(&self) -> Arc<AtomicBool> {
        self.shutdown.clone()
    }

    /// Runs the consume loop until the shutdown flag is raised or the stream
    /// ends.
    pub async fn run(&self) -> Result<(), eventlog_domain::event_bus::EventBusError> {
        info!(
            topics = ?self.config.topics,
            group = %self.config.group,
            "Event consumer started"
        );

        let mut stream = self
            .event_bus
            .subscribe(&self.config.topics, &self.config.group)
            .await?;

        use futures::StreamExt;
        while !self.shutdown.load(Ordering::SeqCst) {
            let next = tokio::time::timeout(self.config.idle_timeout(), stream.next()).await;
            match next {
                // Idle; loop back to re-check the shutdown flag.
                Err(_) => continue,
                Ok(None) => {
                    info!("Broker stream ended");
                    break;
                }
                Ok(Some(Err(e))) => {
                    warn!(error = %e, "Broker stream error");
                }
                Ok(Some(Ok(message))) => {
                    self.handle_message(message).await;
                }
            }
        }

        info!("Event consumer stopped");
        Ok(())
    }

    /// Decodes and dispatches one message, then always acknowledges it.
    async fn handle_message(&self, message: InboundMessage) {
        let InboundMessage {
            topic,
            payload,
            acker,
        } = message;

        match serde_json::from_slice::<EventEnvelope>(&payload) {
            Ok(envelope) => {
                let outcome = self.dispatcher.dispatch(&envelope).await;
                debug!(topic = %topic, ?outcome, "Event dispatched");
            }
            Err(e) => {
                // Poison message: acknowledge anyway so it never wedges the
                // stream.
                warn!(topic = %topic, error = %e, "Malformed event payload, skipping");
            }
        }

        if let Err(e) = acker.ack().await {
            error!(topic = %topic, error = %e, "Failed to acknowledge message");
        }
    }
}
