//! Outbox Relay
//!
//! Background loop moving outbox rows to the broker. Each tick opens its own
//! transaction, claims a batch with `FOR UPDATE SKIP LOCKED`, publishes it,
//! deletes the claimed rows and commits. A failure anywhere before the commit
//! rolls the transaction back, releasing the claim so the rows are retried on
//! a later tick. Delivery is therefore at least once: a crash between the
//! broker ack and the commit republishes the batch.

use eventlog_domain::event_bus::{BrokerMessage, EventBus};
use eventlog_domain::outbox::{OutboxError, OutboxEvent, OutboxRepository, OutboxStats};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

/// Relay tuning knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboxRelayConfig {
    /// Maximum rows claimed per tick.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Sleep between ticks when the outbox is not full.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Upper bound on a single tick, claim to commit.
    #[serde(default = "default_batch_timeout_ms")]
    pub batch_timeout_ms: u64,
}

impl Default for OutboxRelayConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            poll_interval_ms: default_poll_interval_ms(),
            batch_timeout_ms: default_batch_timeout_ms(),
        }
    }
}

const fn default_batch_size() -> usize {
    50
}

const fn default_poll_interval_ms() -> u64 {
    500
}

const fn default_batch_timeout_ms() -> u64 {
    5_000
}

/// Claimed rows older than this have been failing to publish for a while.
const STUCK_ROW_WARN_AGE_SECS: i64 = 60;

/// Age of the oldest claimed row. The claim orders by `created_at`
/// ascending, so that is the first one.
fn oldest_row_age(events: &[OutboxEvent]) -> Option<chrono::Duration> {
    events.first().map(OutboxEvent::age)
}

impl OutboxRelayConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn batch_timeout(&self) -> Duration {
        Duration::from_millis(self.batch_timeout_ms)
    }
}

/// Counters accumulated by a running relay.
#[derive(Debug, Default)]
pub struct OutboxRelayMetrics {
    pub events_published_total: u64,
    pub batches_total: u64,
    pub failed_batches_total: u64,
    pub last_batch_size: usize,
}

impl OutboxRelayMetrics {
    fn record_batch(&mut self, published: usize) {
        self.batches_total += 1;
        self.events_published_total += published as u64;
        self.last_batch_size = published;
    }

    fn record_failure(&mut self) {
        self.failed_batches_total += 1;
    }
}

impl std::fmt::Display for OutboxRelayMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "published={} batches={} failed_batches={} last_batch={}",
            self.events_published_total,
            self.batches_total,
            self.failed_batches_total,
            self.last_batch_size
        )
    }
}

/// Background worker relaying outbox rows to the broker.
pub struct OutboxRelay {
    pool: PgPool,
    repository: Arc<dyn OutboxRepository>,
    event_bus: Arc<dyn EventBus>,
    config: OutboxRelayConfig,
    metrics: Arc<Mutex<OutboxRelayMetrics>>,
    shutdown: Arc<AtomicBool>,
}

impl OutboxRelay {
    pub fn new(
        pool: PgPool,
        repository: Arc<dyn OutboxRepository>,
        event_bus: Arc<dyn EventBus>,
        config: OutboxRelayConfig,
    ) -> Self {
        Self {
            pool,
            repository,
            event_bus,
            config,
            metrics: Arc::new(Mutex::new(OutboxRelayMetrics::default())),
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Handle that stops [`run`] after the current tick.
    ///
    /// [`run`]: OutboxRelay::run
    pub fn shutdown_handle(&self) -> Arc<AtomicBool> {
        self.shutdown.clone()
    }

    pub fn metrics(&self) -> Arc<Mutex<OutboxRelayMetrics>> {
        self.metrics.clone()
    }

    /// Runs the polling loop until the shutdown flag is raised.
    pub async fn run(&self) {
        info!(
            batch_size = self.config.batch_size,
            poll_interval_ms = self.config.poll_interval_ms,
            "Outbox relay started"
        );

        while !self.shutdown.load(Ordering::SeqCst) {
            let published =
                match tokio::time::timeout(self.config.batch_timeout(), self.process_batch())
                    .await
                {
                    Ok(Ok(published)) => published,
                    Ok(Err(e)) => {
                        error!("Outbox batch failed: {}", e);
                        self.metrics.lock().unwrap().record_failure();
                        0
                    }
                    Err(_) => {
                        warn!(
                            timeout_ms = self.config.batch_timeout_ms,
                            "Outbox batch timed out"
                        );
                        self.metrics.lock().unwrap().record_failure();
                        0
                    }
                };

            // A full batch hints at backlog; drain it without sleeping.
            if published == self.config.batch_size {
                continue;
            }

            tokio::time::sleep(self.config.poll_interval()).await;
        }

        info!("Outbox relay stopped");
    }

    /// Queue depth and oldest pending row age, for monitoring.
    pub async fn outbox_stats(&self) -> Result<OutboxStats, OutboxError> {
        self.repository.get_stats().await
    }

    /// One relay tick. Returns the number of rows published and deleted.
    #[instrument(skip(self))]
    pub async fn process_batch(&self) -> Result<usize, OutboxError> {
        let mut tx = self.pool.begin().await?;

        let events = self
            .repository
            .claim_pending_batch(&mut tx, self.config.batch_size)
            .await?;
        if events.is_empty() {
            return Ok(0);
        }

        if let Some(age) = oldest_row_age(&events) {
            if age.num_seconds() >= STUCK_ROW_WARN_AGE_SECS {
                warn!(
                    oldest_age_secs = age.num_seconds(),
                    "Claimed rows include one pending for a long time, check the broker"
                );
            }
        }

        let messages: Vec<BrokerMessage> = events.iter().map(BrokerMessage::from).collect();

        // Dropping the transaction on the error path rolls it back and
        // releases the claim, so the rows are retried next tick.
        self.event_bus
            .publish_batch(&messages)
            .await
            .map_err(|e| OutboxError::InfrastructureError {
                message: format!("broker publish failed: {e}"),
            })?;

        let ids: Vec<Uuid> = events.iter().map(|e| e.id).collect();
        self.repository.delete_batch(&mut tx, &ids).await?;
        tx.commit().await?;

        let published = ids.len();
        self.metrics.lock().unwrap().record_batch(published);
        debug!(published, "Outbox batch relayed");
        Ok(published)
    }
}
