//! Periodic evaluation of flush conditions.
//!
//! Every tick walks all webhooks, skips those already exporting or holding no
//! rows, and spawns an export for each webhook whose conditions hold. At most
//! one export per hash runs at a time; manual flushes share the same marks.

use std::sync::Arc;
use std::time::Duration;

use mockable::Clock;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info};

use crate::domain::export_pipeline::{BatchExporter, ExportOutcome};
use crate::domain::ports::BatchStore;
use crate::domain::{Error, Webhook, WebhookHash};

mod in_flight;

pub use in_flight::{InFlightGuard, InFlightSet};

/// Scheduler tunables.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlushSchedulerConfig {
    /// Time between ticks.
    pub check_interval: Duration,
}

impl Default for FlushSchedulerConfig {
    fn default() -> Self {
        Self {
            check_interval: Duration::from_secs(15),
        }
    }
}

/// What one tick decided.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    /// Hashes whose export was spawned.
    pub triggered: Vec<WebhookHash>,
    /// Webhooks skipped because an export is running.
    pub skipped_in_flight: usize,
    /// Webhooks skipped because nothing is buffered.
    pub skipped_empty: usize,
    /// Webhooks whose conditions did not hold.
    pub skipped_conditions: usize,
    /// Webhooks whose row count could not be read.
    pub failed: usize,
}

/// Result of a manual flush.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ManualFlushStatus {
    /// Another export for the hash is running; nothing was done.
    InProgress,
    /// The export ran to completion.
    Completed(ExportOutcome),
}

/// Timer-driven export trigger.
pub struct FlushScheduler {
    store: Arc<dyn BatchStore>,
    exporter: Arc<dyn BatchExporter>,
    clock: Arc<dyn Clock>,
    in_flight: InFlightSet,
    tick_lock: Mutex<()>,
    exports: TaskTracker,
    config: FlushSchedulerConfig,
}

impl FlushScheduler {
    /// Build a scheduler with an empty in-flight set.
    pub fn new(
        store: Arc<dyn BatchStore>,
        exporter: Arc<dyn BatchExporter>,
        clock: Arc<dyn Clock>,
        config: FlushSchedulerConfig,
    ) -> Self {
        Self {
            store,
            exporter,
            clock,
            in_flight: InFlightSet::new(),
            tick_lock: Mutex::new(()),
            exports: TaskTracker::new(),
            config,
        }
    }

    /// In-flight marks shared by scheduled and manual exports.
    pub fn in_flight(&self) -> &InFlightSet {
        &self.in_flight
    }

    /// Run [`Self::run`] on a new task.
    pub fn spawn(self: &Arc<Self>, shutdown: CancellationToken) -> JoinHandle<()> {
        let scheduler = Arc::clone(self);
        tokio::spawn(async move { scheduler.run(shutdown).await })
    }

    /// Tick every check interval until `shutdown` fires. The first tick
    /// happens one interval after start.
    pub async fn run(&self, shutdown: CancellationToken) {
        let period = self.config.check_interval;
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(interval = ?period, "flush scheduler started");

        loop {
            tokio::select! {
                biased;
                () = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    self.tick().await;
                }
            }
        }
        info!("flush scheduler stopped");
    }

    /// Evaluate every webhook once and spawn the exports that are due.
    pub async fn tick(&self) -> TickReport {
        let _serialised = self.tick_lock.lock().await;
        let mut report = TickReport::default();

        let webhooks = match self.store.all_webhooks().await {
            Ok(webhooks) => webhooks,
            Err(err) => {
                error!(error = %err, "cannot list webhooks");
                return report;
            }
        };
        let now = self.clock.utc();

        for webhook in webhooks {
            if self.in_flight.contains(&webhook.hash) {
                info!(hash = %webhook.hash, "skipped import: in progress");
                report.skipped_in_flight += 1;
                continue;
            }
            let count = match self.store.count_rows(webhook.id).await {
                Ok(count) => count,
                Err(err) => {
                    error!(hash = %webhook.hash, error = %err, "cannot count buffered rows");
                    report.failed += 1;
                    continue;
                }
            };
            if count == 0 {
                debug!(hash = %webhook.hash, "skipped import: count=0");
                report.skipped_empty += 1;
                continue;
            }
            if !webhook
                .conditions
                .should_flush(count, webhook.age(now), webhook.size_bytes)
            {
                debug!(hash = %webhook.hash, count, "skipped import: condition=false");
                report.skipped_conditions += 1;
                continue;
            }
            match self.in_flight.try_acquire(&webhook.hash) {
                Some(guard) => {
                    report.triggered.push(webhook.hash.clone());
                    self.spawn_export(webhook, guard);
                }
                None => report.skipped_in_flight += 1,
            }
        }
        report
    }

    fn spawn_export(&self, webhook: Webhook, guard: InFlightGuard) {
        let exporter = Arc::clone(&self.exporter);
        self.exports.spawn(async move {
            let _guard = guard;
            match exporter.export(&webhook.hash).await {
                Ok(ExportOutcome::Exported { rows, job_id, .. }) => {
                    info!(hash = %webhook.hash, table_id = %webhook.table_id, rows, job_id, "imported");
                }
                Ok(ExportOutcome::NothingToExport) => {
                    debug!(hash = %webhook.hash, "nothing to import");
                }
                Err(err) => {
                    error!(hash = %webhook.hash, error = %err, "cannot import");
                }
            }
        });
    }

    /// Export `hash` now unless an export for it is already running.
    ///
    /// # Errors
    ///
    /// Propagates the export failure; the batch stays buffered.
    pub async fn flush_now(&self, hash: &WebhookHash) -> Result<ManualFlushStatus, Error> {
        let Some(guard) = self.in_flight.try_acquire(hash) else {
            info!(%hash, "manual flush skipped: in progress");
            return Ok(ManualFlushStatus::InProgress);
        };
        let outcome = self.exporter.export(hash).await;
        drop(guard);
        outcome.map(ManualFlushStatus::Completed)
    }

    /// Wait until every spawned export finished.
    pub async fn wait_for_exports(&self) {
        self.exports.close();
        self.exports.wait().await;
        self.exports.reopen();
    }
}

#[cfg(test)]
mod tests;
