//! Tick decisions, in-flight exclusion and manual flushes.

use std::sync::Arc;
use std::time::Duration;

use rstest::{fixture, rstest};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use super::*;
use crate::domain::ports::BatchStoreError;
use crate::domain::{Conditions, Credential, NewWebhook};
use crate::outbound::persistence::MemoryBatchStore;
use crate::test_support::exporter::ScriptedExporter;
use crate::test_support::runtime::MutableClock;

struct Harness {
    clock: Arc<MutableClock>,
    store: Arc<MemoryBatchStore>,
    exporter: Arc<ScriptedExporter>,
    scheduler: Arc<FlushScheduler>,
}

fn build(exporter: ScriptedExporter, check_interval: Duration) -> Harness {
    let clock = Arc::new(MutableClock::fixed());
    let store = Arc::new(MemoryBatchStore::new(clock.clone()));
    let exporter = Arc::new(exporter);
    let scheduler = Arc::new(FlushScheduler::new(
        store.clone(),
        exporter.clone(),
        clock.clone(),
        FlushSchedulerConfig { check_interval },
    ));
    Harness {
        clock,
        store,
        exporter,
        scheduler,
    }
}

#[fixture]
fn harness() -> Harness {
    build(ScriptedExporter::new(), Duration::from_secs(15))
}

impl Harness {
    async fn register(&self, conditions: Conditions) -> WebhookHash {
        self.store
            .register(NewWebhook {
                project_id: 42,
                credential: Credential::new("storage-token").expect("credential"),
                table_id: "in.c-hooks.events".parse().expect("table id"),
                conditions,
            })
            .await
            .expect("register")
            .hash
    }

    async fn append(&self, hash: &WebhookHash, rows: usize) {
        for index in 0..rows {
            self.store
                .append_row(hash, "{}", &format!("row {index}"))
                .await
                .expect("append");
        }
    }
}

fn count(threshold: u32) -> Conditions {
    Conditions::from_parts(Some(threshold), None, None).expect("conditions")
}

#[rstest]
#[tokio::test]
async fn count_threshold_triggers_once_past_the_limit(harness: Harness) {
    let hash = harness.register(count(3)).await;
    harness.append(&hash, 3).await;

    let report = harness.scheduler.tick().await;
    assert!(report.triggered.is_empty());
    assert_eq!(report.skipped_conditions, 1);

    harness.append(&hash, 1).await;
    let report = harness.scheduler.tick().await;
    assert_eq!(report.triggered, vec![hash.clone()]);

    harness.scheduler.wait_for_exports().await;
    assert_eq!(harness.exporter.calls(), 1);
    assert_eq!(harness.exporter.hashes(), vec![hash]);
}

#[rstest]
#[tokio::test]
async fn empty_webhooks_are_skipped(harness: Harness) {
    harness.register(count(0)).await;

    let report = harness.scheduler.tick().await;

    assert_eq!(report.skipped_empty, 1);
    assert!(report.triggered.is_empty());
}

#[rstest]
#[tokio::test]
async fn time_threshold_uses_the_clock(harness: Harness) {
    let conditions =
        Conditions::from_parts(None, Some(Duration::from_secs(60)), None).expect("conditions");
    let hash = harness.register(conditions).await;
    harness.append(&hash, 1).await;

    assert!(harness.scheduler.tick().await.triggered.is_empty());

    harness.clock.advance(Duration::from_secs(61));
    assert_eq!(harness.scheduler.tick().await.triggered, vec![hash]);
}

#[rstest]
#[tokio::test]
async fn running_export_blocks_retrigger_until_it_finishes() {
    let gate = Arc::new(Notify::new());
    let h = build(ScriptedExporter::gated(gate.clone()), Duration::from_secs(15));
    let hash = h.register(count(1)).await;
    h.append(&hash, 2).await;

    assert_eq!(h.scheduler.tick().await.triggered, vec![hash.clone()]);
    h.exporter.started().await;
    assert!(h.scheduler.in_flight().contains(&hash));

    let report = h.scheduler.tick().await;
    assert_eq!(report.skipped_in_flight, 1);
    assert!(report.triggered.is_empty());

    gate.notify_one();
    h.scheduler.wait_for_exports().await;
    assert!(h.scheduler.in_flight().is_empty());

    let report = h.scheduler.tick().await;
    assert_eq!(report.triggered, vec![hash]);
    gate.notify_one();
    h.scheduler.wait_for_exports().await;
    assert_eq!(h.exporter.calls(), 2);
}

#[rstest]
#[tokio::test]
async fn failed_export_clears_the_mark() {
    let h = build(
        ScriptedExporter::new().with_outcomes([Err(Error::service_unavailable("upload down"))]),
        Duration::from_secs(15),
    );
    let hash = h.register(count(0)).await;
    h.append(&hash, 1).await;

    h.scheduler.tick().await;
    h.scheduler.wait_for_exports().await;

    assert!(h.scheduler.in_flight().is_empty());
    assert_eq!(h.scheduler.tick().await.triggered, vec![hash]);
}

#[rstest]
#[tokio::test]
async fn listing_failure_is_reported_as_an_empty_tick(harness: Harness) {
    let hash = harness.register(count(0)).await;
    harness.append(&hash, 1).await;
    harness
        .store
        .fail_next(BatchStoreError::connection("database restarting"));

    let report = harness.scheduler.tick().await;

    assert_eq!(report, TickReport::default());
    assert_eq!(harness.exporter.calls(), 0);
}

#[rstest]
#[tokio::test]
async fn manual_flush_reports_in_progress_during_scheduled_export() {
    let gate = Arc::new(Notify::new());
    let h = build(ScriptedExporter::gated(gate.clone()), Duration::from_secs(15));
    let hash = h.register(count(0)).await;
    h.append(&hash, 1).await;

    h.scheduler.tick().await;
    h.exporter.started().await;

    let status = h.scheduler.flush_now(&hash).await.expect("manual flush");
    assert_eq!(status, ManualFlushStatus::InProgress);

    gate.notify_one();
    h.scheduler.wait_for_exports().await;
    assert_eq!(h.exporter.calls(), 1);
}

#[rstest]
#[tokio::test]
async fn manual_flush_runs_the_export(harness: Harness) {
    let hash = harness.register(Conditions::new()).await;
    harness.append(&hash, 1).await;

    let status = harness
        .scheduler
        .flush_now(&hash)
        .await
        .expect("manual flush");

    assert!(matches!(
        status,
        ManualFlushStatus::Completed(ExportOutcome::Exported { .. })
    ));
    assert!(harness.scheduler.in_flight().is_empty());
}

#[rstest]
#[tokio::test]
async fn run_ticks_until_cancelled() {
    let h = build(ScriptedExporter::new(), Duration::from_millis(10));
    let hash = h.register(count(0)).await;
    h.append(&hash, 1).await;
    let shutdown = CancellationToken::new();

    let handle = h.scheduler.spawn(shutdown.clone());
    h.exporter.started().await;
    shutdown.cancel();
    handle.await.expect("scheduler task");
    h.scheduler.wait_for_exports().await;

    assert!(h.exporter.calls() >= 1);
}
