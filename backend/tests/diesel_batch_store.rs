//! Integration tests for `DieselBatchStore` against embedded PostgreSQL.
//!
//! Each test boots a cluster through `pg-embed-setup-unpriv`, applies the
//! shipped migration inside a fresh schema and drives the store on its own
//! runtime. Setup failures panic unless `SKIP_TEST_CLUSTER` is set.

use std::sync::Arc;
use std::time::Duration;

use diesel_async::{AsyncConnection, AsyncPgConnection, SimpleAsyncConnection};
use pg_embedded_setup_unpriv::TestCluster;
use rstest::{fixture, rstest};
use tokio::runtime::Runtime;

use webhook_batcher::domain::ports::{BatchStore, BatchStoreError};
use webhook_batcher::domain::{BufferedRow, Conditions, Credential, NewWebhook, WebhookHash};
use webhook_batcher::outbound::persistence::{DbPool, DieselBatchStore, PoolConfig};
use webhook_batcher::test_support::runtime::MutableClock;

mod support;

use support::{handle_cluster_setup_failure, test_cluster};

const MIGRATION: &str = include_str!("../migrations/2026-01-15-090000_create_webhooks/up.sql");
const ADMIN_DB: &str = "postgres";

struct TestContext {
    store: Arc<DieselBatchStore>,
    clock: Arc<MutableClock>,
    runtime: Runtime,
    _cluster: TestCluster,
}

async fn provision(base_url: &str) -> Result<(Arc<DieselBatchStore>, Arc<MutableClock>), String> {
    let schema = format!("webhooks_test_{:08x}", rand::random::<u32>());
    let mut admin = AsyncPgConnection::establish(base_url)
        .await
        .map_err(|err| format!("connect: {err}"))?;
    admin
        .batch_execute(&format!("CREATE SCHEMA {schema}"))
        .await
        .map_err(|err| format!("create schema: {err}"))?;

    let separator = if base_url.contains('?') { '&' } else { '?' };
    let url = format!("{base_url}{separator}options=-csearch_path%3D{schema}");
    let mut conn = AsyncPgConnection::establish(&url)
        .await
        .map_err(|err| format!("connect to schema: {err}"))?;
    conn.batch_execute(MIGRATION)
        .await
        .map_err(|err| format!("migration: {err}"))?;

    let pool = DbPool::connect(
        PoolConfig::new(url)
            .with_max_size(8)
            .with_min_idle(None)
            .with_connect_retries(1, Duration::ZERO),
    )
    .await
    .map_err(|err| format!("pool: {err}"))?;
    let clock = Arc::new(MutableClock::fixed());
    let store = Arc::new(DieselBatchStore::new(pool, clock.clone()));
    Ok((store, clock))
}

fn setup_context() -> Result<TestContext, String> {
    let runtime = Runtime::new().map_err(|err| err.to_string())?;
    let cluster = test_cluster()?;
    let base_url = cluster.connection().database_url(ADMIN_DB);
    let (store, clock) = runtime.block_on(provision(&base_url))?;
    Ok(TestContext {
        store,
        clock,
        runtime,
        _cluster: cluster,
    })
}

#[fixture]
fn store_context() -> Option<TestContext> {
    match setup_context() {
        Ok(context) => Some(context),
        Err(reason) => handle_cluster_setup_failure(reason),
    }
}

fn new_webhook(count: Option<u32>) -> NewWebhook {
    NewWebhook {
        project_id: 42,
        credential: Credential::new("storage-token").expect("credential"),
        table_id: "in.c-hooks.events".parse().expect("table id"),
        conditions: Conditions::from_parts(count, Some(Duration::from_secs(60)), None)
            .expect("conditions"),
    }
}

#[rstest]
fn registered_webhook_round_trips(store_context: Option<TestContext>) {
    let Some(TestContext { store, runtime, .. }) = store_context else {
        eprintln!("SKIP-TEST-CLUSTER: registered_webhook_round_trips skipped");
        return;
    };

    runtime.block_on(async {
        let registered = store.register(new_webhook(Some(5))).await.expect("register");
        let loaded = store.get(&registered.hash).await.expect("get");

        assert_eq!(loaded, registered);
        assert_eq!(loaded.project_id, 42);
        assert_eq!(loaded.conditions.count(), Some(5));
        assert_eq!(loaded.size_bytes, 0);
    });
}

#[rstest]
fn concurrent_appends_observe_gapless_counts(store_context: Option<TestContext>) {
    const APPENDS: u64 = 20;
    let Some(TestContext { store, runtime, .. }) = store_context else {
        eprintln!("SKIP-TEST-CLUSTER: concurrent_appends_observe_gapless_counts skipped");
        return;
    };

    runtime.block_on(async {
        let webhook = store.register(new_webhook(None)).await.expect("register");
        let tasks: Vec<_> = (0..APPENDS)
            .map(|n| {
                let store = Arc::clone(&store);
                let hash = webhook.hash.clone();
                tokio::spawn(async move {
                    store
                        .append_row(&hash, "{}", &format!("row-{n:02}"))
                        .await
                        .map(|outcome| outcome.rows_buffered)
                })
            })
            .collect();
        let mut observed = Vec::new();
        for task in tasks {
            observed.push(task.await.expect("task").expect("append"));
        }

        observed.sort_unstable();
        assert_eq!(observed, (1..=APPENDS).collect::<Vec<_>>());
        assert_eq!(store.count_rows(webhook.id).await.expect("count"), APPENDS);
        let reloaded = store.get(&webhook.hash).await.expect("get");
        assert_eq!(
            reloaded.size_bytes,
            APPENDS * ("{}".len() + "row-00".len()) as u64
        );
    });
}

#[rstest]
fn commit_keeps_rows_appended_after_staging(store_context: Option<TestContext>) {
    let Some(TestContext {
        store,
        clock,
        runtime,
        ..
    }) = store_context
    else {
        eprintln!("SKIP-TEST-CLUSTER: commit_keeps_rows_appended_after_staging skipped");
        return;
    };

    runtime.block_on(async {
        let webhook = store.register(new_webhook(None)).await.expect("register");
        store.append_row(&webhook.hash, "{}", "one").await.expect("append");
        store.append_row(&webhook.hash, "{}", "two").await.expect("append");

        let mut staged_rows: Vec<BufferedRow> = Vec::new();
        let staged = store
            .stage(&webhook.hash, &mut staged_rows)
            .await
            .expect("stage");
        assert_eq!(staged.rows, 2);
        assert_eq!(staged.bytes, 10);

        store.append_row(&webhook.hash, "{}", "late").await.expect("append");
        clock.advance(Duration::from_secs(30));
        let committed = store.commit_staged(&staged).await.expect("commit");

        assert_eq!(committed.size_bytes, 6);
        assert_eq!(
            committed.imported_at,
            webhook.imported_at + chrono::Duration::seconds(30)
        );
        let mut remaining: Vec<BufferedRow> = Vec::new();
        store
            .stage(&webhook.hash, &mut remaining)
            .await
            .expect("stage remaining");
        assert_eq!(
            remaining.iter().map(|row| row.body.as_str()).collect::<Vec<_>>(),
            ["late"]
        );
    });
}

#[rstest]
fn drain_streams_rows_in_arrival_order_and_empties_the_batch(
    store_context: Option<TestContext>,
) {
    let Some(TestContext {
        store,
        clock,
        runtime,
        ..
    }) = store_context
    else {
        eprintln!("SKIP-TEST-CLUSTER: drain_streams_rows_in_arrival_order skipped");
        return;
    };

    runtime.block_on(async {
        let webhook = store.register(new_webhook(None)).await.expect("register");
        for body in ["a", "b", "c"] {
            store.append_row(&webhook.hash, "{}", body).await.expect("append");
            clock.advance(Duration::from_millis(5));
        }

        let mut drained: Vec<BufferedRow> = Vec::new();
        let summary = store.drain(&webhook.hash, &mut drained).await.expect("drain");

        assert_eq!(summary.rows, 3);
        assert_eq!(
            drained.iter().map(|row| row.body.as_str()).collect::<Vec<_>>(),
            ["a", "b", "c"]
        );
        assert_eq!(summary.webhook.size_bytes, 0);
        assert_eq!(store.count_rows(webhook.id).await.expect("count"), 0);
    });
}

#[rstest]
fn draining_an_empty_batch_twice_is_a_no_op(store_context: Option<TestContext>) {
    let Some(TestContext { store, runtime, .. }) = store_context else {
        eprintln!("SKIP-TEST-CLUSTER: draining_an_empty_batch_twice_is_a_no_op skipped");
        return;
    };

    runtime.block_on(async {
        let webhook = store.register(new_webhook(None)).await.expect("register");

        for _ in 0..2 {
            let mut sink: Vec<BufferedRow> = Vec::new();
            let summary = store
                .drain(&webhook.hash, &mut sink)
                .await
                .expect("empty drain succeeds");
            assert_eq!((summary.rows, summary.bytes), (0, 0));
            assert_eq!(summary.webhook.size_bytes, 0);
            assert!(sink.is_empty());
        }
        assert_eq!(store.count_rows(webhook.id).await.expect("count"), 0);
    });
}

#[rstest]
fn updating_conditions_replaces_the_policy(store_context: Option<TestContext>) {
    let Some(TestContext { store, runtime, .. }) = store_context else {
        eprintln!("SKIP-TEST-CLUSTER: updating_conditions_replaces_the_policy skipped");
        return;
    };

    runtime.block_on(async {
        let webhook = store.register(new_webhook(Some(5))).await.expect("register");

        let replacement = Conditions::from_parts(None, None, Some(1024)).expect("conditions");
        let updated = store
            .update_conditions(&webhook.hash, replacement.clone())
            .await
            .expect("update");

        assert_eq!(updated.conditions, replacement);
        let listed = store.all_webhooks().await.expect("list");
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].conditions.count(), None);
    });
}

#[rstest]
fn unknown_hash_is_not_found(store_context: Option<TestContext>) {
    let Some(TestContext { store, runtime, .. }) = store_context else {
        eprintln!("SKIP-TEST-CLUSTER: unknown_hash_is_not_found skipped");
        return;
    };

    runtime.block_on(async {
        let hash = WebhookHash::new("missingWebhookHash123").expect("hash");

        let error = store
            .append_row(&hash, "{}", "body")
            .await
            .expect_err("unknown hash");

        assert_eq!(error, BatchStoreError::not_found("missingWebhookHash123"));
    });
}
