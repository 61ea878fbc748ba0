//! Tests for the webhook service.

use std::collections::BTreeMap;
use std::sync::Arc;

use rstest::rstest;
use tokio::sync::Notify;

use super::*;
use crate::domain::flush_scheduler::FlushSchedulerConfig;
use crate::domain::ports::{MockStorageApi, ProjectToken};
use crate::domain::{ConditionsInput, ErrorCode};
use crate::outbound::persistence::MemoryBatchStore;
use crate::test_support::exporter::ScriptedExporter;
use crate::test_support::runtime::MutableClock;

const HOST: &str = "hooks.example.test";

struct Harness {
    store: Arc<MemoryBatchStore>,
    exporter: Arc<ScriptedExporter>,
    service: WebhookService,
}

fn build(api: MockStorageApi, exporter: ScriptedExporter) -> Harness {
    let clock = Arc::new(MutableClock::fixed());
    let store = Arc::new(MemoryBatchStore::new(clock.clone()));
    let exporter = Arc::new(exporter);
    let scheduler = Arc::new(FlushScheduler::new(
        store.clone(),
        exporter.clone(),
        clock,
        FlushSchedulerConfig::default(),
    ));
    let service = WebhookService::new(store.clone(), Arc::new(api), scheduler, HOST);
    Harness {
        store,
        exporter,
        service,
    }
}

fn accepting_api() -> MockStorageApi {
    let mut api = MockStorageApi::new();
    api.expect_verify_token().returning(|_| {
        Ok(ProjectToken {
            project_id: 42,
            project_name: "Webhook sandbox".to_owned(),
            is_master: true,
        })
    });
    api
}

fn request(table_id: &str, conditions: Option<ConditionsInput>) -> RegisterRequest {
    RegisterRequest {
        token: "storage-token".to_owned(),
        table_id: table_id.to_owned(),
        conditions,
    }
}

fn hash_of(url: &str) -> String {
    url.rsplit('/').next().unwrap_or_default().to_owned()
}

async fn registered(harness: &Harness) -> String {
    let result = harness
        .service
        .register(request("in.c-hooks.events", None))
        .await
        .expect("register");
    hash_of(&result.url)
}

#[tokio::test]
async fn register_returns_public_url_and_stores_project() {
    let h = build(accepting_api(), ScriptedExporter::new());
    let conditions = ConditionsInput {
        count: Some(3),
        time: None,
        size: None,
    };

    let result = h
        .service
        .register(request("in.c-hooks.events", Some(conditions)))
        .await
        .expect("register");

    let prefix = format!("https://{HOST}/import/");
    assert!(result.url.starts_with(&prefix));
    let hash = hash_of(&result.url);
    assert_eq!(hash.len(), crate::domain::HASH_LENGTH);
    let webhook = h.service.get(&hash).await.expect("stored webhook");
    assert_eq!(webhook.project_id, 42);
    assert_eq!(webhook.conditions.count(), Some(3));
    assert_eq!(webhook.size_bytes, 0);
}

#[rstest]
#[case("in.c-hooks")]
#[case("in..events")]
#[case("in.c-hooks.events.extra")]
#[tokio::test]
async fn register_rejects_malformed_table_ids(#[case] table_id: &str) {
    let mut api = MockStorageApi::new();
    api.expect_verify_token().never();
    let h = build(api, ScriptedExporter::new());

    let error = h
        .service
        .register(request(table_id, None))
        .await
        .expect_err("invalid table id");

    assert_eq!(error.code(), ErrorCode::InvalidRequest);
    assert_eq!(error.message(), format!("invalid table ID: {table_id}"));
}

#[tokio::test]
async fn register_rejects_invalid_conditions() {
    let h = build(MockStorageApi::new(), ScriptedExporter::new());
    let conditions = ConditionsInput {
        count: None,
        time: None,
        size: Some("10 parsecs".to_owned()),
    };

    let error = h
        .service
        .register(request("in.c-hooks.events", Some(conditions)))
        .await
        .expect_err("invalid size");

    assert_eq!(error.code(), ErrorCode::InvalidRequest);
    assert!(error.message().contains("10 parsecs"));
}

#[tokio::test]
async fn rejected_token_reports_fingerprint_only() {
    let mut api = MockStorageApi::new();
    api.expect_verify_token()
        .times(1)
        .return_once(|_| Err(StorageApiError::unauthorized("invalid token")));
    let h = build(api, ScriptedExporter::new());

    let error = h
        .service
        .register(request("in.c-hooks.events", None))
        .await
        .expect_err("unauthorized");

    let fingerprint = Credential::new("storage-token")
        .expect("credential")
        .fingerprint();
    assert_eq!(error.code(), ErrorCode::Unauthorized);
    assert_eq!(
        error.message(),
        format!("Invalid storage token \"{fingerprint}\" supplied.")
    );
    assert!(!error.message().contains("storage-token"));
}

#[tokio::test]
async fn unreachable_storage_api_is_unavailable() {
    let mut api = MockStorageApi::new();
    api.expect_verify_token()
        .return_once(|_| Err(StorageApiError::transport("dns failure")));
    let h = build(api, ScriptedExporter::new());

    let error = h
        .service
        .register(request("in.c-hooks.events", None))
        .await
        .expect_err("transport failure");

    assert_eq!(error.code(), ErrorCode::ServiceUnavailable);
}

#[tokio::test]
async fn update_conditions_returns_rendered_policy() {
    let h = build(accepting_api(), ScriptedExporter::new());
    let hash = registered(&h).await;

    let result = h
        .service
        .update_conditions(UpdateConditionsRequest {
            hash: hash.clone(),
            conditions: ConditionsInput {
                count: Some(50),
                time: Some("20s".to_owned()),
                size: Some("10MB".to_owned()),
            },
        })
        .await
        .expect("update");

    assert_eq!(result.conditions.count, Some(50));
    assert_eq!(result.conditions.time.as_deref(), Some("20s"));
    assert_eq!(result.conditions.size.as_deref(), Some("10MB"));
}

#[tokio::test]
async fn update_unknown_hash_is_not_found() {
    let h = build(MockStorageApi::new(), ScriptedExporter::new());

    let error = h
        .service
        .update_conditions(UpdateConditionsRequest {
            hash: "nope".to_owned(),
            conditions: ConditionsInput::default(),
        })
        .await
        .expect_err("unknown hash");

    assert_eq!(error.code(), ErrorCode::NotFound);
    assert_eq!(error.message(), "Webhook with hash \"nope\" not found.");
}

#[tokio::test]
async fn append_row_buffers_headers_as_json() {
    let h = build(accepting_api(), ScriptedExporter::new());
    let hash = registered(&h).await;
    let headers = BTreeMap::from([("content-type".to_owned(), "application/json".to_owned())]);

    for expected in 1..=2 {
        let result = h
            .service
            .append_row(ImportRequest {
                hash: hash.clone(),
                headers: headers.clone(),
                body: "{\"event\":\"created\"}".to_owned(),
            })
            .await
            .expect("append");
        assert_eq!(result.rows_buffered, expected);
    }

    let typed = WebhookHash::new(hash).expect("hash");
    let rows = h.store.rows(&typed);
    assert_eq!(rows[0].headers, "{\"content-type\":\"application/json\"}");
    let webhook = h.store.get(&typed).await.expect("webhook");
    assert_eq!(webhook.size_bytes, 2 * rows[0].size_bytes());
}

#[rstest]
#[case("bad hash!")]
#[case("")]
#[tokio::test]
async fn append_row_with_malformed_hash_is_not_found(#[case] hash: &str) {
    let h = build(MockStorageApi::new(), ScriptedExporter::new());

    let error = h
        .service
        .append_row(ImportRequest {
            hash: hash.to_owned(),
            headers: BTreeMap::new(),
            body: String::new(),
        })
        .await
        .expect_err("malformed hash");

    assert_eq!(error.code(), ErrorCode::NotFound);
}

#[tokio::test]
async fn manual_flush_reports_exported_rows() {
    let h = build(
        accepting_api(),
        ScriptedExporter::new().with_outcomes([Ok(ExportOutcome::Exported {
            rows: 4,
            bytes: 64,
            job_id: 11,
        })]),
    );
    let hash = registered(&h).await;

    let result = h.service.manual_flush(&hash).await.expect("flush");

    assert_eq!(
        result,
        FlushResult {
            status: FlushStatus::Exported,
            rows: 4,
        }
    );
}

#[tokio::test]
async fn concurrent_manual_flush_reports_in_progress() {
    let gate = Arc::new(Notify::new());
    let h = Arc::new(build(accepting_api(), ScriptedExporter::gated(gate.clone())));
    let hash = registered(&h).await;

    let first = {
        let h = Arc::clone(&h);
        let hash = hash.clone();
        tokio::spawn(async move { h.service.manual_flush(&hash).await })
    };
    h.exporter.started().await;

    let second = h.service.manual_flush(&hash).await.expect("second flush");
    assert_eq!(second.status, FlushStatus::InProgress);

    gate.notify_one();
    let first = first.await.expect("join").expect("first flush");
    assert_eq!(first.status, FlushStatus::Exported);
    assert_eq!(h.exporter.calls(), 1);
}

#[tokio::test]
async fn manual_flush_propagates_export_failures() {
    let h = build(
        accepting_api(),
        ScriptedExporter::new().with_outcomes([Err(Error::remote_job_failed("import failed"))]),
    );
    let hash = registered(&h).await;

    let error = h.service.manual_flush(&hash).await.expect_err("flush fails");

    assert_eq!(error.code(), ErrorCode::RemoteJobFailed);
}
