//! Regression coverage for the export pipeline.

use std::sync::Arc;
use std::time::Duration;

use rstest::rstest;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use super::*;
use crate::domain::ports::{JobStatus, StorageApiError, UploadError};
use crate::domain::{BackoffPolicy, Conditions, Credential, ErrorCode, NewWebhook};
use crate::outbound::persistence::MemoryBatchStore;
use crate::test_support::runtime::{ImmediateSleeper, MutableClock};
use crate::test_support::storage_api::{
    PREPARED_FILE_ID, SUBMITTED_JOB_ID, ScriptedStorageApi, StorageCall,
};
use crate::test_support::uploads::{MemoryStaging, RecordingUploader};

struct Harness {
    store: Arc<MemoryBatchStore>,
    api: Arc<ScriptedStorageApi>,
    uploader: Arc<RecordingUploader>,
    staging: Arc<MemoryStaging>,
    pipeline: ExportPipeline,
}

fn harness_with(
    api: ScriptedStorageApi,
    uploader: RecordingUploader,
    config: ExportPipelineConfig,
) -> Harness {
    let store = Arc::new(MemoryBatchStore::new(Arc::new(MutableClock::fixed())));
    let api = Arc::new(api);
    let uploader = Arc::new(uploader);
    let staging = Arc::new(MemoryStaging::new().expect("staging dir"));
    let poller = JobPoller::new(
        api.clone(),
        Arc::new(ImmediateSleeper),
        BackoffPolicy::default(),
        CancellationToken::new(),
    );
    let pipeline = ExportPipeline::new(
        ExportPipelinePorts {
            store: store.clone(),
            storage_api: api.clone(),
            uploader: uploader.clone(),
            staging: staging.clone(),
        },
        poller,
        config,
    );
    Harness {
        store,
        api,
        uploader,
        staging,
        pipeline,
    }
}

fn harness(api: ScriptedStorageApi, uploader: RecordingUploader) -> Harness {
    harness_with(api, uploader, ExportPipelineConfig::default())
}

impl Harness {
    async fn webhook_with_rows(&self, bodies: &[&str]) -> WebhookHash {
        let webhook = self
            .store
            .register(NewWebhook {
                project_id: 42,
                credential: Credential::new("storage-token").expect("credential"),
                table_id: "in.c-hooks.events".parse().expect("table id"),
                conditions: Conditions::new(),
            })
            .await
            .expect("register");
        for body in bodies {
            self.store
                .append_row(&webhook.hash, "{}", body)
                .await
                .expect("append");
        }
        webhook.hash
    }

    fn artifacts_removed(&self) -> bool {
        self.staging.created().iter().all(|path| !path.exists())
    }
}

#[rstest]
#[tokio::test]
async fn existing_table_receives_incremental_import() {
    let h = harness(ScriptedStorageApi::new(), RecordingUploader::new());
    let hash = h.webhook_with_rows(&["first", "second"]).await;

    let outcome = h.pipeline.export(&hash).await.expect("export succeeds");

    assert_eq!(
        outcome,
        ExportOutcome::Exported {
            rows: 2,
            bytes: 15,
            job_id: SUBMITTED_JOB_ID,
        }
    );
    assert!(h.api.calls().contains(&StorageCall::ImportTable {
        table_id: "in.c-hooks.events".to_owned(),
        file_id: PREPARED_FILE_ID,
        incremental: true,
    }));
    let uploads = h.uploader.uploads();
    assert_eq!(uploads.len(), 1);
    assert_eq!(uploads[0].contents, "first\nsecond\n");
    assert!(h.store.rows(&hash).is_empty());
    assert_eq!(h.store.get(&hash).await.expect("webhook").size_bytes, 0);
    assert!(h.artifacts_removed());
}

#[rstest]
#[tokio::test]
async fn missing_table_is_created_from_the_upload() {
    let h = harness(
        ScriptedStorageApi::new().with_missing_table(),
        RecordingUploader::new(),
    );
    let hash = h.webhook_with_rows(&["row"]).await;

    h.pipeline.export(&hash).await.expect("export succeeds");

    assert!(h.api.calls().contains(&StorageCall::CreateTable {
        bucket_id: "in.c-hooks".to_owned(),
        table_name: "events".to_owned(),
        file_id: PREPARED_FILE_ID,
    }));
}

#[rstest]
#[tokio::test]
async fn missing_bucket_is_created_without_prefix() {
    let h = harness(
        ScriptedStorageApi::new().with_missing_bucket(),
        RecordingUploader::new(),
    );
    let hash = h.webhook_with_rows(&["row"]).await;

    h.pipeline.export(&hash).await.expect("export succeeds");

    assert!(h.api.calls().contains(&StorageCall::CreateBucket {
        name: "hooks".to_owned(),
        stage: "in".to_owned(),
        display_name: "hooks".to_owned(),
    }));
}

#[rstest]
#[tokio::test]
async fn empty_batch_skips_upload() {
    let h = harness(ScriptedStorageApi::new(), RecordingUploader::new());
    let hash = h.webhook_with_rows(&[]).await;

    let outcome = h.pipeline.export(&hash).await.expect("export succeeds");

    assert_eq!(outcome, ExportOutcome::NothingToExport);
    assert!(h.uploader.uploads().is_empty());
    assert!(
        !h.api
            .calls()
            .iter()
            .any(|call| matches!(call, StorageCall::PrepareFile { .. }))
    );
}

#[rstest]
#[tokio::test]
async fn upload_failure_keeps_the_batch() {
    let h = harness(
        ScriptedStorageApi::new(),
        RecordingUploader::failing(UploadError::transport("connection reset")),
    );
    let hash = h.webhook_with_rows(&["one", "two"]).await;
    let before = h.store.get(&hash).await.expect("webhook");

    let error = h.pipeline.export(&hash).await.expect_err("upload fails");

    assert_eq!(error.code(), ErrorCode::ServiceUnavailable);
    assert!(error.message().contains(hash.as_str()));
    assert!(error.message().contains("in.c-hooks.events"));
    assert_eq!(h.store.rows(&hash).len(), 2);
    assert_eq!(
        h.store.get(&hash).await.expect("webhook").size_bytes,
        before.size_bytes
    );
    assert!(h.artifacts_removed());
}

#[rstest]
#[tokio::test]
async fn failed_job_keeps_the_batch() {
    let h = harness(
        ScriptedStorageApi::new().with_submitted_status(JobStatus::Error),
        RecordingUploader::new(),
    );
    let hash = h.webhook_with_rows(&["one"]).await;

    let error = h.pipeline.export(&hash).await.expect_err("job fails");

    assert_eq!(error.code(), ErrorCode::RemoteJobFailed);
    assert!(error.message().contains("Table import failed"));
    assert_eq!(h.store.rows(&hash).len(), 1);
    assert_eq!(h.api.status_checks(), 0);
}

#[rstest]
#[tokio::test]
async fn pending_job_is_polled_until_success() {
    let h = harness(
        ScriptedStorageApi::new()
            .with_submitted_status(JobStatus::Waiting)
            .with_job_statuses([Ok(JobStatus::Processing), Ok(JobStatus::Success)]),
        RecordingUploader::new(),
    );
    let hash = h.webhook_with_rows(&["one"]).await;

    h.pipeline.export(&hash).await.expect("export succeeds");

    assert_eq!(h.api.status_checks(), 2);
    assert!(h.store.rows(&hash).is_empty());
}

#[rstest]
#[tokio::test]
async fn rejected_token_fails_before_staging() {
    let h = harness(
        ScriptedStorageApi::new().with_token_error(StorageApiError::unauthorized("expired")),
        RecordingUploader::new(),
    );
    let hash = h.webhook_with_rows(&["one"]).await;

    let error = h.pipeline.export(&hash).await.expect_err("token rejected");

    assert_eq!(error.code(), ErrorCode::Unauthorized);
    assert!(h.staging.created().is_empty());
    assert_eq!(h.store.rows(&hash).len(), 1);
}

#[rstest]
#[tokio::test]
async fn slow_upload_times_out() {
    let h = harness_with(
        ScriptedStorageApi::new(),
        RecordingUploader::gated(Arc::new(Notify::new())),
        ExportPipelineConfig {
            upload_timeout: Duration::from_millis(20),
        },
    );
    let hash = h.webhook_with_rows(&["one"]).await;

    let error = h.pipeline.export(&hash).await.expect_err("upload hangs");

    assert_eq!(error.code(), ErrorCode::Timeout);
    assert_eq!(h.store.rows(&hash).len(), 1);
    assert!(h.artifacts_removed());
}

#[rstest]
#[tokio::test]
async fn unknown_hash_is_not_found() {
    let h = harness(ScriptedStorageApi::new(), RecordingUploader::new());
    let hash = WebhookHash::new("unknown").expect("hash");

    let error = h.pipeline.export(&hash).await.expect_err("unknown hash");

    assert_eq!(error.code(), ErrorCode::NotFound);
    assert_eq!(error.message(), "Webhook with hash \"unknown\" not found.");
}
