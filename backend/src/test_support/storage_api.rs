//! Scripted Storage API double.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use super::lock;
use crate::domain::Credential;
use crate::domain::ports::{
    JobStatus, ProjectToken, StorageApi, StorageApiError, StorageJob, UploadCredentials,
    UploadTarget,
};

/// Call observed by [`ScriptedStorageApi`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageCall {
    VerifyToken,
    BucketExists {
        bucket_id: String,
    },
    CreateBucket {
        name: String,
        stage: String,
        display_name: String,
    },
    TableExists {
        table_id: String,
    },
    CreateTable {
        bucket_id: String,
        table_name: String,
        file_id: i64,
    },
    ImportTable {
        table_id: String,
        file_id: i64,
        incremental: bool,
    },
    JobStatus {
        job_id: i64,
    },
    PrepareFile {
        name: String,
    },
}

/// Job id returned by every submitted job.
pub const SUBMITTED_JOB_ID: i64 = 7_001;
/// File id returned by `prepare_file`.
pub const PREPARED_FILE_ID: i64 = 9_001;

struct Script {
    token: Result<ProjectToken, StorageApiError>,
    bucket_exists: bool,
    table_exists: bool,
    submitted_status: JobStatus,
    job_statuses: VecDeque<Result<StorageJob, StorageApiError>>,
    default_job_status: JobStatus,
    prepare_error: Option<StorageApiError>,
    status_latency: Duration,
}

/// Storage API stub with configurable answers and a call log.
///
/// Defaults: the token verifies as a master token of project 42, bucket and
/// table exist, and submitted jobs succeed immediately.
pub struct ScriptedStorageApi {
    script: Mutex<Script>,
    calls: Mutex<Vec<StorageCall>>,
}

impl Default for ScriptedStorageApi {
    fn default() -> Self {
        Self {
            script: Mutex::new(Script {
                token: Ok(ProjectToken {
                    project_id: 42,
                    project_name: "Webhook sandbox".to_owned(),
                    is_master: true,
                }),
                bucket_exists: true,
                table_exists: true,
                submitted_status: JobStatus::Success,
                job_statuses: VecDeque::new(),
                default_job_status: JobStatus::Success,
                prepare_error: None,
                status_latency: Duration::ZERO,
            }),
            calls: Mutex::new(Vec::new()),
        }
    }
}

impl ScriptedStorageApi {
    /// Stub with default answers.
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer `verify_token` with `error`.
    pub fn with_token_error(self, error: StorageApiError) -> Self {
        lock(&self.script).token = Err(error);
        self
    }

    /// Answer `verify_token` with a token lacking master privileges.
    pub fn with_limited_token(self) -> Self {
        if let Ok(token) = lock(&self.script).token.as_mut() {
            token.is_master = false;
        }
        self
    }

    /// Report the destination bucket as missing.
    pub fn with_missing_bucket(self) -> Self {
        lock(&self.script).bucket_exists = false;
        self
    }

    /// Report the destination table as missing.
    pub fn with_missing_table(self) -> Self {
        lock(&self.script).table_exists = false;
        self
    }

    /// Status of freshly submitted import and create jobs.
    pub fn with_submitted_status(self, status: JobStatus) -> Self {
        lock(&self.script).submitted_status = status;
        self
    }

    /// Queue answers for successive `job_status` calls.
    pub fn with_job_statuses(
        self,
        statuses: impl IntoIterator<Item = Result<JobStatus, StorageApiError>>,
    ) -> Self {
        let queued = statuses
            .into_iter()
            .map(|status| status.map(|status| job(status)));
        lock(&self.script).job_statuses.extend(queued);
        self
    }

    /// Status reported once the queue is empty.
    pub fn with_default_job_status(self, status: JobStatus) -> Self {
        lock(&self.script).default_job_status = status;
        self
    }

    /// Delay every `job_status` answer by `latency` of Tokio time.
    pub fn with_status_latency(self, latency: Duration) -> Self {
        lock(&self.script).status_latency = latency;
        self
    }

    /// Fail `prepare_file` with `error`.
    pub fn with_prepare_error(self, error: StorageApiError) -> Self {
        lock(&self.script).prepare_error = Some(error);
        self
    }

    /// Calls observed so far.
    pub fn calls(&self) -> Vec<StorageCall> {
        lock(&self.calls).clone()
    }

    /// Number of `job_status` calls observed.
    pub fn status_checks(&self) -> usize {
        lock(&self.calls)
            .iter()
            .filter(|call| matches!(call, StorageCall::JobStatus { .. }))
            .count()
    }

    fn record(&self, call: StorageCall) {
        lock(&self.calls).push(call);
    }

    fn submitted(&self) -> StorageJob {
        job(lock(&self.script).submitted_status.clone())
    }
}

/// Job snapshot with `status`; errored jobs carry a message.
pub fn job(status: JobStatus) -> StorageJob {
    let error_message =
        matches!(status, JobStatus::Error).then(|| "Table import failed".to_owned());
    StorageJob {
        id: SUBMITTED_JOB_ID,
        status,
        results: None,
        error_message,
    }
}

#[async_trait]
impl StorageApi for ScriptedStorageApi {
    async fn verify_token(
        &self,
        _credential: &Credential,
    ) -> Result<ProjectToken, StorageApiError> {
        self.record(StorageCall::VerifyToken);
        lock(&self.script).token.clone()
    }

    async fn bucket_exists(
        &self,
        _credential: &Credential,
        bucket_id: &str,
    ) -> Result<bool, StorageApiError> {
        self.record(StorageCall::BucketExists {
            bucket_id: bucket_id.to_owned(),
        });
        Ok(lock(&self.script).bucket_exists)
    }

    async fn create_bucket(
        &self,
        _credential: &Credential,
        name: &str,
        stage: &str,
        display_name: &str,
    ) -> Result<(), StorageApiError> {
        self.record(StorageCall::CreateBucket {
            name: name.to_owned(),
            stage: stage.to_owned(),
            display_name: display_name.to_owned(),
        });
        lock(&self.script).bucket_exists = true;
        Ok(())
    }

    async fn table_exists(
        &self,
        _credential: &Credential,
        table_id: &str,
    ) -> Result<bool, StorageApiError> {
        self.record(StorageCall::TableExists {
            table_id: table_id.to_owned(),
        });
        Ok(lock(&self.script).table_exists)
    }

    async fn create_table_async(
        &self,
        _credential: &Credential,
        bucket_id: &str,
        table_name: &str,
        file_id: i64,
    ) -> Result<StorageJob, StorageApiError> {
        self.record(StorageCall::CreateTable {
            bucket_id: bucket_id.to_owned(),
            table_name: table_name.to_owned(),
            file_id,
        });
        Ok(self.submitted())
    }

    async fn import_table_async(
        &self,
        _credential: &Credential,
        table_id: &str,
        file_id: i64,
        incremental: bool,
    ) -> Result<StorageJob, StorageApiError> {
        self.record(StorageCall::ImportTable {
            table_id: table_id.to_owned(),
            file_id,
            incremental,
        });
        Ok(self.submitted())
    }

    async fn job_status(
        &self,
        _credential: &Credential,
        job_id: i64,
    ) -> Result<StorageJob, StorageApiError> {
        self.record(StorageCall::JobStatus { job_id });
        let latency = lock(&self.script).status_latency;
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        let mut script = lock(&self.script);
        match script.job_statuses.pop_front() {
            Some(next) => next,
            None => Ok(job(script.default_job_status.clone())),
        }
    }

    async fn prepare_file(
        &self,
        _credential: &Credential,
        name: &str,
    ) -> Result<UploadTarget, StorageApiError> {
        self.record(StorageCall::PrepareFile {
            name: name.to_owned(),
        });
        if let Some(error) = lock(&self.script).prepare_error.clone() {
            return Err(error);
        }
        Ok(UploadTarget {
            file_id: PREPARED_FILE_ID,
            region: "eu-central-1".to_owned(),
            bucket: "kbc-sapi-files".to_owned(),
            key: format!("exp-15/{name}"),
            credentials: UploadCredentials {
                access_key_id: "ASIATESTACCESSKEY".to_owned(),
                secret_access_key: "test-secret".to_owned(),
                session_token: "test-session".to_owned(),
                expiration: "2026-03-14T10:30:00+00:00".to_owned(),
            },
        })
    }
}
