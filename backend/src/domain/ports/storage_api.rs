//! Driven port for the downstream Storage API.
//!
//! The Storage API owns buckets, tables, file uploads and asynchronous jobs.
//! Every call carries the credential of the webhook it is made for.

use std::fmt;

use async_trait::async_trait;
use serde_json::Value;

use super::define_port_error;
use crate::domain::Credential;

define_port_error! {
    /// Errors surfaced while calling the Storage API.
    pub enum StorageApiError {
        /// The credential was rejected or lacks the required privileges.
        Unauthorized { message: String } => "storage api rejected the token: {message}",
        /// Network transport failed before a response arrived.
        Transport { message: String } => "storage api transport failed: {message}",
        /// The request exceeded the client timeout.
        Timeout { message: String } => "storage api timeout: {message}",
        /// The API answered with an unexpected status.
        Status { status: u16, message: String } => "storage api returned {status}: {message}",
        /// The response body could not be decoded.
        Decode { message: String } => "storage api response decode failed: {message}",
    }
}

impl StorageApiError {
    /// Whether repeating the call may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transport { .. } | Self::Timeout { .. } => true,
            Self::Status { status, .. } => *status >= 500 || *status == 429,
            Self::Unauthorized { .. } | Self::Decode { .. } => false,
        }
    }
}

/// Verified token details.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectToken {
    /// Project the token belongs to.
    pub project_id: i64,
    /// Human-readable project name.
    pub project_name: String,
    /// Whether the token has master privileges.
    pub is_master: bool,
}

/// Lifecycle state of an asynchronous Storage API job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobStatus {
    /// Queued, not yet started.
    Waiting,
    /// Running.
    Processing,
    /// Finished successfully.
    Success,
    /// Finished with an error.
    Error,
    /// Status value this service does not know; treated as pending.
    Other(String),
}

impl JobStatus {
    /// Map the wire status string.
    pub fn parse(value: &str) -> Self {
        match value {
            "waiting" => Self::Waiting,
            "processing" => Self::Processing,
            "success" => Self::Success,
            "error" => Self::Error,
            other => Self::Other(other.to_owned()),
        }
    }

    /// Whether the job has reached a final state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Success | Self::Error)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Waiting => f.write_str("waiting"),
            Self::Processing => f.write_str("processing"),
            Self::Success => f.write_str("success"),
            Self::Error => f.write_str("error"),
            Self::Other(other) => f.write_str(other),
        }
    }
}

/// Snapshot of an asynchronous job.
#[derive(Debug, Clone, PartialEq)]
pub struct StorageJob {
    /// Job identifier.
    pub id: i64,
    /// Current status.
    pub status: JobStatus,
    /// Result payload, present once the job finished.
    pub results: Option<Value>,
    /// Error message reported for failed jobs.
    pub error_message: Option<String>,
}

/// Temporary cloud credentials attached to an upload target.
#[derive(Clone, PartialEq, Eq)]
pub struct UploadCredentials {
    /// Access key identifier.
    pub access_key_id: String,
    /// Secret access key.
    pub secret_access_key: String,
    /// Session token.
    pub session_token: String,
    /// Expiration timestamp as reported by the API.
    pub expiration: String,
}

impl fmt::Debug for UploadCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UploadCredentials")
            .field("access_key_id", &self.access_key_id)
            .field("expiration", &self.expiration)
            .finish_non_exhaustive()
    }
}

/// Object storage location prepared by the Storage API for one artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadTarget {
    /// File resource identifier referenced by import jobs.
    pub file_id: i64,
    /// Cloud region of the object bucket.
    pub region: String,
    /// Object bucket name.
    pub bucket: String,
    /// Object key inside the bucket.
    pub key: String,
    /// Federated credentials scoped to this write.
    pub credentials: UploadCredentials,
}

/// Port for the Storage API capabilities used by exports and registration.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait StorageApi: Send + Sync {
    /// Verify a token and return its project.
    async fn verify_token(&self, credential: &Credential) -> Result<ProjectToken, StorageApiError>;

    /// Whether the bucket `<stage>.<bucket>` exists.
    async fn bucket_exists(
        &self,
        credential: &Credential,
        bucket_id: &str,
    ) -> Result<bool, StorageApiError>;

    /// Create a bucket.
    async fn create_bucket(
        &self,
        credential: &Credential,
        name: &str,
        stage: &str,
        display_name: &str,
    ) -> Result<(), StorageApiError>;

    /// Whether the table exists.
    async fn table_exists(
        &self,
        credential: &Credential,
        table_id: &str,
    ) -> Result<bool, StorageApiError>;

    /// Start a job creating `table_name` in `bucket_id` from an uploaded file.
    async fn create_table_async(
        &self,
        credential: &Credential,
        bucket_id: &str,
        table_name: &str,
        file_id: i64,
    ) -> Result<StorageJob, StorageApiError>;

    /// Start a job importing an uploaded file into an existing table.
    async fn import_table_async(
        &self,
        credential: &Credential,
        table_id: &str,
        file_id: i64,
        incremental: bool,
    ) -> Result<StorageJob, StorageApiError>;

    /// Fetch the current state of a job.
    async fn job_status(
        &self,
        credential: &Credential,
        job_id: i64,
    ) -> Result<StorageJob, StorageApiError>;

    /// Prepare a file resource for uploading an artifact named `name`.
    async fn prepare_file(
        &self,
        credential: &Credential,
        name: &str,
    ) -> Result<UploadTarget, StorageApiError>;
}
