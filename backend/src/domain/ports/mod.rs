//! Domain ports and supporting types for the hexagonal boundary.

mod macros;
pub(crate) use macros::define_port_error;

mod batch_store;
mod file_uploader;
mod staging;
mod storage_api;
mod webhook_command;

pub use batch_store::{AppendOutcome, BatchStore, BatchStoreError, DrainSummary, StagedBatch};
#[cfg(test)]
pub use file_uploader::MockFileUploader;
pub use file_uploader::{FileUploader, UploadError};
pub use staging::{RowSink, StagingArea, StagingArtifact, StagingError};
#[cfg(test)]
pub use storage_api::MockStorageApi;
pub use storage_api::{
    JobStatus, ProjectToken, StorageApi, StorageApiError, StorageJob, UploadCredentials,
    UploadTarget,
};
#[cfg(test)]
pub use webhook_command::MockWebhookCommand;
pub use webhook_command::{
    FlushResult, FlushStatus, ImportRequest, ImportResult, RegisterRequest, RegistrationResult,
    UpdateConditionsRequest, UpdateResult, WebhookCommand,
};
