//! Mapping helpers for pipeline-specific failures.

use crate::domain::Error;
use crate::domain::job_poller::JobPollError;
use crate::domain::port_errors::map_storage_api_error;
use crate::domain::ports::{StagingError, UploadError};

pub(super) fn map_staging_error(error: StagingError) -> Error {
    Error::internal(format!("staging batch failed: {error}"))
}

pub(super) fn map_upload_error(error: UploadError) -> Error {
    match error {
        UploadError::Io { message } => {
            Error::internal(format!("reading staged batch failed: {message}"))
        }
        other => Error::service_unavailable(format!("upload failed: {other}")),
    }
}

pub(super) fn map_poll_error(error: JobPollError) -> Error {
    match error {
        JobPollError::RemoteJobFailed { job_id, details } => {
            Error::remote_job_failed(format!("storage job {job_id} failed: {details}"))
        }
        timeout @ JobPollError::Timeout { .. } => Error::timeout(timeout.to_string()),
        cancelled @ JobPollError::Cancelled { .. } => {
            Error::service_unavailable(cancelled.to_string())
        }
        JobPollError::Api { job_id, source } => {
            map_storage_api_error(source).with_context(format!("polling storage job {job_id}"))
        }
    }
}
