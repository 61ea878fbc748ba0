//! Translation of driven-port failures into domain errors.

use serde_json::json;
use tracing::error;

use crate::domain::Error;
use crate::domain::ports::{BatchStoreError, StorageApiError};

pub(crate) fn map_store_error(error: BatchStoreError) -> Error {
    match error {
        BatchStoreError::NotFound { hash } => {
            Error::not_found(format!("Webhook with hash \"{hash}\" not found."))
                .with_details(json!({ "hash": hash }))
        }
        BatchStoreError::Connection { message } => {
            Error::service_unavailable(format!("batch store unavailable: {message}"))
        }
        BatchStoreError::Query { message } => {
            Error::internal(format!("batch store query failed: {message}"))
        }
        BatchStoreError::Sink { message } => {
            Error::internal(format!("writing batch failed: {message}"))
        }
        BatchStoreError::Corrupted { message } => {
            error!(error = %message, "stored webhook failed validation");
            Error::internal(format!("stored webhook is corrupted: {message}"))
        }
    }
}

pub(crate) fn map_storage_api_error(error: StorageApiError) -> Error {
    match error {
        StorageApiError::Unauthorized { message } => {
            Error::unauthorized(format!("storage token rejected: {message}"))
        }
        StorageApiError::Timeout { message } => {
            Error::timeout(format!("storage api timed out: {message}"))
        }
        StorageApiError::Transport { message } => {
            Error::service_unavailable(format!("storage api unreachable: {message}"))
        }
        StorageApiError::Status { status, message } if status >= 500 || status == 429 => {
            Error::service_unavailable(format!("storage api returned {status}: {message}"))
        }
        other => Error::internal(format!("storage api call failed: {other}")),
    }
}
