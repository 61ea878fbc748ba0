//! Driven port for writing staging artifacts to object storage.

use std::path::Path;

use async_trait::async_trait;

use super::{UploadTarget, define_port_error};

define_port_error! {
    /// Errors surfaced while uploading an artifact.
    pub enum UploadError {
        /// The local artifact could not be read.
        Io { message: String } => "upload source unreadable: {message}",
        /// Network transport failed.
        Transport { message: String } => "upload transport failed: {message}",
        /// The object store refused the write.
        Rejected { status: u16, message: String } => "upload rejected with {status}: {message}",
    }
}

/// Port for uploading one local file to a prepared target.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait FileUploader: Send + Sync {
    /// Upload the file at `path` to `target`.
    async fn upload(&self, path: &Path, target: &UploadTarget) -> Result<(), UploadError>;
}
