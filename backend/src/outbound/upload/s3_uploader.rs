//! S3-backed artifact uploader.
//!
//! The Storage API prepares every file resource with federated credentials
//! scoped to one bucket and key. Each upload builds a short-lived S3 client
//! from those credentials and writes the artifact with a single `PutObject`.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use aws_sdk_s3::Client;
use aws_sdk_s3::config::timeout::TimeoutConfig;
use aws_sdk_s3::config::{BehaviorVersion, Credentials, Region};
use aws_sdk_s3::error::{DisplayErrorContext, SdkError};
use aws_sdk_s3::operation::put_object::PutObjectError;
use aws_sdk_s3::primitives::ByteStream;
use tracing::debug;

use crate::domain::ports::{FileUploader, UploadError, UploadTarget};

const CREDENTIALS_PROVIDER: &str = "storage-api-federation";
const MESSAGE_PREVIEW_CHARS: usize = 160;

/// Uploader writing artifacts to the S3 object prepared by the Storage API.
#[derive(Debug, Clone)]
pub struct S3FileUploader {
    timeout: Duration,
}

impl S3FileUploader {
    /// Build an uploader whose writes time out after `timeout`.
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    fn client_for(&self, target: &UploadTarget) -> Client {
        let credentials = Credentials::new(
            target.credentials.access_key_id.clone(),
            target.credentials.secret_access_key.clone(),
            Some(target.credentials.session_token.clone()),
            None,
            CREDENTIALS_PROVIDER,
        );
        let config = aws_sdk_s3::Config::builder()
            .behavior_version(BehaviorVersion::latest())
            .region(Region::new(target.region.clone()))
            .credentials_provider(credentials)
            .timeout_config(
                TimeoutConfig::builder()
                    .operation_timeout(self.timeout)
                    .build(),
            )
            .build();
        Client::from_conf(config)
    }
}

#[async_trait]
impl FileUploader for S3FileUploader {
    async fn upload(&self, path: &Path, target: &UploadTarget) -> Result<(), UploadError> {
        let contents = tokio::fs::read(path)
            .await
            .map_err(|error| UploadError::io(format!("{}: {error}", path.display())))?;
        let bytes = contents.len();

        self.client_for(target)
            .put_object()
            .bucket(target.bucket.as_str())
            .key(target.key.as_str())
            .content_type("text/csv")
            .body(ByteStream::from(contents))
            .send()
            .await
            .map_err(map_put_error)?;

        debug!(
            file_id = target.file_id,
            bucket = %target.bucket,
            key = %target.key,
            bytes,
            "artifact uploaded"
        );
        Ok(())
    }
}

fn map_put_error(error: SdkError<PutObjectError>) -> UploadError {
    let message = DisplayErrorContext(&error).to_string();
    match &error {
        SdkError::ServiceError(context) => {
            rejection(context.raw().status().as_u16(), &message)
        }
        _ => UploadError::transport(message),
    }
}

fn rejection(status: u16, message: &str) -> UploadError {
    let compacted = message.split_whitespace().collect::<Vec<_>>().join(" ");
    let message = if compacted.is_empty() {
        "object store refused the write".to_owned()
    } else {
        compacted.chars().take(MESSAGE_PREVIEW_CHARS).collect()
    };
    UploadError::rejected(status, message)
}
