//! Export of one webhook's buffered batch to its destination table.
//!
//! The pipeline stages rows into a temporary artifact, uploads it, submits an
//! import or create-table job and waits for it. Rows are only deleted once the
//! job succeeded, so any failure leaves the batch in place for the next tick.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info};

use crate::domain::job_poller::JobPoller;
use crate::domain::port_errors::{map_storage_api_error, map_store_error};
use crate::domain::ports::{
    BatchStore, FileUploader, StagingArea, StorageApi, StorageJob, UploadTarget,
};
use crate::domain::{Error, Webhook, WebhookHash};

mod mapping;

/// Result of a successful export call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExportOutcome {
    /// Rows were uploaded and acknowledged by a finished job.
    Exported {
        /// Acknowledged rows.
        rows: u64,
        /// Acknowledged bytes.
        bytes: u64,
        /// Storage job that loaded the batch.
        job_id: i64,
    },
    /// The batch was empty.
    NothingToExport,
}

/// Exports a webhook's batch. Shared by the scheduler and manual flushes.
#[async_trait]
pub trait BatchExporter: Send + Sync {
    /// Export everything buffered for `hash`.
    async fn export(&self, hash: &WebhookHash) -> Result<ExportOutcome, Error>;
}

/// Tunables for [`ExportPipeline`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExportPipelineConfig {
    /// Upper bound for one artifact upload.
    pub upload_timeout: Duration,
}

impl Default for ExportPipelineConfig {
    fn default() -> Self {
        Self {
            upload_timeout: Duration::from_secs(30),
        }
    }
}

/// Port bundle required by the export pipeline.
pub struct ExportPipelinePorts {
    /// Webhook and row persistence.
    pub store: Arc<dyn BatchStore>,
    /// Downstream Storage API.
    pub storage_api: Arc<dyn StorageApi>,
    /// Artifact uploader.
    pub uploader: Arc<dyn FileUploader>,
    /// Temporary artifact factory.
    pub staging: Arc<dyn StagingArea>,
}

/// Stage, upload, import, acknowledge.
pub struct ExportPipeline {
    store: Arc<dyn BatchStore>,
    storage_api: Arc<dyn StorageApi>,
    uploader: Arc<dyn FileUploader>,
    staging: Arc<dyn StagingArea>,
    poller: JobPoller,
    config: ExportPipelineConfig,
}

impl ExportPipeline {
    /// Assemble a pipeline; `poller` should share the Storage API adapter.
    pub fn new(ports: ExportPipelinePorts, poller: JobPoller, config: ExportPipelineConfig) -> Self {
        Self {
            store: ports.store,
            storage_api: ports.storage_api,
            uploader: ports.uploader,
            staging: ports.staging,
            poller,
            config,
        }
    }

    async fn export_webhook(&self, webhook: &Webhook) -> Result<ExportOutcome, Error> {
        let credential = &webhook.credential;
        self.storage_api
            .verify_token(credential)
            .await
            .map_err(map_storage_api_error)?;
        self.ensure_bucket(webhook).await?;

        let mut artifact = self
            .staging
            .create_artifact(&format!("webhook-{}", webhook.hash))
            .map_err(mapping::map_staging_error)?;
        let staged = self
            .store
            .stage(&webhook.hash, artifact.as_row_sink())
            .await
            .map_err(map_store_error)?;
        if staged.is_empty() {
            debug!(hash = %webhook.hash, "no buffered rows to export");
            return Ok(ExportOutcome::NothingToExport);
        }
        artifact.finish().map_err(mapping::map_staging_error)?;

        let target = self
            .storage_api
            .prepare_file(credential, &format!("webhook-{}.csv", webhook.hash))
            .await
            .map_err(map_storage_api_error)?;
        self.upload(artifact.path(), &target).await?;

        let job = self.submit_job(webhook, target.file_id).await?;
        let finished = self
            .poller
            .await_job(credential, job)
            .await
            .map_err(mapping::map_poll_error)?;

        self.store
            .commit_staged(&staged)
            .await
            .map_err(map_store_error)?;
        info!(
            hash = %webhook.hash,
            table_id = %webhook.table_id,
            rows = staged.rows,
            bytes = staged.bytes,
            job_id = finished.id,
            "batch exported"
        );
        Ok(ExportOutcome::Exported {
            rows: staged.rows,
            bytes: staged.bytes,
            job_id: finished.id,
        })
    }

    async fn ensure_bucket(&self, webhook: &Webhook) -> Result<(), Error> {
        let table_id = &webhook.table_id;
        let exists = self
            .storage_api
            .bucket_exists(&webhook.credential, table_id.bucket_id())
            .await
            .map_err(map_storage_api_error)?;
        if exists {
            debug!(bucket_id = table_id.bucket_id(), "bucket exists");
            return Ok(());
        }
        let name = table_id.bucket_display_name();
        self.storage_api
            .create_bucket(&webhook.credential, name, table_id.stage(), name)
            .await
            .map_err(map_storage_api_error)?;
        info!(bucket_id = table_id.bucket_id(), "bucket created");
        Ok(())
    }

    async fn upload(&self, path: &std::path::Path, target: &UploadTarget) -> Result<(), Error> {
        match tokio::time::timeout(self.config.upload_timeout, self.uploader.upload(path, target))
            .await
        {
            Ok(result) => result.map_err(mapping::map_upload_error),
            Err(_elapsed) => Err(Error::timeout(format!(
                "upload did not finish within {:?}",
                self.config.upload_timeout
            ))),
        }
    }

    async fn submit_job(&self, webhook: &Webhook, file_id: i64) -> Result<StorageJob, Error> {
        let credential = &webhook.credential;
        let table_id = &webhook.table_id;
        let table_exists = self
            .storage_api
            .table_exists(credential, table_id.as_str())
            .await
            .map_err(map_storage_api_error)?;
        let submitted = if table_exists {
            self.storage_api
                .import_table_async(credential, table_id.as_str(), file_id, true)
                .await
        } else {
            self.storage_api
                .create_table_async(credential, table_id.bucket_id(), table_id.table(), file_id)
                .await
        };
        submitted.map_err(map_storage_api_error)
    }
}

#[async_trait]
impl BatchExporter for ExportPipeline {
    async fn export(&self, hash: &WebhookHash) -> Result<ExportOutcome, Error> {
        let webhook = self.store.get(hash).await.map_err(map_store_error)?;
        self.export_webhook(&webhook).await.map_err(|error| {
            error.with_context(format!(
                "export of webhook \"{}\" to table \"{}\"",
                webhook.hash, webhook.table_id
            ))
        })
    }
}

#[cfg(test)]
mod tests;
