//! Webhook entry points: registration, policy updates, ingestion and manual
//! flushes.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info};

use crate::domain::flush_scheduler::{FlushScheduler, ManualFlushStatus};
use crate::domain::port_errors::{map_storage_api_error, map_store_error};
use crate::domain::ports::{
    BatchStore, BatchStoreError, FlushResult, FlushStatus, ImportRequest, ImportResult,
    RegisterRequest, RegistrationResult, StorageApi, StorageApiError, UpdateConditionsRequest,
    UpdateResult, WebhookCommand,
};
use crate::domain::{
    Conditions, Credential, Error, ExportOutcome, NewWebhook, TableId, Webhook, WebhookHash,
};

/// Webhook service implementing [`WebhookCommand`].
#[derive(Clone)]
pub struct WebhookService {
    store: Arc<dyn BatchStore>,
    storage_api: Arc<dyn StorageApi>,
    scheduler: Arc<FlushScheduler>,
    public_host: String,
}

impl WebhookService {
    /// Create a service issuing ingestion URLs on `public_host`.
    pub fn new(
        store: Arc<dyn BatchStore>,
        storage_api: Arc<dyn StorageApi>,
        scheduler: Arc<FlushScheduler>,
        public_host: impl Into<String>,
    ) -> Self {
        Self {
            store,
            storage_api,
            scheduler,
            public_host: public_host.into(),
        }
    }

    /// Load a webhook by its public hash.
    ///
    /// # Errors
    ///
    /// [`crate::domain::ErrorCode::NotFound`] for unknown or malformed hashes.
    pub async fn get(&self, hash: &str) -> Result<Webhook, Error> {
        let hash = parse_hash(hash)?;
        self.store.get(&hash).await.map_err(map_store_error)
    }

    async fn authenticate(&self, credential: &Credential) -> Result<i64, Error> {
        match self.storage_api.verify_token(credential).await {
            Ok(token) => Ok(token.project_id),
            Err(StorageApiError::Unauthorized { .. }) => Err(Error::unauthorized(format!(
                "Invalid storage token \"{}\" supplied.",
                credential.fingerprint()
            ))),
            Err(other) => Err(map_storage_api_error(other)),
        }
    }
}

fn parse_hash(hash: &str) -> Result<WebhookHash, Error> {
    WebhookHash::new(hash).map_err(|_| map_store_error(BatchStoreError::not_found(hash)))
}

fn invalid(error: impl std::fmt::Display) -> Error {
    Error::invalid_request(error.to_string())
}

#[async_trait]
impl WebhookCommand for WebhookService {
    async fn register(&self, request: RegisterRequest) -> Result<RegistrationResult, Error> {
        let table_id: TableId = request
            .table_id
            .parse()
            .map_err(|_| Error::invalid_request(format!("invalid table ID: {}", request.table_id)))?;
        let conditions = Conditions::from_input(request.conditions.as_ref()).map_err(invalid)?;
        let credential = Credential::new(request.token).map_err(invalid)?;
        let project_id = self.authenticate(&credential).await?;

        let webhook = self
            .store
            .register(NewWebhook {
                project_id,
                credential,
                table_id,
                conditions,
            })
            .await
            .map_err(map_store_error)?;
        info!(table_id = %webhook.table_id, project_id, "registered webhook");
        Ok(RegistrationResult {
            url: webhook.url(&self.public_host),
        })
    }

    async fn update_conditions(
        &self,
        request: UpdateConditionsRequest,
    ) -> Result<UpdateResult, Error> {
        let conditions = Conditions::from_input(Some(&request.conditions)).map_err(invalid)?;
        let hash = parse_hash(&request.hash)?;
        let webhook = self
            .store
            .update_conditions(&hash, conditions)
            .await
            .map_err(map_store_error)?;
        debug!(%hash, "updated flush conditions");
        Ok(UpdateResult {
            conditions: webhook.conditions.view(),
        })
    }

    async fn append_row(&self, request: ImportRequest) -> Result<ImportResult, Error> {
        let hash = parse_hash(&request.hash)?;
        let headers = serde_json::to_string(&request.headers)
            .map_err(|error| Error::internal(format!("cannot encode headers: {error}")))?;
        let outcome = self
            .store
            .append_row(&hash, &headers, &request.body)
            .await
            .map_err(map_store_error)?;
        info!(table_id = %outcome.webhook.table_id, rows = outcome.rows_buffered, "received webhook");
        Ok(ImportResult {
            rows_buffered: outcome.rows_buffered,
        })
    }

    async fn manual_flush(&self, hash: &str) -> Result<FlushResult, Error> {
        let hash = parse_hash(hash)?;
        let result = match self.scheduler.flush_now(&hash).await? {
            ManualFlushStatus::InProgress => FlushResult {
                status: FlushStatus::InProgress,
                rows: 0,
            },
            ManualFlushStatus::Completed(ExportOutcome::NothingToExport) => FlushResult {
                status: FlushStatus::NothingToExport,
                rows: 0,
            },
            ManualFlushStatus::Completed(ExportOutcome::Exported { rows, .. }) => FlushResult {
                status: FlushStatus::Exported,
                rows,
            },
        };
        Ok(result)
    }
}

#[cfg(test)]
#[path = "webhook_service_tests.rs"]
mod tests;
