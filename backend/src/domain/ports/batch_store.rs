//! Driven port for webhook and buffered-row persistence.
//!
//! Every mutating operation runs in a single transaction that first takes an
//! exclusive lock on the webhook record, so read-modify-write sequences for
//! one hash never interleave. Operations on different hashes do not contend.

use async_trait::async_trait;

use super::{RowSink, define_port_error};
use crate::domain::{Conditions, NewWebhook, Webhook, WebhookHash};

define_port_error! {
    /// Errors surfaced by batch store adapters.
    pub enum BatchStoreError {
        /// No webhook is registered under the hash.
        NotFound { hash: String } => "Webhook with hash \"{hash}\" not found.",
        /// The backing store could not be reached.
        Connection { message: String } => "batch store connection failed: {message}",
        /// A query or statement failed.
        Query { message: String } => "batch store query failed: {message}",
        /// The row sink rejected a row; the transaction was rolled back.
        Sink { message: String } => "batch sink failed: {message}",
        /// A stored record violates a domain invariant.
        Corrupted { message: String } => "stored webhook is corrupted: {message}",
    }
}

/// Result of appending one row.
#[derive(Debug, Clone, PartialEq)]
pub struct AppendOutcome {
    /// Webhook after the size update.
    pub webhook: Webhook,
    /// Rows buffered for the webhook including the new one.
    pub rows_buffered: u64,
}

/// Rows streamed to a sink by [`BatchStore::stage`], not yet deleted.
#[derive(Debug, Clone, PartialEq)]
pub struct StagedBatch {
    /// Webhook as read under the lock.
    pub webhook: Webhook,
    /// Number of staged rows.
    pub rows: u64,
    /// Sum of staged row sizes.
    pub bytes: u64,
    /// Highest staged row id; `None` when nothing was staged.
    pub last_row_id: Option<i64>,
}

impl StagedBatch {
    /// Whether the batch held no rows.
    pub fn is_empty(&self) -> bool {
        self.rows == 0
    }
}

/// Result of an atomic drain.
#[derive(Debug, Clone, PartialEq)]
pub struct DrainSummary {
    /// Webhook after the accounting reset.
    pub webhook: Webhook,
    /// Number of drained rows.
    pub rows: u64,
    /// Sum of drained row sizes.
    pub bytes: u64,
}

/// Transactional persistence for webhooks and their buffered rows.
#[async_trait]
pub trait BatchStore: Send + Sync {
    /// Persist a new webhook with a generated hash and zero accounting.
    async fn register(&self, webhook: NewWebhook) -> Result<Webhook, BatchStoreError>;

    /// Load a webhook by hash.
    async fn get(&self, hash: &WebhookHash) -> Result<Webhook, BatchStoreError>;

    /// Insert a row and grow the webhook's size by `headers.len() + body.len()`.
    async fn append_row(
        &self,
        hash: &WebhookHash,
        headers: &str,
        body: &str,
    ) -> Result<AppendOutcome, BatchStoreError>;

    /// Count rows currently buffered for a webhook.
    async fn count_rows(&self, webhook_id: i64) -> Result<u64, BatchStoreError>;

    /// Snapshot of every registered webhook.
    async fn all_webhooks(&self) -> Result<Vec<Webhook>, BatchStoreError>;

    /// Stream every buffered row into `sink` in arrival order, delete them,
    /// and reset size and last-export time. Nothing changes on failure.
    async fn drain(
        &self,
        hash: &WebhookHash,
        sink: &mut dyn RowSink,
    ) -> Result<DrainSummary, BatchStoreError>;

    /// Stream every buffered row into `sink` in arrival order without
    /// deleting anything.
    async fn stage(
        &self,
        hash: &WebhookHash,
        sink: &mut dyn RowSink,
    ) -> Result<StagedBatch, BatchStoreError>;

    /// Delete the rows covered by `staged`, subtract their bytes from the
    /// size and set the last-export time. Rows appended after staging stay.
    async fn commit_staged(&self, staged: &StagedBatch) -> Result<Webhook, BatchStoreError>;

    /// Replace the flush policy.
    async fn update_conditions(
        &self,
        hash: &WebhookHash,
        conditions: Conditions,
    ) -> Result<Webhook, BatchStoreError>;
}
