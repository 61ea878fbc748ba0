//! Driving port exposing the webhook entry points to the transport layer.
//!
//! Request and result shapes are plain serde types so any transport can decode
//! into them and encode results back without touching domain internals.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::domain::{ConditionsInput, ConditionsView, Error};

/// Registration payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
    /// Storage API token used for every export of the webhook.
    pub token: String,
    /// Destination table, `<stage>.<bucket>.<table>`.
    pub table_id: String,
    /// Optional flush policy.
    #[serde(default)]
    pub conditions: Option<ConditionsInput>,
}

/// Registration result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistrationResult {
    /// Public ingestion URL containing the generated hash.
    pub url: String,
}

/// Flush policy replacement payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateConditionsRequest {
    /// Webhook hash from the URL.
    pub hash: String,
    /// New flush policy.
    pub conditions: ConditionsInput,
}

/// Flush policy replacement result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateResult {
    /// Policy now in force.
    pub conditions: ConditionsView,
}

/// One inbound webhook delivery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportRequest {
    /// Webhook hash from the URL.
    pub hash: String,
    /// Request headers as received.
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    /// Raw request body.
    pub body: String,
}

/// Result of buffering one delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportResult {
    /// Rows now waiting for export, including this one.
    pub rows_buffered: u64,
}

/// Outcome of a manual flush request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlushStatus {
    /// The batch was exported and acknowledged.
    Exported,
    /// The batch was empty; nothing was uploaded.
    NothingToExport,
    /// Another export for the webhook is running.
    InProgress,
}

/// Result of a manual flush request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlushResult {
    /// What happened.
    pub status: FlushStatus,
    /// Rows exported by this request.
    pub rows: u64,
}

/// Entry points of the webhook core.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait WebhookCommand: Send + Sync {
    /// Register a webhook after verifying its token.
    async fn register(&self, request: RegisterRequest) -> Result<RegistrationResult, Error>;

    /// Replace a webhook's flush policy.
    async fn update_conditions(
        &self,
        request: UpdateConditionsRequest,
    ) -> Result<UpdateResult, Error>;

    /// Buffer one delivery.
    async fn append_row(&self, request: ImportRequest) -> Result<ImportResult, Error>;

    /// Export a webhook's batch now, sharing the scheduler's in-flight guard.
    async fn manual_flush(&self, hash: &str) -> Result<FlushResult, Error>;
}
