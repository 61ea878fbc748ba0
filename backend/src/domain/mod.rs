//! Domain primitives, services and ports.
//!
//! Purpose: Define the strongly typed webhook model, the flush policy and the
//! services that buffer, schedule and export batches. Adapters live in
//! `crate::outbound` and plug into the traits in [`ports`].
//!
//! Public surface:
//! - Error (alias to `error::Error`) — transport-agnostic error payload.
//! - Conditions (alias to `conditions::Conditions`) — per-webhook flush policy.
//! - Webhook (alias to `webhook::Webhook`) — registered webhook and accounting.
//! - ExportPipeline, FlushScheduler, WebhookService — the three services.

pub mod conditions;
pub mod error;
pub mod export_pipeline;
pub mod flush_scheduler;
pub mod job_poller;
pub(crate) mod port_errors;
pub mod ports;
pub mod webhook;
pub mod webhook_service;

pub use self::conditions::{
    Conditions, ConditionsError, ConditionsInput, ConditionsView, DEFAULT_COUNT, MAX_COUNT,
    MAX_SIZE, MAX_TIME,
};
pub use self::error::{Error, ErrorCode, ErrorValidationError};
pub use self::export_pipeline::{
    BatchExporter, ExportOutcome, ExportPipeline, ExportPipelineConfig, ExportPipelinePorts,
};
pub use self::flush_scheduler::{
    FlushScheduler, FlushSchedulerConfig, InFlightGuard, InFlightSet, ManualFlushStatus,
    TickReport,
};
pub use self::job_poller::{
    Backoff, BackoffPolicy, JobPollError, JobPoller, PollSleeper, TokioSleeper,
};
pub use self::webhook::{
    BufferedRow, Credential, HASH_LENGTH, NewWebhook, TableId, Webhook, WebhookHash,
    WebhookValidationError,
};
pub use self::webhook_service::WebhookService;

