//! Exporter double for scheduler and service tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::Notify;

use super::lock;
use crate::domain::{BatchExporter, Error, ExportOutcome, WebhookHash};

/// Exporter returning scripted outcomes and counting calls.
///
/// Without a script every call reports one exported row. With a gate, each
/// call signals `started` and then blocks until the gate is notified.
#[derive(Default)]
pub struct ScriptedExporter {
    calls: AtomicUsize,
    hashes: Mutex<Vec<WebhookHash>>,
    outcomes: Mutex<VecDeque<Result<ExportOutcome, Error>>>,
    gate: Option<Arc<Notify>>,
    started: Arc<Notify>,
}

impl ScriptedExporter {
    /// Exporter that succeeds immediately.
    pub fn new() -> Self {
        Self::default()
    }

    /// Exporter that blocks each call until `gate` is notified.
    pub fn gated(gate: Arc<Notify>) -> Self {
        Self {
            gate: Some(gate),
            ..Self::default()
        }
    }

    /// Queue outcomes for successive calls.
    pub fn with_outcomes(
        self,
        outcomes: impl IntoIterator<Item = Result<ExportOutcome, Error>>,
    ) -> Self {
        lock(&self.outcomes).extend(outcomes);
        self
    }

    /// Number of export calls so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Hashes exported so far, in call order.
    pub fn hashes(&self) -> Vec<WebhookHash> {
        lock(&self.hashes).clone()
    }

    /// Resolve once a call has started.
    pub async fn started(&self) {
        self.started.notified().await;
    }
}

#[async_trait]
impl BatchExporter for ScriptedExporter {
    async fn export(&self, hash: &WebhookHash) -> Result<ExportOutcome, Error> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        lock(&self.hashes).push(hash.clone());
        self.started.notify_one();
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        let scripted = lock(&self.outcomes).pop_front();
        scripted.unwrap_or(Ok(ExportOutcome::Exported {
            rows: 1,
            bytes: 1,
            job_id: 1,
        }))
    }
}
