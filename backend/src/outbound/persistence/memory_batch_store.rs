//! Process-local [`BatchStore`] used by tests and database-less runs.
//!
//! All state sits behind one mutex, so every operation is trivially atomic.
//! Row ids come from a single counter and double as the arrival-order
//! tie-breaker, like the `bigserial` column in PostgreSQL.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use mockable::Clock;

use crate::domain::ports::{
    AppendOutcome, BatchStore, BatchStoreError, DrainSummary, RowSink, StagedBatch,
};
use crate::domain::{BufferedRow, Conditions, NewWebhook, Webhook, WebhookHash};

struct Entry {
    webhook: Webhook,
    rows: Vec<BufferedRow>,
}

#[derive(Default)]
struct State {
    next_webhook_id: i64,
    next_row_id: i64,
    entries: HashMap<WebhookHash, Entry>,
    injected_failure: Option<BatchStoreError>,
}

impl State {
    fn take_failure(&mut self) -> Result<(), BatchStoreError> {
        match self.injected_failure.take() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    fn entry_mut(&mut self, hash: &WebhookHash) -> Result<&mut Entry, BatchStoreError> {
        self.entries
            .get_mut(hash)
            .ok_or_else(|| BatchStoreError::not_found(hash.as_str()))
    }
}

/// In-memory batch store.
pub struct MemoryBatchStore {
    clock: Arc<dyn Clock>,
    state: Mutex<State>,
}

impl MemoryBatchStore {
    /// Empty store stamping rows and exports with `clock`.
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            state: Mutex::new(State::default()),
        }
    }

    /// Fail the next operation with `error`.
    pub fn fail_next(&self, error: BatchStoreError) {
        self.lock().injected_failure = Some(error);
    }

    /// Rows buffered for `hash`, in export order.
    pub fn rows(&self, hash: &WebhookHash) -> Vec<BufferedRow> {
        self.lock()
            .entries
            .get(hash)
            .map(|entry| entry.rows.clone())
            .unwrap_or_default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn write_all(rows: &[BufferedRow], sink: &mut dyn RowSink) -> Result<(u64, u64), BatchStoreError> {
    let mut bytes = 0_u64;
    for row in rows {
        sink.write_row(row)
            .map_err(|error| BatchStoreError::sink(error.to_string()))?;
        bytes += row.size_bytes();
    }
    Ok((rows.len() as u64, bytes))
}

#[async_trait]
impl BatchStore for MemoryBatchStore {
    async fn register(&self, new: NewWebhook) -> Result<Webhook, BatchStoreError> {
        let now = self.clock.utc();
        let mut state = self.lock();
        state.take_failure()?;
        let hash = loop {
            let candidate = WebhookHash::generate();
            if !state.entries.contains_key(&candidate) {
                break candidate;
            }
        };
        state.next_webhook_id += 1;
        let webhook = Webhook {
            id: state.next_webhook_id,
            hash: hash.clone(),
            project_id: new.project_id,
            credential: new.credential,
            table_id: new.table_id,
            size_bytes: 0,
            imported_at: now,
            conditions: new.conditions,
        };
        state.entries.insert(
            hash,
            Entry {
                webhook: webhook.clone(),
                rows: Vec::new(),
            },
        );
        Ok(webhook)
    }

    async fn get(&self, hash: &WebhookHash) -> Result<Webhook, BatchStoreError> {
        let mut state = self.lock();
        state.take_failure()?;
        Ok(state.entry_mut(hash)?.webhook.clone())
    }

    async fn append_row(
        &self,
        hash: &WebhookHash,
        headers: &str,
        body: &str,
    ) -> Result<AppendOutcome, BatchStoreError> {
        let now = self.clock.utc();
        let mut state = self.lock();
        state.take_failure()?;
        let id = state.next_row_id + 1;
        let entry = state.entry_mut(hash)?;
        let row = BufferedRow {
            id,
            time: now,
            headers: headers.to_owned(),
            body: body.to_owned(),
        };
        entry.webhook.size_bytes += row.size_bytes();
        entry.rows.push(row);
        let outcome = AppendOutcome {
            webhook: entry.webhook.clone(),
            rows_buffered: entry.rows.len() as u64,
        };
        state.next_row_id = id;
        Ok(outcome)
    }

    async fn count_rows(&self, webhook_id: i64) -> Result<u64, BatchStoreError> {
        let mut state = self.lock();
        state.take_failure()?;
        Ok(state
            .entries
            .values()
            .find(|entry| entry.webhook.id == webhook_id)
            .map_or(0, |entry| entry.rows.len() as u64))
    }

    async fn all_webhooks(&self) -> Result<Vec<Webhook>, BatchStoreError> {
        let mut state = self.lock();
        state.take_failure()?;
        let mut webhooks: Vec<Webhook> = state
            .entries
            .values()
            .map(|entry| entry.webhook.clone())
            .collect();
        webhooks.sort_by_key(|webhook| webhook.id);
        Ok(webhooks)
    }

    async fn drain(
        &self,
        hash: &WebhookHash,
        sink: &mut dyn RowSink,
    ) -> Result<DrainSummary, BatchStoreError> {
        let now = self.clock.utc();
        let mut state = self.lock();
        state.take_failure()?;
        let entry = state.entry_mut(hash)?;
        let (rows, bytes) = write_all(&entry.rows, sink)?;
        entry.rows.clear();
        entry.webhook.size_bytes = 0;
        entry.webhook.imported_at = now;
        Ok(DrainSummary {
            webhook: entry.webhook.clone(),
            rows,
            bytes,
        })
    }

    async fn stage(
        &self,
        hash: &WebhookHash,
        sink: &mut dyn RowSink,
    ) -> Result<StagedBatch, BatchStoreError> {
        let mut state = self.lock();
        state.take_failure()?;
        let entry = state.entry_mut(hash)?;
        let (rows, bytes) = write_all(&entry.rows, sink)?;
        Ok(StagedBatch {
            webhook: entry.webhook.clone(),
            rows,
            bytes,
            last_row_id: entry.rows.last().map(|row| row.id),
        })
    }

    async fn commit_staged(&self, staged: &StagedBatch) -> Result<Webhook, BatchStoreError> {
        let now = self.clock.utc();
        let mut state = self.lock();
        state.take_failure()?;
        let entry = state.entry_mut(&staged.webhook.hash)?;
        if let Some(last_row_id) = staged.last_row_id {
            entry.rows.retain(|row| row.id > last_row_id);
            entry.webhook.size_bytes = entry.webhook.size_bytes.saturating_sub(staged.bytes);
            entry.webhook.imported_at = now;
        }
        Ok(entry.webhook.clone())
    }

    async fn update_conditions(
        &self,
        hash: &WebhookHash,
        conditions: Conditions,
    ) -> Result<Webhook, BatchStoreError> {
        let mut state = self.lock();
        state.take_failure()?;
        let entry = state.entry_mut(hash)?;
        entry.webhook.conditions = conditions;
        Ok(entry.webhook.clone())
    }
}
