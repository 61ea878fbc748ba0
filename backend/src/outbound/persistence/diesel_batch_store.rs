//! PostgreSQL-backed batch store.
//!
//! Every mutation runs in one transaction that starts with
//! `SELECT ... FOR UPDATE` on the webhook row. Appends, drains, staging and
//! acknowledgements for the same hash therefore serialise, while different
//! hashes proceed independently.

use std::sync::Arc;

use async_trait::async_trait;
use diesel::prelude::*;
use diesel_async::scoped_futures::ScopedFutureExt;
use diesel_async::{AsyncConnection, AsyncPgConnection, RunQueryDsl};
use mockable::Clock;
use tracing::{debug, error};

use crate::domain::ports::{
    AppendOutcome, BatchStore, BatchStoreError, DrainSummary, RowSink, StagedBatch,
};
use crate::domain::{BufferedRow, Conditions, NewWebhook, Webhook, WebhookHash};

use super::models::{
    BufferedRowRecord, ConditionsUpdate, NewBufferedRow, NewWebhookRow, WebhookRow, to_i64,
};
use super::pool::{DbPool, PoolError};
use super::schema::{buffered_rows, webhooks};

const MAX_HASH_ATTEMPTS: usize = 5;

/// Diesel-backed implementation of [`BatchStore`].
#[derive(Clone)]
pub struct DieselBatchStore {
    pool: DbPool,
    clock: Arc<dyn Clock>,
}

impl DieselBatchStore {
    /// Create a store over `pool`, stamping rows and exports with `clock`.
    ///
    /// # Examples
    ///
    /// ```rust,no_run
    /// use std::sync::Arc;
    /// use mockable::DefaultClock;
    /// use webhook_batcher::outbound::persistence::{DbPool, DieselBatchStore, PoolConfig};
    ///
    /// # async fn run() -> Result<(), Box<dyn std::error::Error>> {
    /// let pool = DbPool::new(PoolConfig::new("postgres://localhost/webhooks")).await?;
    /// let store = DieselBatchStore::new(pool, Arc::new(DefaultClock));
    /// # let _ = store;
    /// # Ok(())
    /// # }
    /// ```
    pub fn new(pool: DbPool, clock: Arc<dyn Clock>) -> Self {
        Self { pool, clock }
    }
}

/// Failure inside a transaction body.
enum TxError {
    Store(BatchStoreError),
    Diesel(diesel::result::Error),
}

impl From<diesel::result::Error> for TxError {
    fn from(error: diesel::result::Error) -> Self {
        Self::Diesel(error)
    }
}

impl From<BatchStoreError> for TxError {
    fn from(error: BatchStoreError) -> Self {
        Self::Store(error)
    }
}

fn map_pool_error(error: PoolError) -> BatchStoreError {
    match error {
        PoolError::Checkout { message } | PoolError::Build { message } => {
            BatchStoreError::connection(message)
        }
    }
}

fn map_diesel_error(error: diesel::result::Error) -> BatchStoreError {
    use diesel::result::{DatabaseErrorKind, Error as DieselError};

    let error_message = error.to_string();
    match &error {
        DieselError::DatabaseError(kind, info) => {
            debug!(
                ?kind,
                message = info.message(),
                error = %error_message,
                "diesel operation failed"
            );
        }
        _ => debug!(
            error_type = %std::any::type_name_of_val(&error),
            error = %error_message,
            "diesel operation failed"
        ),
    }

    match error {
        DieselError::NotFound => BatchStoreError::query("record not found"),
        DieselError::DatabaseError(DatabaseErrorKind::ClosedConnection, info) => {
            BatchStoreError::connection(info.message().to_owned())
        }
        DieselError::DatabaseError(_, info) => BatchStoreError::query(info.message().to_owned()),
        _ => BatchStoreError::query(error_message),
    }
}

fn map_tx_error(error: TxError) -> BatchStoreError {
    match error {
        TxError::Store(error) => error,
        TxError::Diesel(error) => map_diesel_error(error),
    }
}

async fn lock_webhook(
    conn: &mut AsyncPgConnection,
    hash: &WebhookHash,
) -> Result<WebhookRow, TxError> {
    webhooks::table
        .filter(webhooks::hash.eq(hash.as_str()))
        .select(WebhookRow::as_select())
        .for_update()
        .first(conn)
        .await
        .optional()?
        .ok_or_else(|| TxError::Store(BatchStoreError::not_found(hash.as_str())))
}

async fn load_rows(
    conn: &mut AsyncPgConnection,
    webhook_id: i64,
) -> Result<Vec<BufferedRow>, TxError> {
    let records: Vec<BufferedRowRecord> = buffered_rows::table
        .filter(buffered_rows::webhook_id.eq(webhook_id))
        .order((buffered_rows::time.asc(), buffered_rows::id.asc()))
        .select(BufferedRowRecord::as_select())
        .load(conn)
        .await?;
    Ok(records.into_iter().map(BufferedRow::from).collect())
}

struct Written {
    rows: u64,
    bytes: u64,
    last_row_id: Option<i64>,
}

fn write_rows(rows: &[BufferedRow], sink: &mut dyn RowSink) -> Result<Written, TxError> {
    let mut bytes = 0_u64;
    for row in rows {
        sink.write_row(row)
            .map_err(|error| BatchStoreError::sink(error.to_string()))?;
        bytes += row.size_bytes();
    }
    Ok(Written {
        rows: rows.len() as u64,
        bytes,
        last_row_id: rows.iter().map(|row| row.id).max(),
    })
}

fn to_webhook(row: WebhookRow) -> Result<Webhook, TxError> {
    Webhook::try_from(row).map_err(TxError::Store)
}

#[async_trait]
impl BatchStore for DieselBatchStore {
    async fn register(&self, new: NewWebhook) -> Result<Webhook, BatchStoreError> {
        let mut conn = self.pool.get().await.map_err(map_pool_error)?;
        let conditions = ConditionsUpdate::from_domain(&new.conditions)?;
        let imported_at = self.clock.utc();

        for _ in 0..MAX_HASH_ATTEMPTS {
            let hash = WebhookHash::generate();
            let row = NewWebhookRow {
                hash: hash.as_str(),
                project_id: new.project_id,
                token: new.credential.expose(),
                table_id: new.table_id.as_str(),
                size: 0,
                imported_at,
                condition_count: conditions.condition_count,
                condition_time_ms: conditions.condition_time_ms,
                condition_size: conditions.condition_size,
            };
            let inserted = diesel::insert_into(webhooks::table)
                .values(&row)
                .on_conflict(webhooks::hash)
                .do_nothing()
                .returning(WebhookRow::as_returning())
                .get_result(&mut conn)
                .await
                .optional()
                .map_err(map_diesel_error)?;
            match inserted {
                Some(row) => return Webhook::try_from(row),
                None => debug!("generated webhook hash collided; retrying"),
            }
        }
        Err(BatchStoreError::query("could not allocate a unique webhook hash"))
    }

    async fn get(&self, hash: &WebhookHash) -> Result<Webhook, BatchStoreError> {
        let mut conn = self.pool.get().await.map_err(map_pool_error)?;
        let row = webhooks::table
            .filter(webhooks::hash.eq(hash.as_str()))
            .select(WebhookRow::as_select())
            .first(&mut conn)
            .await
            .optional()
            .map_err(map_diesel_error)?
            .ok_or_else(|| BatchStoreError::not_found(hash.as_str()))?;
        Webhook::try_from(row)
    }

    async fn append_row(
        &self,
        hash: &WebhookHash,
        headers: &str,
        body: &str,
    ) -> Result<AppendOutcome, BatchStoreError> {
        let added = to_i64((headers.len() + body.len()) as u64, "row size")?;
        let now = self.clock.utc();
        let mut conn = self.pool.get().await.map_err(map_pool_error)?;

        conn.transaction(|conn| {
            async move {
                let locked = lock_webhook(conn, hash).await?;
                diesel::insert_into(buffered_rows::table)
                    .values(NewBufferedRow {
                        webhook_id: locked.id,
                        time: now,
                        headers,
                        body,
                    })
                    .execute(conn)
                    .await?;
                let updated = diesel::update(webhooks::table.find(locked.id))
                    .set(webhooks::size.eq(webhooks::size + added))
                    .returning(WebhookRow::as_returning())
                    .get_result(conn)
                    .await?;
                let count: i64 = buffered_rows::table
                    .filter(buffered_rows::webhook_id.eq(locked.id))
                    .count()
                    .get_result(conn)
                    .await?;
                Ok(AppendOutcome {
                    webhook: to_webhook(updated)?,
                    rows_buffered: u64::try_from(count).unwrap_or_default(),
                })
            }
            .scope_boxed()
        })
        .await
        .map_err(map_tx_error)
    }

    async fn count_rows(&self, webhook_id: i64) -> Result<u64, BatchStoreError> {
        let mut conn = self.pool.get().await.map_err(map_pool_error)?;
        let count: i64 = buffered_rows::table
            .filter(buffered_rows::webhook_id.eq(webhook_id))
            .count()
            .get_result(&mut conn)
            .await
            .map_err(map_diesel_error)?;
        Ok(u64::try_from(count).unwrap_or_default())
    }

    async fn all_webhooks(&self) -> Result<Vec<Webhook>, BatchStoreError> {
        let mut conn = self.pool.get().await.map_err(map_pool_error)?;
        let rows: Vec<WebhookRow> = webhooks::table
            .order(webhooks::id.asc())
            .select(WebhookRow::as_select())
            .load(&mut conn)
            .await
            .map_err(map_diesel_error)?;

        Ok(rows
            .into_iter()
            .filter_map(|row| match Webhook::try_from(row) {
                Ok(webhook) => Some(webhook),
                Err(err) => {
                    error!(error = %err, "skipping unreadable webhook");
                    None
                }
            })
            .collect())
    }

    async fn drain(
        &self,
        hash: &WebhookHash,
        sink: &mut dyn RowSink,
    ) -> Result<DrainSummary, BatchStoreError> {
        let now = self.clock.utc();
        let mut conn = self.pool.get().await.map_err(map_pool_error)?;

        conn.transaction(|conn| {
            async move {
                let locked = lock_webhook(conn, hash).await?;
                let rows = load_rows(conn, locked.id).await?;
                let written = write_rows(&rows, sink)?;
                diesel::delete(
                    buffered_rows::table.filter(buffered_rows::webhook_id.eq(locked.id)),
                )
                .execute(conn)
                .await?;
                let updated = diesel::update(webhooks::table.find(locked.id))
                    .set((webhooks::size.eq(0_i64), webhooks::imported_at.eq(now)))
                    .returning(WebhookRow::as_returning())
                    .get_result(conn)
                    .await?;
                Ok(DrainSummary {
                    webhook: to_webhook(updated)?,
                    rows: written.rows,
                    bytes: written.bytes,
                })
            }
            .scope_boxed()
        })
        .await
        .map_err(map_tx_error)
    }

    async fn stage(
        &self,
        hash: &WebhookHash,
        sink: &mut dyn RowSink,
    ) -> Result<StagedBatch, BatchStoreError> {
        let mut conn = self.pool.get().await.map_err(map_pool_error)?;

        conn.transaction(|conn| {
            async move {
                let locked = lock_webhook(conn, hash).await?;
                let rows = load_rows(conn, locked.id).await?;
                let written = write_rows(&rows, sink)?;
                Ok(StagedBatch {
                    webhook: to_webhook(locked)?,
                    rows: written.rows,
                    bytes: written.bytes,
                    last_row_id: written.last_row_id,
                })
            }
            .scope_boxed()
        })
        .await
        .map_err(map_tx_error)
    }

    async fn commit_staged(&self, staged: &StagedBatch) -> Result<Webhook, BatchStoreError> {
        let Some(last_row_id) = staged.last_row_id else {
            return self.get(&staged.webhook.hash).await;
        };
        let staged_bytes = to_i64(staged.bytes, "staged bytes")?;
        let now = self.clock.utc();
        let hash = &staged.webhook.hash;
        let mut conn = self.pool.get().await.map_err(map_pool_error)?;

        conn.transaction(|conn| {
            async move {
                let locked = lock_webhook(conn, hash).await?;
                diesel::delete(
                    buffered_rows::table
                        .filter(buffered_rows::webhook_id.eq(locked.id))
                        .filter(buffered_rows::id.le(last_row_id)),
                )
                .execute(conn)
                .await?;
                let remaining = (locked.size - staged_bytes).max(0);
                let updated = diesel::update(webhooks::table.find(locked.id))
                    .set((webhooks::size.eq(remaining), webhooks::imported_at.eq(now)))
                    .returning(WebhookRow::as_returning())
                    .get_result(conn)
                    .await?;
                to_webhook(updated)
            }
            .scope_boxed()
        })
        .await
        .map_err(map_tx_error)
    }

    async fn update_conditions(
        &self,
        hash: &WebhookHash,
        conditions: Conditions,
    ) -> Result<Webhook, BatchStoreError> {
        let update = ConditionsUpdate::from_domain(&conditions)?;
        let mut conn = self.pool.get().await.map_err(map_pool_error)?;

        conn.transaction(|conn| {
            async move {
                let locked = lock_webhook(conn, hash).await?;
                let updated = diesel::update(webhooks::table.find(locked.id))
                    .set(&update)
                    .returning(WebhookRow::as_returning())
                    .get_result(conn)
                    .await?;
                to_webhook(updated)
            }
            .scope_boxed()
        })
        .await
        .map_err(map_tx_error)
    }
}
