//! Internal Diesel row structs for database operations.
//!
//! These types are implementation details of the persistence layer and must
//! never be exposed to the domain. Conversions into domain types validate the
//! stored values and report violations as `Corrupted`.

use std::time::Duration;

use chrono::{DateTime, Utc};
use diesel::prelude::*;

use super::schema::{buffered_rows, webhooks};
use crate::domain::ports::BatchStoreError;
use crate::domain::{BufferedRow, Conditions, Credential, TableId, Webhook, WebhookHash};

/// Row struct for reading from the webhooks table.
#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = webhooks)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub(crate) struct WebhookRow {
    pub id: i64,
    pub hash: String,
    pub project_id: i64,
    pub token: String,
    pub table_id: String,
    pub size: i64,
    pub imported_at: DateTime<Utc>,
    pub condition_count: Option<i32>,
    pub condition_time_ms: Option<i64>,
    pub condition_size: Option<i64>,
}

/// Insertable struct for registering a webhook.
#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = webhooks)]
pub(crate) struct NewWebhookRow<'a> {
    pub hash: &'a str,
    pub project_id: i64,
    pub token: &'a str,
    pub table_id: &'a str,
    pub size: i64,
    pub imported_at: DateTime<Utc>,
    pub condition_count: Option<i32>,
    pub condition_time_ms: Option<i64>,
    pub condition_size: Option<i64>,
}

/// Changeset replacing a webhook's flush policy. `None` clears a column.
#[derive(Debug, Clone, AsChangeset)]
#[diesel(table_name = webhooks)]
#[diesel(treat_none_as_null = true)]
pub(crate) struct ConditionsUpdate {
    pub condition_count: Option<i32>,
    pub condition_time_ms: Option<i64>,
    pub condition_size: Option<i64>,
}

impl ConditionsUpdate {
    pub(crate) fn from_domain(conditions: &Conditions) -> Result<Self, BatchStoreError> {
        Ok(Self {
            condition_count: conditions
                .count()
                .map(|count| to_i32(u64::from(count), "condition count"))
                .transpose()?,
            condition_time_ms: conditions
                .time()
                .map(|time| {
                    let millis = u64::try_from(time.as_millis()).unwrap_or(u64::MAX);
                    to_i64(millis, "condition time")
                })
                .transpose()?,
            condition_size: conditions
                .size()
                .map(|size| to_i64(size, "condition size"))
                .transpose()?,
        })
    }
}

/// Row struct for reading buffered payloads.
#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = buffered_rows)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub(crate) struct BufferedRowRecord {
    pub id: i64,
    pub time: DateTime<Utc>,
    pub headers: String,
    pub body: String,
}

/// Insertable struct for buffering a payload.
#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = buffered_rows)]
pub(crate) struct NewBufferedRow<'a> {
    pub webhook_id: i64,
    pub time: DateTime<Utc>,
    pub headers: &'a str,
    pub body: &'a str,
}

impl From<BufferedRowRecord> for BufferedRow {
    fn from(record: BufferedRowRecord) -> Self {
        Self {
            id: record.id,
            time: record.time,
            headers: record.headers,
            body: record.body,
        }
    }
}

impl TryFrom<WebhookRow> for Webhook {
    type Error = BatchStoreError;

    fn try_from(row: WebhookRow) -> Result<Self, Self::Error> {
        let corrupted = |field: &str, detail: String| {
            BatchStoreError::corrupted(format!("webhook {}: {field}: {detail}", row.id))
        };
        let hash = WebhookHash::new(row.hash.clone())
            .map_err(|error| corrupted("hash", error.to_string()))?;
        let credential = Credential::new(row.token.clone())
            .map_err(|error| corrupted("token", error.to_string()))?;
        let table_id: TableId = row
            .table_id
            .parse()
            .map_err(|error: crate::domain::WebhookValidationError| {
                corrupted("table_id", error.to_string())
            })?;
        let size_bytes =
            u64::try_from(row.size).map_err(|_| corrupted("size", row.size.to_string()))?;
        let count = row
            .condition_count
            .map(|count| {
                u32::try_from(count).map_err(|_| corrupted("condition_count", count.to_string()))
            })
            .transpose()?;
        let time = row
            .condition_time_ms
            .map(|ms| {
                u64::try_from(ms)
                    .map(Duration::from_millis)
                    .map_err(|_| corrupted("condition_time_ms", ms.to_string()))
            })
            .transpose()?;
        let size = row
            .condition_size
            .map(|size| {
                u64::try_from(size).map_err(|_| corrupted("condition_size", size.to_string()))
            })
            .transpose()?;
        let conditions = Conditions::from_parts(count, time, size)
            .map_err(|error| corrupted("conditions", error.to_string()))?;

        Ok(Self {
            id: row.id,
            hash,
            project_id: row.project_id,
            credential,
            table_id,
            size_bytes,
            imported_at: row.imported_at,
            conditions,
        })
    }
}

pub(crate) fn to_i64(value: u64, field: &str) -> Result<i64, BatchStoreError> {
    i64::try_from(value).map_err(|_| BatchStoreError::query(format!("{field} overflows bigint")))
}

fn to_i32(value: u64, field: &str) -> Result<i32, BatchStoreError> {
    i32::try_from(value).map_err(|_| BatchStoreError::query(format!("{field} overflows integer")))
}
