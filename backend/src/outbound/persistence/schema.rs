//! Diesel table definitions for the PostgreSQL schema.
//!
//! These definitions must match `backend/migrations` exactly. Regenerate with
//! `diesel print-schema` after changing a migration.

diesel::table! {
    /// Registered webhooks and their export accounting.
    webhooks (id) {
        id -> Int8,
        /// Public URL hash, unique.
        hash -> Varchar,
        project_id -> Int8,
        /// Storage API token used for exports.
        token -> Varchar,
        /// Destination table, `<stage>.<bucket>.<table>`.
        table_id -> Varchar,
        /// Bytes buffered since the last export.
        size -> Int8,
        /// Time of the last successful export.
        imported_at -> Timestamptz,
        condition_count -> Nullable<Int4>,
        condition_time_ms -> Nullable<Int8>,
        condition_size -> Nullable<Int8>,
    }
}

diesel::table! {
    /// Payloads waiting for export, ordered by `(time, id)`.
    buffered_rows (id) {
        id -> Int8,
        webhook_id -> Int8,
        time -> Timestamptz,
        headers -> Text,
        body -> Text,
    }
}

diesel::joinable!(buffered_rows -> webhooks (webhook_id));

diesel::allow_tables_to_appear_in_same_query!(buffered_rows, webhooks);
