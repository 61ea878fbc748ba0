//! Batch store adapters.
//!
//! [`DieselBatchStore`] persists webhooks and buffered rows in PostgreSQL via
//! `diesel-async` and a `bb8` pool. [`MemoryBatchStore`] keeps the same
//! contract in process memory for tests and local runs.
//!
//! Diesel row structs (`models.rs`) and table definitions (`schema.rs`) stay
//! private to this module; only domain types cross the port.
//!
//! # Example
//!
//! ```ignore
//! use webhook_batcher::outbound::persistence::{DbPool, DieselBatchStore, PoolConfig};
//!
//! let pool = DbPool::connect(PoolConfig::new("postgres://localhost/webhooks")).await?;
//! let store = DieselBatchStore::new(pool, clock);
//! ```

mod diesel_batch_store;
mod memory_batch_store;
mod models;
mod pool;
mod schema;

pub use diesel_batch_store::DieselBatchStore;
pub use memory_batch_store::MemoryBatchStore;
pub use pool::{DbPool, PoolConfig, PoolError};
