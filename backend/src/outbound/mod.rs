//! Outbound adapters implementing domain ports for external infrastructure.
//!
//! - **persistence**: PostgreSQL batch store using Diesel, plus an in-memory
//!   store with the same contract
//! - **staging**: CSV temporary files written from drained batches
//! - **storage_api**: reqwest client for the downstream Storage API
//! - **upload**: reqwest uploader for prepared file resources
//!
//! Adapters are thin translators that convert between domain types and
//! infrastructure-specific representations. They contain no business logic.

pub mod persistence;
pub mod staging;
pub mod storage_api;
pub mod upload;
