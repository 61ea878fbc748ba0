//! Storage API outbound adapters.
//!
//! This module provides a thin HTTP implementation of the `StorageApi` port.

mod dto;
mod http_client;

pub use http_client::StorageApiHttpClient;
