//! Test utilities for the webhook batcher crate.
//!
//! This module provides shared doubles for both unit tests (in `src/`) and
//! integration tests (in `tests/`). It is compiled for tests and when the
//! `test-support` feature is enabled.

use std::sync::{Mutex, MutexGuard, PoisonError};

pub mod exporter;
pub mod runtime;
pub mod storage_api;
pub mod uploads;

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
