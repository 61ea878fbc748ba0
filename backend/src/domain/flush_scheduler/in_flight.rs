//! Set of webhook hashes with an export running in this process.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::domain::WebhookHash;

/// Shared in-flight marks. Cloning shares the underlying set.
#[derive(Debug, Clone, Default)]
pub struct InFlightSet {
    hashes: Arc<Mutex<HashSet<WebhookHash>>>,
}

impl InFlightSet {
    /// Empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark `hash` as in flight unless it already is.
    ///
    /// ```
    /// use webhook_batcher::domain::{InFlightSet, WebhookHash};
    ///
    /// let set = InFlightSet::new();
    /// let hash = WebhookHash::new("abc").expect("valid hash");
    /// let guard = set.try_acquire(&hash).expect("first mark");
    /// assert!(set.try_acquire(&hash).is_none());
    /// drop(guard);
    /// assert!(!set.contains(&hash));
    /// ```
    pub fn try_acquire(&self, hash: &WebhookHash) -> Option<InFlightGuard> {
        if !self.lock().insert(hash.clone()) {
            return None;
        }
        Some(InFlightGuard {
            set: self.clone(),
            hash: hash.clone(),
        })
    }

    /// Whether an export for `hash` is running.
    pub fn contains(&self, hash: &WebhookHash) -> bool {
        self.lock().contains(hash)
    }

    /// Number of running exports.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether no export is running.
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, HashSet<WebhookHash>> {
        self.hashes.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Clears its hash from the set when dropped.
#[derive(Debug)]
pub struct InFlightGuard {
    set: InFlightSet,
    hash: WebhookHash,
}

impl InFlightGuard {
    /// Hash held by this guard.
    pub fn hash(&self) -> &WebhookHash {
        &self.hash
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.set.lock().remove(&self.hash);
    }
}
