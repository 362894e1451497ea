//! Shared cache of resolved versions.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Resolved versions keyed by the raw input string.
#[derive(Debug, Default)]
pub struct CacheEntries {
    pub(crate) kubernetes: HashMap<String, String>,
    pub(crate) operator: HashMap<String, String>,
}

/// Version cache guarded by a single mutex.
///
/// The resolver holds the lock across lookup, network fetch and insert, so
/// two concurrent callers asking for the same channel cause one request.
/// Create one per process (or per test) and share it through an `Arc`.
#[derive(Debug, Default)]
pub struct VersionCache {
    inner: Mutex<CacheEntries>,
}

impl VersionCache {
    /// Create an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, CacheEntries> {
        // A panic while holding the lock cannot leave a half-written entry
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Cached Kubernetes version for `input`, if any.
    pub fn kubernetes(&self, input: &str) -> Option<String> {
        self.lock().kubernetes.get(input).cloned()
    }

    /// Cached operator version for `input`, if any.
    pub fn operator(&self, input: &str) -> Option<String> {
        self.lock().operator.get(input).cloned()
    }

    /// Number of cached entries across both maps.
    pub fn len(&self) -> usize {
        let entries = self.lock();
        entries.kubernetes.len() + entries.operator.len()
    }

    /// Whether nothing has been cached yet.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
