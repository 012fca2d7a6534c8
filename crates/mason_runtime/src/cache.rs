//! Per-run freshness memoization.
//!
//! Concurrent lookups of the same dependency wait for the first one
//! instead of probing the resource again. Failures are not cached.

use dashmap::DashMap;
use mason_core::{Freshness, ResolverError, Uri};
use once_cell::sync::OnceCell;
use std::sync::Arc;

/// Freshness values observed during one run
#[derive(Debug, Default)]
pub struct FreshnessCache {
    cells: DashMap<Uri, Arc<OnceCell<Freshness>>>,
}

impl FreshnessCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached freshness of `uri`, computing it with `compute` on first use
    ///
    /// # Errors
    ///
    /// Returns the error of `compute`; the next caller computes again
    pub fn get_or_try_insert<F>(&self, uri: &Uri, compute: F) -> Result<Freshness, ResolverError>
    where
        F: FnOnce() -> Result<Freshness, ResolverError>,
    {
        // The shard lock is released before computing.
        let cell = Arc::clone(self.cells.entry(uri.clone()).or_default().value());
        cell.get_or_try_init(compute).copied()
    }

    #[must_use]
    pub fn get(&self, uri: &str) -> Option<Freshness> {
        self.cells.get(uri).and_then(|cell| cell.value().get().copied())
    }

    /// Forget every value
    pub fn clear(&self) {
        self.cells.clear();
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.cells.iter().filter(|cell| cell.value().get().is_some()).count()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
