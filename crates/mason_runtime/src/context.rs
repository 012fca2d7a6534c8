//! State shared by the control flow and the worker threads of one run.

use crate::cache::FreshnessCache;
use crate::config::SchedulerConfig;
use crate::resolver::ResolverSet;
use mason_core::{DeferredError, Uri, UriMeta};
use mason_log::ExecutionLog;
use mason_plan::Registry;
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicBool, Ordering};
use tokio_util::sync::CancellationToken;

/// Everything a run needs, passed explicitly instead of living in globals
#[derive(Debug)]
pub struct SchedulerContext {
    /// Written only by the control flow
    pub registry: RwLock<Registry>,
    pub config: SchedulerConfig,
    pub resolvers: ResolverSet,
    pub cache: FreshnessCache,
    pub log: ExecutionLog,
    aborted: AtomicBool,
    deferred: Mutex<Vec<DeferredError>>,
    cancel: CancellationToken,
}

impl SchedulerContext {
    #[must_use]
    pub fn new(config: SchedulerConfig, resolvers: ResolverSet, log: ExecutionLog) -> Self {
        Self {
            registry: RwLock::new(Registry::new()),
            config,
            resolvers,
            cache: FreshnessCache::new(),
            log,
            aborted: AtomicBool::new(false),
            deferred: Mutex::new(Vec::new()),
            cancel: CancellationToken::new(),
        }
    }

    /// Merged metadata of `uri`, default if never declared
    #[must_use]
    pub fn meta_of(&self, uri: &Uri) -> UriMeta {
        self.registry.read().meta(uri).cloned().unwrap_or_default()
    }

    /// Whether an earlier failure or an interrupt tore the run down
    pub fn is_aborted(&self) -> bool {
        self.aborted.load(Ordering::Acquire)
    }

    /// Set the abort flag, returns `false` if it was already set
    pub fn abort(&self) -> bool {
        !self.aborted.swap(true, Ordering::AcqRel)
    }

    pub fn push_deferred(&self, error: DeferredError) {
        self.deferred.lock().push(error);
    }

    /// Deferred errors recorded so far, in completion order
    pub fn deferred(&self) -> Vec<DeferredError> {
        self.deferred.lock().clone()
    }

    pub fn take_deferred(&self) -> Vec<DeferredError> {
        std::mem::take(&mut *self.deferred.lock())
    }

    /// Fires when the run is interrupted from outside
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }
}
