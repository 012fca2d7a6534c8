//! Worker pool.
//!
//! OS threads drain two priority queues: one for parallel work and one for
//! serial work, gated by a count of serial slots. Threads start lazily,
//! subject to load-average admission, and exit after idling. Completion is
//! reported through a oneshot channel per item; a worker never touches the
//! job registry.

use crate::config::SchedulerConfig;
use crate::load::LoadProbe;
use mason_core::BuildError;
use parking_lot::{Condvar, Mutex};
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;

/// Result of one work item
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outcome {
    /// The body ran (or was rendered in a dry run)
    pub executed: bool,
    pub result: Result<(), BuildError>,
    /// Dry-run listing of the job
    pub rendered: Option<String>,
}

impl Outcome {
    /// Nothing to do, the job was already fresh
    #[must_use]
    pub fn fresh() -> Self {
        Self {
            executed: false,
            result: Ok(()),
            rendered: None,
        }
    }

    #[must_use]
    pub fn ran(rendered: Option<String>) -> Self {
        Self {
            executed: true,
            result: Ok(()),
            rendered,
        }
    }

    #[must_use]
    pub fn failed(error: BuildError) -> Self {
        Self {
            executed: false,
            result: Err(error),
            rendered: None,
        }
    }

    #[must_use]
    pub fn succeeded(&self) -> bool {
        self.result.is_ok()
    }
}

type Work = Box<dyn FnOnce() -> Outcome + Send + 'static>;

/// One job handed to the pool
pub struct WorkItem {
    targets: Vec<String>,
    priority: i32,
    serial: bool,
    seq: u64,
    work: Work,
    done: oneshot::Sender<Outcome>,
}

impl WorkItem {
    /// Wrap `work`; the receiver resolves once it has run
    pub fn new<F>(
        targets: Vec<String>,
        priority: i32,
        serial: bool,
        work: F,
    ) -> (Self, oneshot::Receiver<Outcome>)
    where
        F: FnOnce() -> Outcome + Send + 'static,
    {
        let (done, rx) = oneshot::channel();
        let item = Self {
            targets,
            priority,
            serial,
            seq: 0,
            work: Box::new(work),
            done,
        };
        (item, rx)
    }

    #[must_use]
    pub fn priority(&self) -> i32 {
        self.priority
    }

    #[must_use]
    pub fn serial(&self) -> bool {
        self.serial
    }

    fn run(self) -> bool {
        let Self {
            targets,
            serial,
            work,
            done,
            ..
        } = self;
        let outcome = catch_unwind(AssertUnwindSafe(work)).unwrap_or_else(|panic| {
            let message = panic_message(panic.as_ref());
            tracing::error!(targets = ?targets, %message, "work item panicked");
            Outcome::failed(BuildError::JobExecution {
                targets,
                message: format!("panicked: {}", message),
            })
        });
        // The receiver is gone once the run was torn down.
        let _ = done.send(outcome);
        serial
    }
}

impl std::fmt::Debug for WorkItem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkItem")
            .field("targets", &self.targets)
            .field("priority", &self.priority)
            .field("serial", &self.serial)
            .field("seq", &self.seq)
            .finish_non_exhaustive()
    }
}

// Serial before parallel, then higher priority, then submission order.
impl Ord for WorkItem {
    fn cmp(&self, other: &Self) -> Ordering {
        self.serial
            .cmp(&other.serial)
            .then(self.priority.cmp(&other.priority))
            .then(other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for WorkItem {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for WorkItem {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for WorkItem {}

pub(crate) fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Limits of a worker pool
#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub max_threads: usize,
    pub max_serial: usize,
    /// No new thread starts and no item is dispatched next to running work
    /// while the load average is above this
    pub load_ceiling: Option<f64>,
    pub load_poll_interval: Duration,
    pub idle_timeout: Duration,
}

impl From<&SchedulerConfig> for PoolConfig {
    fn from(config: &SchedulerConfig) -> Self {
        Self {
            max_threads: config.jobs.max(1),
            max_serial: config.serial_jobs.max(1),
            load_ceiling: config.load_average,
            load_poll_interval: config.load_poll_interval(),
            idle_timeout: config.idle_timeout(),
        }
    }
}

#[derive(Default)]
struct State {
    parallel: BinaryHeap<WorkItem>,
    serial: BinaryHeap<WorkItem>,
    threads: usize,
    idle: usize,
    /// Items taken off a queue and not yet finished
    running: usize,
    /// Items past load shedding and inside their body
    executing: usize,
    serial_running: usize,
    next_seq: u64,
    next_thread: usize,
    closed: bool,
}

impl State {
    fn take_next(&mut self, max_serial: usize) -> Option<WorkItem> {
        let item = if self.serial_running < max_serial && !self.serial.is_empty() {
            self.serial_running += 1;
            self.serial.pop()
        } else {
            self.parallel.pop()
        }?;
        self.running += 1;
        Some(item)
    }
}

struct Shared {
    state: Mutex<State>,
    cond: Condvar,
    config: PoolConfig,
    load: Arc<dyn LoadProbe>,
}

impl Shared {
    fn load_exceeded(&self) -> bool {
        self.config
            .load_ceiling
            .is_some_and(|ceiling| self.load.load_average() > ceiling)
    }
}

/// Bounded pool of worker threads
#[derive(Clone)]
pub struct WorkerPool {
    shared: Arc<Shared>,
}

impl WorkerPool {
    #[must_use]
    pub fn new(config: PoolConfig, load: Arc<dyn LoadProbe>) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(State::default()),
                cond: Condvar::new(),
                config,
                load,
            }),
        }
    }

    /// Queue an item, starting a worker thread if admission allows
    ///
    /// # Errors
    ///
    /// Returns `Aborted` after shutdown and `Internal` if no worker thread
    /// can be started at all
    pub fn submit(&self, mut item: WorkItem) -> Result<(), BuildError> {
        let load_exceeded = self.shared.load_exceeded();
        let spawn = {
            let mut state = self.shared.state.lock();
            if state.closed {
                return Err(BuildError::Aborted);
            }
            item.seq = state.next_seq;
            state.next_seq += 1;
            tracing::debug!(targets = ?item.targets, priority = item.priority, serial = item.serial, "submit");
            if item.serial {
                state.serial.push(item);
            } else {
                state.parallel.push(item);
            }

            // A notified worker stays counted as idle until it wakes, so
            // compare against the queue rather than against zero.
            let queued = state.parallel.len() + state.serial.len();
            let spawn = state.idle < queued
                && (state.threads < 1
                    || (state.threads < self.shared.config.max_threads && !load_exceeded));
            if spawn {
                state.threads += 1;
                state.next_thread += 1;
                Some(state.next_thread)
            } else {
                None
            }
        };
        self.shared.cond.notify_one();

        if let Some(n) = spawn {
            let shared = Arc::clone(&self.shared);
            let started = std::thread::Builder::new()
                .name(format!("mason-worker-{}", n))
                .spawn(move || worker_loop(&shared));
            if let Err(e) = started {
                let mut state = self.shared.state.lock();
                state.threads -= 1;
                tracing::warn!(error = %e, "failed to start worker thread");
                if state.threads == 0 {
                    return Err(BuildError::Internal {
                        message: format!("cannot start worker thread: {}", e),
                    });
                }
            }
        }
        Ok(())
    }

    /// Stop accepting work and drop queued items
    ///
    /// Running items finish; their workers exit afterwards.
    pub fn shutdown(&self) {
        let dropped = {
            let mut state = self.shared.state.lock();
            state.closed = true;
            let dropped = state.parallel.len() + state.serial.len();
            state.parallel.clear();
            state.serial.clear();
            dropped
        };
        self.shared.cond.notify_all();
        tracing::debug!(dropped, "worker pool shut down");
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.shared.state.lock().closed
    }

    /// Live worker threads
    #[must_use]
    pub fn threads(&self) -> usize {
        self.shared.state.lock().threads
    }

    /// Queued items
    #[must_use]
    pub fn pending(&self) -> usize {
        let state = self.shared.state.lock();
        state.parallel.len() + state.serial.len()
    }
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.shared.state.lock();
        f.debug_struct("WorkerPool")
            .field("threads", &state.threads)
            .field("running", &state.running)
            .field("pending", &(state.parallel.len() + state.serial.len()))
            .field("closed", &state.closed)
            .finish()
    }
}

fn worker_loop(shared: &Shared) {
    let max_serial = shared.config.max_serial;
    loop {
        let item = {
            let mut state = shared.state.lock();
            let next = loop {
                if let Some(item) = state.take_next(max_serial) {
                    break Some(item);
                }
                if state.closed {
                    break None;
                }
                state.idle += 1;
                let waited = shared.cond.wait_for(&mut state, shared.config.idle_timeout);
                state.idle -= 1;
                if waited.timed_out() {
                    break state.take_next(max_serial);
                }
            };
            // Exit is decided under the same lock a submitter checks.
            if next.is_none() {
                state.threads -= 1;
            }
            next
        };
        let Some(item) = item else {
            tracing::debug!("worker idle, exiting");
            return;
        };

        shed_load(shared);
        shared.state.lock().executing += 1;

        let serial = item.run();

        {
            let mut state = shared.state.lock();
            state.executing -= 1;
            state.running -= 1;
            if serial {
                state.serial_running -= 1;
            }
        }
        shared.cond.notify_all();
    }
}

fn shed_load(shared: &Shared) {
    if shared.config.load_ceiling.is_none() {
        return;
    }
    loop {
        {
            let state = shared.state.lock();
            if state.closed || state.executing == 0 {
                return;
            }
        }
        if !shared.load_exceeded() {
            return;
        }
        tracing::debug!(
            load = shared.load.load_average(),
            "load above ceiling, delaying dispatch"
        );
        std::thread::sleep(shared.config.load_poll_interval);
    }
}
