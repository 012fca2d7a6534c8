//! Job model.
//!
//! A job is immutable once declared. Its lifecycle lives in [`JobState`],
//! written by the control flow and read from worker threads.

use crate::signal::DoneSignal;
use mason_core::{JobId, Uri};
use mason_log::JobSnapshot;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Priority of jobs that do not set one
pub const PRIORITY_DEFAULT: i32 = 0;

/// User work function
pub type JobBody = Arc<dyn Fn(&Job) -> anyhow::Result<()> + Send + Sync>;

/// Job variant
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobKind {
    /// Named action with exactly one target, never backed by a resource
    Phony,
    /// Produces resources whose freshness can be resolved
    File {
        /// Hash dependency contents; `None` defers to the run configuration
        use_content_hash: Option<bool>,
        /// Prefix prepended to the targets of a content-addressed job
        auto_prefix: Option<String>,
    },
}

impl JobKind {
    #[must_use]
    pub const fn is_phony(&self) -> bool {
        matches!(self, Self::Phony)
    }

    /// Content hash switch, `None` for phony jobs and unset file jobs
    #[must_use]
    pub const fn use_content_hash(&self) -> Option<bool> {
        match self {
            Self::Phony => None,
            Self::File {
                use_content_hash, ..
            } => *use_content_hash,
        }
    }
}

/// Lifecycle flags of a job
#[derive(Debug, Default)]
pub struct JobState {
    invoked: AtomicBool,
    executed: AtomicBool,
    succeeded: AtomicBool,
    done: DoneSignal,
}

impl JobState {
    /// Mark the job invoked, returns `false` if it already was
    pub fn mark_invoked(&self) -> bool {
        !self.invoked.swap(true, Ordering::AcqRel)
    }

    pub fn invoked(&self) -> bool {
        self.invoked.load(Ordering::Acquire)
    }

    /// Whether the body ran (or would have run in a dry run)
    pub fn executed(&self) -> bool {
        self.executed.load(Ordering::Acquire)
    }

    pub fn succeeded(&self) -> bool {
        self.succeeded.load(Ordering::Acquire)
    }

    pub fn is_done(&self) -> bool {
        self.done.is_set()
    }

    pub fn done(&self) -> &DoneSignal {
        &self.done
    }

    /// Record the terminal state and fire the done signal
    ///
    /// Returns `false`, leaving the flags untouched, if the job was already done.
    pub fn finish(&self, executed: bool, succeeded: bool) -> bool {
        if self.done.is_set() {
            return false;
        }
        self.executed.store(executed, Ordering::Release);
        self.succeeded.store(succeeded, Ordering::Release);
        self.done.set()
    }
}

/// A declared job
pub struct Job {
    pub(crate) id: JobId,
    pub(crate) kind: JobKind,
    pub(crate) targets: Vec<Uri>,
    pub(crate) dependencies: Vec<Uri>,
    pub(crate) priority: i32,
    pub(crate) serial: bool,
    pub(crate) key: Option<String>,
    pub(crate) desc: Option<String>,
    pub(crate) data: Option<serde_json::Value>,
    pub(crate) body: Option<JobBody>,
    pub(crate) state: JobState,
}

impl Job {
    #[must_use]
    pub fn id(&self) -> JobId {
        self.id
    }

    #[must_use]
    pub fn kind(&self) -> &JobKind {
        &self.kind
    }

    /// Sorted, unique targets
    #[must_use]
    pub fn targets(&self) -> &[Uri] {
        &self.targets
    }

    /// Sorted, unique dependencies
    #[must_use]
    pub fn dependencies(&self) -> &[Uri] {
        &self.dependencies
    }

    #[must_use]
    pub fn priority(&self) -> i32 {
        self.priority
    }

    /// Whether the job competes for a serial slot
    #[must_use]
    pub fn serial(&self) -> bool {
        self.serial
    }

    #[must_use]
    pub fn key(&self) -> Option<&str> {
        self.key.as_deref()
    }

    #[must_use]
    pub fn desc(&self) -> Option<&str> {
        self.desc.as_deref()
    }

    /// User data attached at declaration
    #[must_use]
    pub fn data(&self) -> Option<&serde_json::Value> {
        self.data.as_ref()
    }

    #[must_use]
    pub fn state(&self) -> &JobState {
        &self.state
    }

    /// Run the body; a job without a body succeeds trivially
    ///
    /// # Errors
    ///
    /// Returns whatever the body returns
    pub fn call_body(&self) -> anyhow::Result<()> {
        match &self.body {
            Some(body) => body(self),
            None => Ok(()),
        }
    }

    /// Targets as strings, for reports
    #[must_use]
    pub fn target_names(&self) -> Vec<String> {
        self.targets.iter().map(ToString::to_string).collect()
    }

    /// Fields recorded in the execution log
    #[must_use]
    pub fn snapshot(&self) -> JobSnapshot {
        JobSnapshot {
            targets: self.target_names(),
            dependencies: self.dependencies.iter().map(ToString::to_string).collect(),
            priority: self.priority,
            serial: self.serial,
            succeeded: self.state.is_done().then(|| self.state.succeeded()),
            key: self.key.clone(),
            desc: self.desc.clone(),
        }
    }

    /// Text listing: one target per line, then tab-indented dependencies
    #[must_use]
    pub fn render(&self) -> String {
        let mut out = String::new();
        for t in &self.targets {
            out.push_str(t.as_str());
            out.push('\n');
        }
        for d in &self.dependencies {
            out.push('\t');
            out.push_str(d.as_str());
            out.push('\n');
        }
        out
    }
}

impl fmt::Debug for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Job")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("targets", &self.targets)
            .field("dependencies", &self.dependencies)
            .field("priority", &self.priority)
            .field("serial", &self.serial)
            .finish_non_exhaustive()
    }
}

impl fmt::Display for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let targets: Vec<&str> = self.targets.iter().map(Uri::as_str).collect();
        write!(f, "{}", targets.join(", "))
    }
}
