//! Record types of the execution log.

use chrono::{DateTime, Utc};
use mason_core::RunId;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle phase a record describes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    /// Job declared in the registry
    Defined,
    /// Graph walk reached the job
    Invoked,
    /// Work item handed to the pool
    Enqueued,
    /// Body ran (or was rendered in a dry run)
    Executed,
    /// Terminal state reached
    Done,
}

impl Phase {
    /// Every phase in lifecycle order
    pub const ALL: [Phase; 5] = [
        Self::Defined,
        Self::Invoked,
        Self::Enqueued,
        Self::Executed,
        Self::Done,
    ];

    /// Wire name of the phase
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Defined => "defined",
            Self::Invoked => "invoked",
            Self::Enqueued => "enqueued",
            Self::Executed => "executed",
            Self::Done => "done",
        }
    }

    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Done)
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Job fields captured at the time of a transition
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobSnapshot {
    pub targets: Vec<String>,
    pub dependencies: Vec<String>,
    pub priority: i32,
    pub serial: bool,
    /// Only known once the job is executed or done
    pub succeeded: Option<bool>,
    pub key: Option<String>,
    pub desc: Option<String>,
}

/// One line of `events.jsonl`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogRecord {
    /// Monotonically increasing, starting at 1
    pub seq: u64,
    pub timestamp: DateTime<Utc>,
    pub phase: Phase,
    #[serde(flatten)]
    pub job: JobSnapshot,
}

impl LogRecord {
    /// Stamp a snapshot
    #[must_use]
    pub fn new(seq: u64, timestamp: DateTime<Utc>, phase: Phase, job: JobSnapshot) -> Self {
        Self {
            seq,
            timestamp,
            phase,
            job,
        }
    }
}

/// Contents of `meta.json`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunMeta {
    pub run_id: RunId,
    pub started_at: DateTime<Utc>,
    /// Command line of the run
    pub args: Vec<String>,
    /// Version of the tool that wrote the log
    pub version: String,
}

impl RunMeta {
    #[must_use]
    pub fn new(run_id: RunId, args: Vec<String>) -> Self {
        Self {
            run_id,
            started_at: Utc::now(),
            args,
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}
