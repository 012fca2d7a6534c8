//! Scheduler configuration.

use mason_core::{BuildError, CoreResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::time::Duration;

/// How a dry run decides that a job would run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DryRunPropagation {
    /// A job whose dependency job would have executed is stale, whatever
    /// the freshness comparison says
    #[default]
    Upstream,
    /// Only the freshness comparison decides
    FreshnessOnly,
}

/// Parameters of one run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Maximum number of worker threads
    pub jobs: usize,
    /// Maximum number of serial jobs running at once
    pub serial_jobs: usize,
    /// Load average ceiling, `None` for unbounded
    pub load_average: Option<f64>,
    /// Record failures and continue with unrelated work
    pub keep_going: bool,
    /// Decide staleness but run no body
    pub dry_run: bool,
    /// Targets treated as already satisfied
    pub cut: BTreeSet<String>,
    /// Default content hash switch for file jobs
    pub use_content_hash: bool,
    /// Terminate descendant processes on teardown
    pub terminate_subprocesses: bool,
    /// Where to write the execution log, `None` to disable it
    pub execution_log_dir: Option<PathBuf>,
    /// Where content hash records are kept
    pub resource_hash_dir: PathBuf,
    /// Root of content-addressed targets
    pub auto_prefix: PathBuf,
    pub dry_run_propagation: DryRunPropagation,
    /// Sleep while shedding load before re-polling
    pub load_poll_interval_ms: u64,
    /// How long an idle worker waits for work before exiting
    pub idle_timeout_ms: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            jobs: 1,
            serial_jobs: 1,
            load_average: None,
            keep_going: false,
            dry_run: false,
            cut: BTreeSet::new(),
            use_content_hash: true,
            terminate_subprocesses: true,
            execution_log_dir: None,
            resource_hash_dir: PathBuf::from(".mason/resource_hash"),
            auto_prefix: PathBuf::from(".mason/auto"),
            dry_run_propagation: DryRunPropagation::default(),
            load_poll_interval_ms: 1000,
            idle_timeout_ms: 10,
        }
    }
}

impl SchedulerConfig {
    /// Check the parameters
    ///
    /// # Errors
    ///
    /// Returns `Configuration` on zero workers, zero serial slots or a
    /// non-positive load ceiling
    pub fn validate(&self) -> CoreResult<()> {
        if self.jobs < 1 {
            return Err(BuildError::Configuration {
                reason: "jobs must be at least 1".to_string(),
            });
        }
        if self.serial_jobs < 1 {
            return Err(BuildError::Configuration {
                reason: "serial_jobs must be at least 1".to_string(),
            });
        }
        if let Some(load) = self.load_average {
            if load.is_nan() || load <= 0.0 {
                return Err(BuildError::Configuration {
                    reason: format!("load_average must be positive, got {}", load),
                });
            }
        }
        if self.idle_timeout_ms == 0 {
            return Err(BuildError::Configuration {
                reason: "idle_timeout_ms must be positive".to_string(),
            });
        }
        Ok(())
    }

    pub fn load_poll_interval(&self) -> Duration {
        Duration::from_millis(self.load_poll_interval_ms)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms)
    }

    /// Whether `target` is cut from the graph
    #[must_use]
    pub fn is_cut(&self, target: &str) -> bool {
        self.cut.contains(target)
    }
}
