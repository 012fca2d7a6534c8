//! JSON build manifests.
//!
//! ```json
//! {"jobs": [{"targets": ["out.o"], "deps": ["in.c"], "command": "cc -c in.c -o out.o"}]}
//! ```

use mason_plan::{Job, JobSpec, UriSpec};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::process::Command;
use thiserror::Error;

/// Manifest loading errors
#[derive(Debug, Error)]
pub enum ManifestError {
    /// The manifest could not be read
    #[error("cannot read manifest {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The manifest is not valid JSON of the expected shape
    #[error("malformed manifest: {0}")]
    Parse(#[from] serde_json::Error),

    /// A job entry is inconsistent
    #[error("job #{index} ({targets}): {reason}")]
    Invalid {
        index: usize,
        targets: String,
        reason: String,
    },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    #[default]
    File,
    Phony,
}

/// One declared job
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct JobEntry {
    pub kind: EntryKind,
    pub targets: Vec<String>,
    #[serde(alias = "dependencies")]
    pub deps: Vec<String>,
    /// Shell command run through `sh -c`
    pub command: Option<String>,
    pub priority: i32,
    pub serial: bool,
    pub desc: Option<String>,
    pub key: Option<String>,
    pub use_hash: Option<bool>,
    /// Targets never removed after a failure
    pub keep: Vec<String>,
    /// Dependencies whose freshness is ignored
    pub check_existence_only: Vec<String>,
    /// Place the targets under a content-addressed directory
    pub auto: bool,
    pub data: Option<serde_json::Value>,
}

/// Parsed manifest
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Manifest {
    pub jobs: Vec<JobEntry>,
}

impl Manifest {
    /// Read and parse a manifest file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ManifestError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ManifestError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&text)
    }

    pub fn parse(text: &str) -> Result<Self, ManifestError> {
        Ok(serde_json::from_str(text)?)
    }

    /// Turn every entry into a job declaration
    pub fn into_specs(self, auto_prefix: &Path) -> Result<Vec<JobSpec>, ManifestError> {
        self.jobs
            .into_iter()
            .enumerate()
            .map(|(index, entry)| entry.into_spec(index, auto_prefix))
            .collect()
    }
}

impl JobEntry {
    fn invalid(&self, index: usize, reason: impl Into<String>) -> ManifestError {
        ManifestError::Invalid {
            index,
            targets: self.targets.join(", "),
            reason: reason.into(),
        }
    }

    fn into_spec(self, index: usize, auto_prefix: &Path) -> Result<JobSpec, ManifestError> {
        if self.targets.is_empty() {
            return Err(self.invalid(index, "no targets"));
        }
        if let Some(k) = self.keep.iter().find(|k| !self.targets.contains(k)) {
            return Err(self.invalid(index, format!("keep names {k}, which is not a target")));
        }
        if let Some(d) = self.check_existence_only.iter().find(|d| !self.deps.contains(d)) {
            return Err(self.invalid(index, format!("check_existence_only names {d}, which is not a dependency")));
        }

        let targets: Vec<UriSpec> = self
            .targets
            .iter()
            .map(|t| {
                let spec = UriSpec::from(t.as_str());
                if self.keep.contains(t) { spec.keep() } else { spec }
            })
            .collect();
        let deps: Vec<UriSpec> = self
            .deps
            .iter()
            .map(|d| {
                let spec = UriSpec::from(d.as_str());
                if self.check_existence_only.contains(d) {
                    spec.check_existence_only()
                } else {
                    spec
                }
            })
            .collect();

        let mut spec = match self.kind {
            EntryKind::File => JobSpec::file(targets, deps),
            EntryKind::Phony => {
                let mut targets = targets.into_iter();
                let (Some(target), None) = (targets.next(), targets.next()) else {
                    return Err(self.invalid(index, "a phony job has exactly one target"));
                };
                if self.auto || self.use_hash.is_some() {
                    return Err(self.invalid(index, "auto and use_hash apply to file jobs only"));
                }
                JobSpec::phony(target, deps)
            }
        };

        spec = spec.priority(self.priority).serial(self.serial);
        if let Some(key) = self.key {
            spec = spec.key(key);
        }
        if let Some(desc) = self.desc {
            spec = spec.desc(desc);
        }
        if let Some(data) = self.data {
            spec = spec.data(data);
        }
        if let Some(use_hash) = self.use_hash {
            spec = spec.use_content_hash(use_hash);
        }
        if self.auto {
            spec = spec.auto(auto_prefix.to_string_lossy());
        }
        if let Some(command) = self.command {
            spec = spec.body(move |job: &Job| run_command(&command, job));
        }
        Ok(spec)
    }
}

/// Run `command` through `sh -c` with the job's targets and dependencies in
/// `MASON_TARGETS` and `MASON_DEPS` (space separated)
pub fn run_command(command: &str, job: &Job) -> anyhow::Result<()> {
    let join = |uris: &[mason_core::Uri]| {
        uris.iter()
            .map(mason_core::Uri::as_str)
            .collect::<Vec<_>>()
            .join(" ")
    };
    tracing::info!(job = %job, command, "running");
    let status = Command::new("sh")
        .arg("-c")
        .arg(command)
        .env("MASON_TARGETS", join(job.targets()))
        .env("MASON_DEPS", join(job.dependencies()))
        .status()?;
    if !status.success() {
        anyhow::bail!("`{}` exited with {}", command, status);
    }
    Ok(())
}
