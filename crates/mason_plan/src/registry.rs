//! Job registry.
//!
//! Every target maps to exactly one job. The registry is written only by
//! the control flow; worker threads read jobs through `Arc<Job>`.

use crate::auto::auto_targets;
use crate::declare::{JobSpec, UriSpec};
use crate::job::{Job, JobKind, JobState};
use indexmap::IndexMap;
use mason_core::{BuildError, CoreResult, JobId, Uri, UriMeta};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

/// Owner of every declared job
#[derive(Default)]
pub struct Registry {
    jobs: Vec<Arc<Job>>,
    job_of_target: IndexMap<Uri, JobId>,
    jobs_of_key: IndexMap<String, Vec<JobId>>,
    metadata: HashMap<Uri, UriMeta>,
}

impl Registry {
    /// Create an empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a job
    ///
    /// # Errors
    ///
    /// Returns error if a target is already declared, the job has no
    /// target, or a phony job has more than one target
    pub fn declare(&mut self, spec: JobSpec) -> CoreResult<JobId> {
        let JobSpec {
            kind,
            targets,
            dependencies,
            priority,
            serial,
            key,
            desc,
            data,
            body,
        } = spec;

        let dependencies = unique(dependencies);
        let dependency_uris: Vec<Uri> = dependencies.keys().cloned().collect();

        let targets = match &kind {
            JobKind::File {
                auto_prefix: Some(prefix),
                ..
            } => auto_targets(prefix, data.as_ref(), &dependency_uris, targets),
            _ => targets,
        };
        let targets = unique(targets);

        if targets.is_empty() {
            return Err(BuildError::InvalidJob {
                reason: "a job needs at least one target".to_string(),
            });
        }
        if targets.keys().chain(dependencies.keys()).any(|u| u.as_str().is_empty()) {
            return Err(BuildError::InvalidJob {
                reason: "empty target or dependency name".to_string(),
            });
        }
        if kind.is_phony() && targets.len() != 1 {
            return Err(BuildError::InvalidJob {
                reason: format!(
                    "a phony job has exactly one target, got {}",
                    targets.keys().map(Uri::as_str).collect::<Vec<_>>().join(", ")
                ),
            });
        }
        if let Some(t) = targets.keys().find(|t| self.job_of_target.contains_key(*t)) {
            return Err(BuildError::DuplicateTarget {
                target: t.to_string(),
            });
        }

        for (uri, meta) in targets.iter().chain(dependencies.iter()) {
            self.merge_meta(uri, meta);
        }

        let id = JobId::from_index(self.jobs.len());
        let job = Job {
            id,
            serial: serial && !kind.is_phony(),
            kind,
            targets: targets.into_keys().collect(),
            dependencies: dependency_uris,
            priority,
            key,
            desc,
            data,
            body,
            state: JobState::default(),
        };

        for t in &job.targets {
            self.job_of_target.insert(t.clone(), id);
        }
        if let Some(key) = &job.key {
            self.jobs_of_key.entry(key.clone()).or_default().push(id);
        }
        tracing::debug!(job = %id, targets = %job, "declared");
        self.jobs.push(Arc::new(job));
        Ok(id)
    }

    /// Declare the job standing in for a target nobody produces
    ///
    /// The target is kept on failure. The job succeeds without running while
    /// the target exists and fails with `MissingRule` once it is found stale.
    ///
    /// # Errors
    ///
    /// Returns error if the target is already declared
    pub fn declare_missing(&mut self, target: &Uri) -> CoreResult<JobId> {
        let missing = target.to_string();
        self.declare(
            JobSpec::file([UriSpec::from(target).keep()], Vec::<UriSpec>::new())
                .use_content_hash(false)
                .body(move |_| {
                    Err(BuildError::MissingRule {
                        target: missing.clone(),
                    }
                    .into())
                }),
        )
    }

    #[must_use]
    pub fn job(&self, id: JobId) -> Option<&Arc<Job>> {
        self.jobs.get(id.index())
    }

    /// The job declaring `target`
    #[must_use]
    pub fn job_of_target(&self, target: &str) -> Option<&Arc<Job>> {
        self.job_of_target
            .get(target)
            .and_then(|id| self.jobs.get(id.index()))
    }

    /// Jobs declared with `key`, in declaration order
    #[must_use]
    pub fn jobs_of_key(&self, key: &str) -> Vec<&Arc<Job>> {
        self.jobs_of_key
            .get(key)
            .map(|ids| ids.iter().filter_map(|id| self.jobs.get(id.index())).collect())
            .unwrap_or_default()
    }

    /// Every key with at least one job
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.jobs_of_key.keys().map(String::as_str)
    }

    /// Merged metadata of a target or dependency
    #[must_use]
    pub fn meta(&self, uri: &Uri) -> Option<&UriMeta> {
        self.metadata.get(uri)
    }

    /// Jobs in declaration order
    pub fn jobs(&self) -> impl Iterator<Item = &Arc<Job>> {
        self.jobs.iter()
    }

    /// Declared targets in declaration order
    pub fn targets(&self) -> impl Iterator<Item = &Uri> {
        self.job_of_target.keys()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    fn merge_meta(&mut self, uri: &Uri, meta: &UriMeta) {
        if meta.is_empty() && self.metadata.contains_key(uri) {
            return;
        }
        let merged = self
            .metadata
            .remove(uri)
            .unwrap_or_default()
            .merge(meta);
        self.metadata.insert(uri.clone(), merged);
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("jobs", &self.jobs.len())
            .field("targets", &self.job_of_target.len())
            .finish()
    }
}

fn unique(specs: Vec<UriSpec>) -> BTreeMap<Uri, UriMeta> {
    let mut out: BTreeMap<Uri, UriMeta> = BTreeMap::new();
    for spec in specs {
        let merged = match out.remove(&spec.uri) {
            Some(existing) => existing.merge(&spec.meta),
            None => spec.meta,
        };
        out.insert(spec.uri, merged);
    }
    out
}
