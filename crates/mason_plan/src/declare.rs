//! Declaration builders.

use crate::job::{Job, JobBody, JobKind, PRIORITY_DEFAULT};
use mason_core::{Uri, UriMeta};
use std::sync::Arc;

/// A URI together with its declaration-time metadata
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UriSpec {
    pub uri: Uri,
    pub meta: UriMeta,
}

impl UriSpec {
    #[must_use]
    pub fn new(uri: impl Into<Uri>) -> Self {
        Self {
            uri: uri.into(),
            meta: UriMeta::default(),
        }
    }

    /// Never remove this target after a failure
    #[must_use]
    pub fn keep(mut self) -> Self {
        self.meta.keep = true;
        self
    }

    /// Credential handed to the resolver
    #[must_use]
    pub fn credential(mut self, credential: impl Into<String>) -> Self {
        self.meta.credential = Some(credential.into());
        self
    }

    /// Only the existence of this dependency gates the job
    #[must_use]
    pub fn check_existence_only(mut self) -> Self {
        self.meta.check_existence_only = true;
        self
    }
}

impl From<&str> for UriSpec {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for UriSpec {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

impl From<Uri> for UriSpec {
    fn from(value: Uri) -> Self {
        Self::new(value)
    }
}

impl From<&Uri> for UriSpec {
    fn from(value: &Uri) -> Self {
        Self::new(value.clone())
    }
}

/// Builder for one job declaration
///
/// ```
/// use mason_plan::{JobSpec, Registry, UriSpec};
///
/// let mut registry = Registry::new();
/// registry
///     .declare(
///         JobSpec::file(["out/result.bin"], [UriSpec::from("in.bin").check_existence_only()])
///             .priority(1)
///             .desc("convert the input")
///             .body(|_job| Ok(())),
///     )
///     .unwrap();
/// assert!(registry.job_of_target("out/result.bin").is_some());
/// ```
#[derive(Clone)]
pub struct JobSpec {
    pub(crate) kind: JobKind,
    pub(crate) targets: Vec<UriSpec>,
    pub(crate) dependencies: Vec<UriSpec>,
    pub(crate) priority: i32,
    pub(crate) serial: bool,
    pub(crate) key: Option<String>,
    pub(crate) desc: Option<String>,
    pub(crate) data: Option<serde_json::Value>,
    pub(crate) body: Option<JobBody>,
}

impl JobSpec {
    fn new(kind: JobKind, targets: Vec<UriSpec>, dependencies: Vec<UriSpec>) -> Self {
        Self {
            kind,
            targets,
            dependencies,
            priority: PRIORITY_DEFAULT,
            serial: false,
            key: None,
            desc: None,
            data: None,
            body: None,
        }
    }

    /// A job producing resources
    pub fn file<T, D>(
        targets: impl IntoIterator<Item = T>,
        dependencies: impl IntoIterator<Item = D>,
    ) -> Self
    where
        T: Into<UriSpec>,
        D: Into<UriSpec>,
    {
        Self::new(
            JobKind::File {
                use_content_hash: None,
                auto_prefix: None,
            },
            targets.into_iter().map(Into::into).collect(),
            dependencies.into_iter().map(Into::into).collect(),
        )
    }

    /// A named action
    pub fn phony<D>(target: impl Into<UriSpec>, dependencies: impl IntoIterator<Item = D>) -> Self
    where
        D: Into<UriSpec>,
    {
        Self::new(
            JobKind::Phony,
            vec![target.into()],
            dependencies.into_iter().map(Into::into).collect(),
        )
    }

    /// Add one more target
    #[must_use]
    pub fn target(mut self, target: impl Into<UriSpec>) -> Self {
        self.targets.push(target.into());
        self
    }

    /// Add one more dependency
    #[must_use]
    pub fn dependency(mut self, dependency: impl Into<UriSpec>) -> Self {
        self.dependencies.push(dependency.into());
        self
    }

    /// Higher runs first among ready jobs
    #[must_use]
    pub fn priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Compete for a serial slot; ignored for phony jobs
    #[must_use]
    pub fn serial(mut self, serial: bool) -> Self {
        self.serial = serial;
        self
    }

    #[must_use]
    pub fn key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    #[must_use]
    pub fn desc(mut self, desc: impl Into<String>) -> Self {
        self.desc = Some(desc.into());
        self
    }

    #[must_use]
    pub fn data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }

    /// Hash dependency contents in addition to modification times
    #[must_use]
    pub fn use_content_hash(mut self, value: bool) -> Self {
        if let JobKind::File {
            use_content_hash, ..
        } = &mut self.kind
        {
            *use_content_hash = Some(value);
        }
        self
    }

    /// Place targets under `prefix/<hash of data and dependencies>`
    #[must_use]
    pub fn auto(mut self, prefix: impl Into<String>) -> Self {
        if let JobKind::File { auto_prefix, .. } = &mut self.kind {
            *auto_prefix = Some(prefix.into());
        }
        self
    }

    #[must_use]
    pub fn body<F>(mut self, body: F) -> Self
    where
        F: Fn(&Job) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.body = Some(Arc::new(body));
        self
    }

    #[must_use]
    pub fn kind(&self) -> &JobKind {
        &self.kind
    }
}

impl std::fmt::Debug for JobSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobSpec")
            .field("kind", &self.kind)
            .field("targets", &self.targets)
            .field("dependencies", &self.dependencies)
            .field("priority", &self.priority)
            .field("serial", &self.serial)
            .field("has_body", &self.body.is_some())
            .finish()
    }
}
