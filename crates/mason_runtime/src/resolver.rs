//! Resource resolvers.
//!
//! A resolver reports how fresh a resource is and can remove it. Resolvers
//! are looked up by URI scheme; a scheme without a resolver is an error at
//! first use.

use dashmap::DashMap;
use mason_core::{Freshness, Hash, ResolverError, Uri};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Freshness and removal of resources of one scheme
pub trait Resolver: Send + Sync {
    /// Freshness of `uri`
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the resource does not exist
    fn freshness(
        &self,
        uri: &Uri,
        credential: Option<&str>,
        use_content_hash: bool,
    ) -> Result<Freshness, ResolverError>;

    /// Remove `uri`
    ///
    /// # Errors
    ///
    /// Returns error if the resource cannot be removed
    fn remove(&self, uri: &Uri, credential: Option<&str>) -> Result<(), ResolverError>;
}

/// Resolvers keyed by scheme
#[derive(Clone, Default)]
pub struct ResolverSet {
    by_scheme: HashMap<String, Arc<dyn Resolver>>,
}

impl ResolverSet {
    /// A set without any resolver
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// A set with the `file` resolver
    #[must_use]
    pub fn with_file(hash_dir: impl Into<PathBuf>) -> Self {
        Self::empty().register(mason_core::uri::DEFAULT_SCHEME, FileResolver::new(hash_dir))
    }

    /// Add or replace the resolver of `scheme`
    #[must_use]
    pub fn register(mut self, scheme: impl Into<String>, resolver: impl Resolver + 'static) -> Self {
        self.by_scheme.insert(scheme.into(), Arc::new(resolver));
        self
    }

    /// Add or replace the resolver of `scheme`, sharing it with the caller
    #[must_use]
    pub fn register_shared(mut self, scheme: impl Into<String>, resolver: Arc<dyn Resolver>) -> Self {
        self.by_scheme.insert(scheme.into(), resolver);
        self
    }

    /// The resolver of `uri`'s scheme
    ///
    /// # Errors
    ///
    /// Returns `UnsupportedScheme` if none is registered
    pub fn resolver_of(&self, uri: &Uri) -> Result<&Arc<dyn Resolver>, ResolverError> {
        let scheme = uri.scheme();
        self.by_scheme
            .get(scheme)
            .ok_or_else(|| ResolverError::UnsupportedScheme {
                scheme: scheme.to_string(),
            })
    }

    /// # Errors
    ///
    /// Returns the resolver's error, or `UnsupportedScheme`
    pub fn freshness(
        &self,
        uri: &Uri,
        credential: Option<&str>,
        use_content_hash: bool,
    ) -> Result<Freshness, ResolverError> {
        self.resolver_of(uri)?
            .freshness(uri, credential, use_content_hash)
    }

    /// # Errors
    ///
    /// Returns the resolver's error, or `UnsupportedScheme`
    pub fn remove(&self, uri: &Uri, credential: Option<&str>) -> Result<(), ResolverError> {
        self.resolver_of(uri)?.remove(uri, credential)
    }

    pub fn schemes(&self) -> impl Iterator<Item = &str> {
        self.by_scheme.keys().map(String::as_str)
    }
}

impl std::fmt::Debug for ResolverSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut schemes: Vec<&str> = self.schemes().collect();
        schemes.sort_unstable();
        f.debug_struct("ResolverSet").field("schemes", &schemes).finish()
    }
}

/// What the content hash record of one file holds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct HashRecord {
    hash: String,
    mtime: Freshness,
    freshness: Freshness,
}

/// Local files, fresh as of their modification time
///
/// With content hashing, a file whose modification time moved but whose
/// content did not keeps the freshness it had when the content last changed.
#[derive(Debug, Clone)]
pub struct FileResolver {
    hash_dir: PathBuf,
}

impl FileResolver {
    #[must_use]
    pub fn new(hash_dir: impl Into<PathBuf>) -> Self {
        Self {
            hash_dir: hash_dir.into(),
        }
    }

    fn record_path(&self, path: &Path) -> PathBuf {
        let absolute = std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf());
        let key = Hash::compute(absolute.to_string_lossy().as_bytes());
        self.hash_dir.join(format!("{}.json", key.dir_of()))
    }

    fn hashed_freshness(&self, uri: &Uri, path: &Path, mtime: Freshness) -> Result<Freshness, ResolverError> {
        let record_path = self.record_path(path);
        let previous: Option<HashRecord> = fs::read(&record_path)
            .ok()
            .and_then(|bytes| serde_json::from_slice(&bytes).ok());

        if let Some(previous) = &previous {
            if previous.mtime == mtime {
                return Ok(previous.freshness);
            }
        }

        let hash = Hash::compute_file(path)
            .map_err(|e| ResolverError::from_io(uri.as_str(), &e))?
            .to_hex();
        let freshness = match previous {
            Some(previous) if previous.hash == hash => previous.freshness,
            _ => mtime,
        };
        let record = HashRecord {
            hash,
            mtime,
            freshness,
        };
        if let Err(e) = write_record(&record_path, &record) {
            tracing::warn!(uri = %uri, error = %e, "failed to write content hash record");
        }
        Ok(freshness)
    }
}

impl Resolver for FileResolver {
    fn freshness(
        &self,
        uri: &Uri,
        _credential: Option<&str>,
        use_content_hash: bool,
    ) -> Result<Freshness, ResolverError> {
        let path = uri.file_path()?;
        let meta = fs::metadata(&path).map_err(|e| ResolverError::from_io(uri.as_str(), &e))?;
        let mtime = meta
            .modified()
            .map(Freshness::from_system_time)
            .map_err(|e| ResolverError::from_io(uri.as_str(), &e))?;
        if !use_content_hash || !meta.is_file() {
            return Ok(mtime);
        }
        self.hashed_freshness(uri, &path, mtime)
    }

    fn remove(&self, uri: &Uri, _credential: Option<&str>) -> Result<(), ResolverError> {
        let path = uri.file_path()?;
        let meta =
            fs::symlink_metadata(&path).map_err(|e| ResolverError::from_io(uri.as_str(), &e))?;
        let removed = if meta.is_dir() {
            fs::remove_dir_all(&path)
        } else {
            fs::remove_file(&path)
        };
        removed.map_err(|e| ResolverError::from_io(uri.as_str(), &e))
    }
}

fn write_record(path: &Path, record: &HashRecord) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension(format!("json.{}.tmp", std::process::id()));
    fs::write(&tmp, serde_json::to_vec(record)?)?;
    fs::rename(&tmp, path)
}

/// Resources kept in memory
///
/// Useful for embedders whose targets are not files, and for tests.
#[derive(Debug, Default)]
pub struct MemoryResolver {
    entries: DashMap<Uri, Freshness>,
    lookups: AtomicU64,
}

impl MemoryResolver {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create or update a resource
    pub fn set(&self, uri: impl Into<Uri>, freshness: Freshness) {
        self.entries.insert(uri.into(), freshness);
    }

    #[must_use]
    pub fn get(&self, uri: &str) -> Option<Freshness> {
        self.entries.get(uri).map(|entry| *entry.value())
    }

    #[must_use]
    pub fn contains(&self, uri: &str) -> bool {
        self.entries.contains_key(uri)
    }

    /// Number of `freshness` calls served so far
    #[must_use]
    pub fn lookups(&self) -> u64 {
        self.lookups.load(Ordering::Relaxed)
    }
}

impl Resolver for MemoryResolver {
    fn freshness(
        &self,
        uri: &Uri,
        _credential: Option<&str>,
        _use_content_hash: bool,
    ) -> Result<Freshness, ResolverError> {
        self.lookups.fetch_add(1, Ordering::Relaxed);
        self.get(uri.as_str()).ok_or_else(|| ResolverError::NotFound {
            uri: uri.to_string(),
        })
    }

    fn remove(&self, uri: &Uri, _credential: Option<&str>) -> Result<(), ResolverError> {
        self.entries
            .remove(uri.as_str())
            .map(|_| ())
            .ok_or_else(|| ResolverError::NotFound {
                uri: uri.to_string(),
            })
    }
}

impl<R: Resolver + ?Sized> Resolver for Arc<R> {
    fn freshness(
        &self,
        uri: &Uri,
        credential: Option<&str>,
        use_content_hash: bool,
    ) -> Result<Freshness, ResolverError> {
        (**self).freshness(uri, credential, use_content_hash)
    }

    fn remove(&self, uri: &Uri, credential: Option<&str>) -> Result<(), ResolverError> {
        (**self).remove(uri, credential)
    }
}
