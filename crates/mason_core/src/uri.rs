//! Target and dependency identifiers.

use crate::error::ResolverError;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Scheme assumed for bare paths
pub const DEFAULT_SCHEME: &str = "file";

/// Opaque identifier of a target or dependency
///
/// Either a bare path (`out/result.bin`) or `scheme://rest`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Uri(String);

impl Uri {
    /// Wrap a string
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// The raw string
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Scheme of the URI, `file` for bare paths
    #[must_use]
    pub fn scheme(&self) -> &str {
        match self.0.split_once("://") {
            Some((scheme, _)) if !scheme.is_empty() => scheme,
            _ => DEFAULT_SCHEME,
        }
    }

    /// Local path of a `file` URI
    ///
    /// Accepts bare paths, `file:///p` and `file://localhost/p`.
    ///
    /// # Errors
    ///
    /// Returns error for other schemes or a non-local host
    pub fn file_path(&self) -> Result<PathBuf, ResolverError> {
        if self.scheme() != DEFAULT_SCHEME {
            return Err(ResolverError::InvalidUri {
                uri: self.0.clone(),
                reason: format!("scheme {} is not a local file", self.scheme()),
            });
        }
        let Some((_, rest)) = self.0.split_once("://") else {
            return Ok(PathBuf::from(&self.0));
        };
        let (host, path) = match rest.find('/') {
            Some(i) => (&rest[..i], &rest[i..]),
            None => (rest, ""),
        };
        if !(host.is_empty() || host == "localhost") {
            return Err(ResolverError::InvalidUri {
                uri: self.0.clone(),
                reason: format!("host {} is not localhost", host),
            });
        }
        if path.is_empty() {
            return Err(ResolverError::InvalidUri {
                uri: self.0.clone(),
                reason: "empty path".to_string(),
            });
        }
        Ok(PathBuf::from(path))
    }
}

impl From<&str> for Uri {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for Uri {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl std::borrow::Borrow<str> for Uri {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for Uri {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Uri {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Per-URI metadata attached at declaration time
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UriMeta {
    /// Credential handed to the resolver for this URI
    pub credential: Option<String>,
    /// Never remove this target after a failure
    pub keep: bool,
    /// Only the existence of this dependency matters, not its freshness
    pub check_existence_only: bool,
}

impl UriMeta {
    /// Whether nothing is set
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }

    /// Combine with metadata declared later for the same URI
    #[must_use]
    pub fn merge(mut self, other: &UriMeta) -> Self {
        if other.credential.is_some() {
            self.credential.clone_from(&other.credential);
        }
        self.keep |= other.keep;
        self.check_existence_only |= other.check_existence_only;
        self
    }
}
