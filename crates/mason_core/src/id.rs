//! Identifiers for MASON entities.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Run identifier - identifies a single invocation of the build
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RunId(Uuid);

impl RunId {
    /// Create a new random RunId
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Create from UUID bytes
    #[must_use]
    pub const fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(Uuid::from_bytes(bytes))
    }

    /// Get as UUID
    #[must_use]
    pub const fn as_uuid(&self) -> Uuid {
        self.0
    }

    /// Directory-friendly label: `<UTC yyyymmddHHMMSS>-<uuid>`
    ///
    /// Labels sort by start time, which keeps log directories in run order.
    #[must_use]
    pub fn label(&self) -> String {
        format!("{}-{}", Utc::now().format("%Y%m%d%H%M%S"), self.0)
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "run_{}", self.0)
    }
}

/// Job identifier - dense index of a job inside its registry
///
/// Ids are only meaningful for the registry that issued them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct JobId(usize);

impl JobId {
    /// Create from a raw index
    #[must_use]
    pub const fn from_index(index: usize) -> Self {
        Self(index)
    }

    /// Get the raw index
    #[must_use]
    pub const fn index(&self) -> usize {
        self.0
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "job_{}", self.0)
    }
}
