//! Freshness values for staleness decisions.
//!
//! A freshness value is the moment a resource last changed, in seconds
//! since the Unix epoch. Resolvers decide what "changed" means: a plain
//! modification time, or the time the content hash last changed.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::time::{SystemTime, UNIX_EPOCH};

/// Comparable freshness of a target or dependency
///
/// Ordered with `f64::total_cmp`, so `OLDEST` (negative infinity) sorts
/// below every real timestamp.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Freshness(f64);

impl Freshness {
    /// Infinitely stale: never newer than anything
    pub const OLDEST: Self = Self(f64::NEG_INFINITY);

    /// Create from raw seconds since the Unix epoch
    #[must_use]
    pub const fn from_secs(seconds: f64) -> Self {
        Self(seconds)
    }

    /// Create from a system time (times before the epoch become negative)
    #[must_use]
    pub fn from_system_time(time: SystemTime) -> Self {
        match time.duration_since(UNIX_EPOCH) {
            Ok(d) => Self(d.as_secs_f64()),
            Err(e) => Self(-e.duration().as_secs_f64()),
        }
    }

    /// Freshness of "right now"
    #[must_use]
    pub fn now() -> Self {
        Self::from_system_time(SystemTime::now())
    }

    /// Get raw seconds
    #[must_use]
    pub const fn as_secs(&self) -> f64 {
        self.0
    }

    /// Whether this is the `OLDEST` sentinel
    #[must_use]
    pub fn is_oldest(&self) -> bool {
        self.0 == f64::NEG_INFINITY
    }
}

impl PartialEq for Freshness {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Freshness {}

impl PartialOrd for Freshness {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Freshness {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.total_cmp(&other.0)
    }
}

impl From<SystemTime> for Freshness {
    fn from(time: SystemTime) -> Self {
        Self::from_system_time(time)
    }
}

impl std::fmt::Display for Freshness {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_oldest() {
            write!(f, "-inf")
        } else {
            write!(f, "t={}", self.0)
        }
    }
}
