//! Core error types for MASON.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Core result type
pub type CoreResult<T> = Result<T, BuildError>;

/// Build error type
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BuildError {
    /// Referenced target has no declaring job and does not exist
    #[error("No rule to make {target}")]
    MissingRule {
        /// The target nobody produces
        target: String,
    },

    /// A cycle was reached while invoking dependencies
    #[error("Circular dependency: {}", .cycle.join(" -> "))]
    CircularDependency {
        /// Targets along the cycle, first entry repeated at the end
        cycle: Vec<String>,
    },

    /// A job body returned an error or panicked
    #[error("Job {} failed: {message}", .targets.join(", "))]
    JobExecution {
        /// Targets of the failing job
        targets: Vec<String>,
        /// Rendered error chain
        message: String,
    },

    /// A resolver could not compute freshness or remove a target
    #[error(transparent)]
    Resolver(#[from] ResolverError),

    /// Invalid scheduler parameters
    #[error("Invalid configuration: {reason}")]
    Configuration {
        /// What is wrong
        reason: String,
    },

    /// A target was declared by two jobs
    #[error("Target {target} is already declared")]
    DuplicateTarget {
        /// The re-declared target
        target: String,
    },

    /// A job declaration is malformed
    #[error("Invalid job: {reason}")]
    InvalidJob {
        /// What is wrong
        reason: String,
    },

    /// A job failed in fail-fast mode; the run was torn down
    #[error("Job {} failed: {error}", .targets.join(", "))]
    JobFailed {
        /// Targets of the job that stopped the run
        targets: Vec<String>,
        /// The job's own error
        error: Box<BuildError>,
    },

    /// Failures collected in keep-going mode
    #[error("Execution failed: {}", DeferredList(.errors))]
    DeferredFailures {
        /// Every captured failure, in completion order
        errors: Vec<DeferredError>,
    },

    /// The run was interrupted from outside
    #[error("Interrupted")]
    Interrupted,

    /// The run was already torn down when this job was reached
    #[error("Aborted after an earlier failure")]
    Aborted,

    /// Internal error (for unexpected errors)
    #[error("Internal error: {message}")]
    Internal {
        /// Error message
        message: String,
    },
}

impl BuildError {
    /// Whether this error is a consequence of teardown rather than a failure of its own
    #[must_use]
    pub const fn is_teardown(&self) -> bool {
        matches!(self, Self::Aborted | Self::Interrupted)
    }
}

/// Resource resolver errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ResolverError {
    /// The resource does not exist
    #[error("Resource not found: {uri}")]
    NotFound {
        /// Missing resource
        uri: String,
    },

    /// No resolver is registered for the scheme
    #[error("No resolver for scheme {scheme}")]
    UnsupportedScheme {
        /// Unknown scheme
        scheme: String,
    },

    /// The URI cannot be handled by the resolver
    #[error("Invalid URI {uri}: {reason}")]
    InvalidUri {
        /// Offending URI
        uri: String,
        /// What is wrong
        reason: String,
    },

    /// Underlying I/O failure
    #[error("I/O error on {uri}: {reason}")]
    Io {
        /// Resource being accessed
        uri: String,
        /// Rendered I/O error
        reason: String,
    },
}

impl ResolverError {
    /// Map an I/O error, turning `NotFound` into the dedicated variant
    #[must_use]
    pub fn from_io(uri: &str, err: &std::io::Error) -> Self {
        if err.kind() == std::io::ErrorKind::NotFound {
            Self::NotFound {
                uri: uri.to_string(),
            }
        } else {
            Self::Io {
                uri: uri.to_string(),
                reason: err.to_string(),
            }
        }
    }
}

/// A failure recorded for the end-of-run report in keep-going mode
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeferredError {
    /// Targets of the owning job
    pub targets: Vec<String>,
    /// Rendered error
    pub message: String,
}

impl fmt::Display for DeferredError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.targets.join(", "), self.message)
    }
}

struct DeferredList<'a>(&'a [DeferredError]);

impl fmt::Display for DeferredList<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} error(s)", self.0.len())?;
        for e in self.0 {
            write!(f, "\n  {}", e)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = BuildError::MissingRule {
            target: "in.bin".to_string(),
        };
        assert_eq!(err.to_string(), "No rule to make in.bin");

        let err = BuildError::CircularDependency {
            cycle: vec!["a".to_string(), "b".to_string(), "a".to_string()],
        };
        assert_eq!(err.to_string(), "Circular dependency: a -> b -> a");
    }

    #[test]
    fn test_job_failed_display() {
        let err = BuildError::JobFailed {
            targets: vec!["out.bin".to_string()],
            error: Box::new(BuildError::MissingRule {
                target: "in.bin".to_string(),
            }),
        };
        let s = err.to_string();
        assert!(s.contains("out.bin"));
        assert!(s.contains("No rule to make in.bin"));
    }

    #[test]
    fn test_deferred_display_lists_every_error() {
        let err = BuildError::DeferredFailures {
            errors: vec![
                DeferredError {
                    targets: vec!["a".to_string()],
                    message: "boom".to_string(),
                },
                DeferredError {
                    targets: vec!["b".to_string(), "c".to_string()],
                    message: "bang".to_string(),
                },
            ],
        };
        let s = err.to_string();
        assert!(s.starts_with("Execution failed: 2 error(s)"));
        assert!(s.contains("[a] boom"));
        assert!(s.contains("[b, c] bang"));
    }

    #[test]
    fn test_resolver_from_io() {
        let nf = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        assert_eq!(
            ResolverError::from_io("x", &nf),
            ResolverError::NotFound { uri: "x".to_string() }
        );

        let denied = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "no");
        assert!(matches!(ResolverError::from_io("x", &denied), ResolverError::Io { .. }));
    }

    #[test]
    fn test_resolver_error_converts() {
        let err: BuildError = ResolverError::UnsupportedScheme {
            scheme: "s3".to_string(),
        }
        .into();
        assert_eq!(err.to_string(), "No resolver for scheme s3");
    }

    #[test]
    fn test_is_teardown() {
        assert!(BuildError::Aborted.is_teardown());
        assert!(BuildError::Interrupted.is_teardown());
        assert!(!BuildError::Internal { message: String::new() }.is_teardown());
    }
}
