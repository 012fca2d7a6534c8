//! Execution log errors.

use std::path::PathBuf;

/// Execution log errors
#[derive(Debug, thiserror::Error)]
pub enum LogError {
    /// Filesystem failure while creating or writing the log
    #[error("I/O error on {path}: {source}")]
    Io {
        /// File or directory being accessed
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// A line could not be encoded or decoded
    #[error("Malformed record at {path}:{line}: {source}")]
    Malformed {
        /// Log file
        path: PathBuf,
        /// One-based line number
        line: usize,
        /// Underlying error
        #[source]
        source: serde_json::Error,
    },

    /// Metadata could not be encoded
    #[error("Encoding error: {0}")]
    Encode(#[from] serde_json::Error),

    /// The writer thread could not be started or panicked
    #[error("Writer thread failed: {0}")]
    Writer(String),
}

impl LogError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
