//! Reading execution logs back.

use crate::error::LogError;
use crate::event::{LogRecord, RunMeta};
use std::fs;
use std::io::{BufRead, BufReader};
use std::path::Path;

/// Parse every record of an `events.jsonl` file
///
/// Blank lines are skipped.
///
/// # Errors
///
/// Returns error if the file cannot be read or a line is not a record
pub fn read_log(path: impl AsRef<Path>) -> Result<Vec<LogRecord>, LogError> {
    let path = path.as_ref();
    let file = fs::File::open(path).map_err(|e| LogError::io(path, e))?;
    let mut records = Vec::new();
    for (i, line) in BufReader::new(file).lines().enumerate() {
        let line = line.map_err(|e| LogError::io(path, e))?;
        if line.trim().is_empty() {
            continue;
        }
        let record = serde_json::from_str(&line).map_err(|source| LogError::Malformed {
            path: path.to_path_buf(),
            line: i + 1,
            source,
        })?;
        records.push(record);
    }
    Ok(records)
}

/// Parse a `meta.json` file
///
/// # Errors
///
/// Returns error if the file cannot be read or parsed
pub fn read_meta(path: impl AsRef<Path>) -> Result<RunMeta, LogError> {
    let path = path.as_ref();
    let bytes = fs::read(path).map_err(|e| LogError::io(path, e))?;
    serde_json::from_slice(&bytes).map_err(|source| LogError::Malformed {
        path: path.to_path_buf(),
        line: 1,
        source,
    })
}
