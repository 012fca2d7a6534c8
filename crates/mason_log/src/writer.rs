//! Background writer for the execution log.
//!
//! `record` only pushes onto an unbounded channel. A dedicated OS thread
//! drains the channel, stamps each record and appends it as one line.

use crate::error::LogError;
use crate::event::{JobSnapshot, LogRecord, Phase, RunMeta};
use chrono::Utc;
use parking_lot::Mutex;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::JoinHandle;
use tokio::sync::mpsc;

/// File holding one JSON record per line
pub const EVENTS_FILE: &str = "events.jsonl";

/// File holding the run metadata
pub const META_FILE: &str = "meta.json";

type Entry = (Phase, JobSnapshot);

struct Inner {
    dir: PathBuf,
    tx: Mutex<Option<mpsc::UnboundedSender<Entry>>>,
    writer: Mutex<Option<JoinHandle<Result<u64, LogError>>>>,
}

/// Cloneable handle to the execution log
#[derive(Clone, Default)]
pub struct ExecutionLog {
    inner: Option<Arc<Inner>>,
}

impl ExecutionLog {
    /// A log that drops every record
    #[must_use]
    pub fn disabled() -> Self {
        Self { inner: None }
    }

    /// Create `dir`, write `meta.json` and start the writer on `events.jsonl`
    ///
    /// # Errors
    ///
    /// Returns error if the directory or files cannot be created
    pub fn to_dir(dir: impl AsRef<Path>, meta: &RunMeta) -> Result<Self, LogError> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir).map_err(|e| LogError::io(&dir, e))?;

        let meta_path = dir.join(META_FILE);
        let meta_json = serde_json::to_vec_pretty(meta)?;
        fs::write(&meta_path, meta_json).map_err(|e| LogError::io(&meta_path, e))?;

        let events_path = dir.join(EVENTS_FILE);
        let file = File::create(&events_path).map_err(|e| LogError::io(&events_path, e))?;

        let (tx, rx) = mpsc::unbounded_channel();
        let writer = std::thread::Builder::new()
            .name("mason-log-writer".to_string())
            .spawn(move || drain(rx, BufWriter::new(file), events_path))
            .map_err(|e| LogError::Writer(e.to_string()))?;

        tracing::debug!(dir = %dir.display(), run_id = %meta.run_id, "execution log opened");

        Ok(Self {
            inner: Some(Arc::new(Inner {
                dir,
                tx: Mutex::new(Some(tx)),
                writer: Mutex::new(Some(writer)),
            })),
        })
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.is_some()
    }

    /// Directory the log is written to
    pub fn dir(&self) -> Option<&Path> {
        self.inner.as_ref().map(|inner| inner.dir.as_path())
    }

    /// Queue a record; never blocks on I/O
    pub fn record(&self, phase: Phase, job: JobSnapshot) {
        let Some(inner) = &self.inner else {
            return;
        };
        if let Some(tx) = inner.tx.lock().as_ref() {
            if tx.send((phase, job)).is_err() {
                tracing::warn!(%phase, "execution log writer has stopped, record dropped");
            }
        }
    }

    /// Stop accepting records and wait until every queued record is on disk
    ///
    /// Returns the number of records written. Calling it again returns 0.
    ///
    /// # Errors
    ///
    /// Returns the first write error hit by the writer thread
    pub fn close(&self) -> Result<u64, LogError> {
        let Some(inner) = &self.inner else {
            return Ok(0);
        };
        drop(inner.tx.lock().take());
        let Some(handle) = inner.writer.lock().take() else {
            return Ok(0);
        };
        handle
            .join()
            .map_err(|_| LogError::Writer("writer thread panicked".to_string()))?
    }
}

impl std::fmt::Debug for ExecutionLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionLog")
            .field("dir", &self.dir())
            .finish()
    }
}

fn drain(
    mut rx: mpsc::UnboundedReceiver<Entry>,
    mut out: BufWriter<File>,
    path: PathBuf,
) -> Result<u64, LogError> {
    let mut seq = 0u64;
    while let Some((phase, job)) = rx.blocking_recv() {
        seq += 1;
        let record = LogRecord::new(seq, Utc::now(), phase, job);
        let line = serde_json::to_string(&record)?;
        writeln!(out, "{}", line)
            .and_then(|()| out.flush())
            .map_err(|e| LogError::io(&path, e))?;
    }
    Ok(seq)
}
