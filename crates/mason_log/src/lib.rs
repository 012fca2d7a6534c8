//! MASON Execution Log
//!
//! Append-only JSON-lines record of every job's lifecycle.
//! Records are queued without blocking and written by a background thread.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod event;
pub mod reader;
pub mod writer;

pub use error::LogError;
pub use event::{JobSnapshot, LogRecord, Phase, RunMeta};
pub use reader::{read_log, read_meta};
pub use writer::{EVENTS_FILE, ExecutionLog, META_FILE};
