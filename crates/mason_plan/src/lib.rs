//! MASON Planner
//!
//! Job declarations, the job registry and read-only exports of the
//! declared dependency graph. Nothing here runs a job.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod auto;
pub mod declare;
pub mod export;
pub mod job;
pub mod registry;
pub mod signal;

pub use auto::{auto_prefix_of, auto_targets};
pub use declare::{JobSpec, UriSpec};
pub use export::{dependencies_dot, dependencies_json, render_dependencies, render_descriptions};
pub use job::{Job, JobBody, JobKind, JobState, PRIORITY_DEFAULT};
pub use registry::Registry;
pub use signal::DoneSignal;
