//! MASON Runtime
//!
//! Decides which jobs are out of date and runs them on a bounded worker
//! pool, honoring priorities, the serial class and the host load average.

#![warn(clippy::all)]

pub mod cache;
pub mod config;
pub mod context;
pub mod engine;
pub mod load;
pub mod pool;
pub mod resolver;
pub mod staleness;
pub mod teardown;

pub use cache::FreshnessCache;
pub use config::{DryRunPropagation, SchedulerConfig};
pub use context::SchedulerContext;
pub use engine::{Engine, RunReport};
pub use load::{FixedLoad, LoadProbe, SystemLoad};
pub use pool::{Outcome, PoolConfig, WorkItem, WorkerPool};
pub use resolver::{FileResolver, MemoryResolver, Resolver, ResolverSet};
pub use staleness::{Buildable, run_job};
pub use teardown::terminate_subprocesses;
