//! MASON Core Types
//!
//! Pure types shared by the planner, the runtime and the CLI.
//! Nothing in this crate spawns threads or touches a scheduler.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod freshness;
pub mod hash;
pub mod id;
pub mod uri;

// Re-exports
pub use error::{BuildError, CoreResult, DeferredError, ResolverError};
pub use freshness::Freshness;
pub use hash::{Hash, HashError};
pub use id::{JobId, RunId};
pub use uri::{Uri, UriMeta};
