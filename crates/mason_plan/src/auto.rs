//! Content-addressed target names.
//!
//! Targets of an auto job live under a directory named after the hash of
//! the job's data and dependencies, so changing either yields new paths.

use crate::declare::UriSpec;
use mason_core::{Hash, Uri};
use serde_json::json;

/// `prefix/<ab>/<cdef...>` for the given data and dependencies
#[must_use]
pub fn auto_prefix_of(prefix: &str, data: Option<&serde_json::Value>, dependencies: &[Uri]) -> String {
    let mut ds: Vec<&str> = dependencies.iter().map(Uri::as_str).collect();
    ds.sort_unstable();
    ds.dedup();
    let key = json!({ "data": data, "ds": ds });
    format!("{}/{}", prefix.trim_end_matches('/'), Hash::compute_json(&key).dir_of())
}

/// Prepend the auto prefix to every target, keeping their metadata
#[must_use]
pub fn auto_targets(
    prefix: &str,
    data: Option<&serde_json::Value>,
    dependencies: &[Uri],
    targets: Vec<UriSpec>,
) -> Vec<UriSpec> {
    let prefix = auto_prefix_of(prefix, data, dependencies);
    targets
        .into_iter()
        .map(|t| UriSpec {
            uri: Uri::new(format!("{}/{}", prefix, t.uri.as_str().trim_start_matches('/'))),
            meta: t.meta,
        })
        .collect()
}
