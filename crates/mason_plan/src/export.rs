//! Read-only renderings of the declared graph.
//!
//! All exports are sorted by targets so they do not depend on declaration
//! order.

use crate::job::Job;
use serde_json::json;
use std::collections::HashMap;
use std::fmt::Write;

/// JSON array of `{"targets": [...], "dependencies": [...]}`
pub fn dependencies_json<'a>(jobs: impl IntoIterator<Item = &'a Job>) -> serde_json::Value {
    let edges = sort_jobs(jobs)
        .into_iter()
        .map(|j| {
            json!({
                "targets": j.targets(),
                "dependencies": j.dependencies(),
            })
        })
        .collect();
    serde_json::Value::Array(edges)
}

/// Graphviz rendering with one action node per job
///
/// Targets point at the action, the action points at its dependencies and
/// the targets of a multi-target job share a cluster.
pub fn dependencies_dot<'a>(jobs: impl IntoIterator<Item = &'a Job>) -> String {
    let jobs = sort_jobs(jobs);
    let mut node_of_name: HashMap<&str, String> = HashMap::new();
    let mut i = 0usize;
    let mut out = String::from("digraph G{\n");

    for (i_cluster, job) in jobs.iter().enumerate() {
        i += 1;
        let action = format!("n{}", i);
        let _ = writeln!(out, "{}[label=\"○\"]", action);

        for t in job.targets() {
            let node = node_of(t.as_str(), &mut node_of_name, &mut i);
            let _ = writeln!(out, "{}[label={}]", node, escape(t.as_str()));
            let _ = writeln!(out, "{} -> {}", node, action);
        }

        if job.targets().len() > 1 {
            let _ = writeln!(out, "subgraph cluster_{}{{", i_cluster + 1);
            for t in job.targets() {
                if let Some(node) = node_of_name.get(t.as_str()) {
                    let _ = writeln!(out, "{}", node);
                }
            }
            out.push_str("}\n");
        }

        for d in job.dependencies() {
            let node = node_of(d.as_str(), &mut node_of_name, &mut i);
            let _ = writeln!(out, "{}[label={}]", node, escape(d.as_str()));
            let _ = writeln!(out, "{} -> {}", action, node);
        }
    }
    out.push('}');
    out
}

/// Every job's targets followed by its tab-indented dependencies
pub fn render_dependencies<'a>(jobs: impl IntoIterator<Item = &'a Job>) -> String {
    sort_jobs(jobs).iter().map(|j| j.render()).collect()
}

/// Every target followed by its tab-indented description lines
pub fn render_descriptions<'a>(jobs: impl IntoIterator<Item = &'a Job>) -> String {
    let mut entries: Vec<(&str, Option<&str>)> = jobs
        .into_iter()
        .flat_map(|j| j.targets().iter().map(move |t| (t.as_str(), j.desc())))
        .collect();
    entries.sort_unstable();

    let mut out = String::new();
    for (target, desc) in entries {
        out.push_str(target);
        out.push('\n');
        for line in desc.into_iter().flat_map(str::lines) {
            out.push('\t');
            out.push_str(line);
            out.push('\n');
        }
    }
    out
}

fn sort_jobs<'a>(jobs: impl IntoIterator<Item = &'a Job>) -> Vec<&'a Job> {
    let mut jobs: Vec<&Job> = jobs.into_iter().collect();
    jobs.sort_by(|a, b| a.targets().cmp(b.targets()));
    jobs
}

fn node_of<'a>(name: &'a str, node_of_name: &mut HashMap<&'a str, String>, i: &mut usize) -> String {
    if let Some(node) = node_of_name.get(name) {
        return node.clone();
    }
    *i += 1;
    let node = format!("n{}", i);
    node_of_name.insert(name, node.clone());
    node
}

fn escape(s: &str) -> String {
    format!("\"{}\"", s.replace('"', "\\\""))
}
