//! Cross-file linking: one file's call graph entry into network edges.
//!
//! Linking is total. Every entry produces edges, nothing here can fail.
//!
//! Naming rules:
//! - top-level calls hang off a synthetic `{package}.main.{hash}` symbol the
//!   file exports;
//! - `function a.b.c` is exported as `{package}.b.c`, unless `a` was obtained
//!   through `require`, in which case the name is kept as written;
//! - `local function f` is defined by the file under its bare name.
//!
//! The `require` check compares the first name segment against the raw
//! `require` arguments, so a local table that happens to share its name with
//! a required module is treated as that module.

use std::path::Path;
use xxhash_rust::xxh32::xxh32;

use crate::storage::graph::{Action, CallNetwork};
use crate::types::{CallGraphEntry, ScopeTag};

/// One successfully extracted file, ready to be linked.
#[derive(Debug, Clone, Copy)]
pub struct LinkUnit<'a> {
    /// Root-relative path with a leading `/`, used as the file node name.
    pub relative_path: &'a str,
    /// Absolute path; seeds the synthetic main symbol's hash.
    pub absolute_path: &'a Path,
    pub entry: &'a CallGraphEntry,
    pub requires: &'a [String],
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkEdge {
    pub from: String,
    pub to: String,
    pub action: Action,
}

impl LinkEdge {
    fn new(from: &str, to: &str, action: Action) -> Self {
        Self {
            from: from.to_string(),
            to: to.to_string(),
            action,
        }
    }
}

/// File name without its extension.
pub fn package_name(path: &Path) -> String {
    path.file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// `{package}.main.{xxh32 of the absolute path, 8 hex digits}`.
pub fn default_main_symbol(package: &str, absolute_path: &Path) -> String {
    let path = absolute_path.to_string_lossy();
    format!("{package}.main.{:08x}", xxh32(path.as_bytes(), 0))
}

/// Rewrite an exported dotted name into its package-qualified form.
pub fn qualify_export(exported: &str, package: &str, requires: &[String]) -> String {
    match exported.split_once('.') {
        Some((father, _)) if !requires.iter().any(|r| r == father) => {
            let left = &exported[father.len()..];
            format!("{package}{left}")
        }
        _ => exported.to_string(),
    }
}

/// Edges one file contributes to the network, in application order.
pub fn plan_links(unit: &LinkUnit<'_>) -> Vec<LinkEdge> {
    let package = package_name(unit.absolute_path);
    let mut edges = Vec::with_capacity(unit.entry.call_count() + unit.entry.scope_count());

    for (scope, callees) in unit.entry.scopes() {
        let (caller, action) = match scope {
            ScopeTag::Global => (
                default_main_symbol(&package, unit.absolute_path),
                Action::Export,
            ),
            ScopeTag::Exported(name) => (
                qualify_export(name, &package, unit.requires),
                Action::Export,
            ),
            ScopeTag::Local(name) => (name.clone(), Action::Define),
        };

        if callees.is_empty() {
            continue;
        }
        edges.push(LinkEdge::new(unit.relative_path, &caller, action));
        edges.extend(
            callees
                .iter()
                .map(|callee| LinkEdge::new(&caller, callee, Action::Call)),
        );
    }

    edges
}

/// Apply one file's edges to `network`. Returns the number of edges applied.
pub fn link(network: &mut CallNetwork, unit: &LinkUnit<'_>) -> usize {
    network.ensure_file(unit.relative_path);

    let edges = plan_links(unit);
    for edge in &edges {
        network.add_edge(&edge.from, &edge.to, edge.action);
    }

    tracing::trace!(
        target: "link",
        "linked {} ({} edges)",
        unit.relative_path,
        edges.len()
    );
    edges.len()
}
