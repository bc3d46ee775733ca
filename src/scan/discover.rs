//! Collecting stage: walk the scan root and select candidate files.

use ignore::WalkBuilder;
use ignore::overrides::OverrideBuilder;
use std::fs::File;
use std::io::Read;
use std::path::{Component, Path, PathBuf};

use crate::config::ScanConfig;

/// How many leading bytes are read when looking for a shebang line.
const SHEBANG_PROBE_LEN: usize = 128;

/// A file selected for scanning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub absolute: PathBuf,
    /// `/`-prefixed path relative to the scan root, `/` separated.
    pub relative: String,
}

/// Walk `root` and return every file matching `extensions` (or carrying a
/// Lua shebang, when enabled), ordered by relative path.
pub fn discover(root: &Path, extensions: &[String], config: &ScanConfig) -> Vec<Candidate> {
    let mut builder = WalkBuilder::new(root);
    builder
        .hidden(false)
        .git_ignore(config.respect_gitignore)
        .git_global(config.respect_gitignore)
        .git_exclude(config.respect_gitignore)
        .ignore(config.respect_gitignore)
        .parents(config.respect_gitignore)
        .follow_links(config.follow_links)
        .require_git(false);

    let mut override_builder = OverrideBuilder::new(root);
    for pattern in &config.ignore_patterns {
        if let Err(e) = override_builder.add(&format!("!{pattern}")) {
            tracing::warn!(target: "scan", "invalid ignore pattern '{pattern}': {e}");
        }
    }
    match override_builder.build() {
        Ok(overrides) => {
            builder.overrides(overrides);
        }
        Err(e) => tracing::warn!(target: "scan", "ignore patterns not applied: {e}"),
    }

    let mut candidates: Vec<Candidate> = builder
        .build()
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry),
            Err(e) => {
                tracing::warn!(target: "scan", "skipping unreadable entry: {e}");
                None
            }
        })
        .filter(|entry| entry.file_type().is_some_and(|ft| ft.is_file()))
        .filter(|entry| {
            has_selected_suffix(entry.path(), extensions)
                || (config.include_shebang_scripts && has_lua_shebang(entry.path()))
        })
        .map(|entry| Candidate {
            relative: relative_path(root, entry.path()),
            absolute: entry.into_path(),
        })
        .collect();

    candidates.sort_by(|a, b| a.relative.cmp(&b.relative));
    tracing::debug!(target: "scan", "collected {} candidate files", candidates.len());
    candidates
}

/// True if the file name ends with one of `extensions` (e.g. `.lua`).
pub fn has_selected_suffix(path: &Path, extensions: &[String]) -> bool {
    let Some(name) = path.file_name().map(|n| n.to_string_lossy()) else {
        return false;
    };
    extensions.iter().any(|ext| name.ends_with(ext.as_str()))
}

/// True if the first line is a shebang naming a Lua interpreter.
pub fn has_lua_shebang(path: &Path) -> bool {
    let mut head = Vec::with_capacity(SHEBANG_PROBE_LEN);
    let read = File::open(path)
        .and_then(|file| file.take(SHEBANG_PROBE_LEN as u64).read_to_end(&mut head));
    if read.is_err() {
        return false;
    }

    let Some(rest) = head.strip_prefix(b"#!") else {
        return false;
    };
    let first_line = rest.split(|&b| b == b'\n').next().unwrap_or_default();
    String::from_utf8_lossy(first_line).contains("lua")
}

/// `/`-prefixed, `/`-separated path of `path` below `root`.
pub fn relative_path(root: &Path, path: &Path) -> String {
    let stripped = path.strip_prefix(root).unwrap_or(path);
    let mut relative = String::new();
    for component in stripped.components() {
        if let Component::Normal(part) = component {
            relative.push('/');
            relative.push_str(&part.to_string_lossy());
        }
    }
    if relative.is_empty() {
        relative.push('/');
    }
    relative
}
