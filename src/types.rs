//! Core data model shared by the extractor, linker and scan cache.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

/// The function (or top level) a call expression sits in.
///
/// Persisted as a compact string: `[G]`, `[L]name` or `[X]name`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum ScopeTag {
    /// Calls made outside of any function body.
    Global,
    /// A block-local function (`local function name`).
    Local(String),
    /// A non-local function statement (`function a.b.c`), dotted name.
    Exported(String),
}

impl ScopeTag {
    const GLOBAL: &'static str = "[G]";
    const LOCAL_PREFIX: &'static str = "[L]";
    const EXPORTED_PREFIX: &'static str = "[X]";

    pub fn local(name: impl Into<String>) -> Self {
        Self::Local(name.into())
    }

    pub fn exported(name: impl Into<String>) -> Self {
        Self::Exported(name.into())
    }

    /// The function name carried by the tag, `None` for the top level.
    pub fn name(&self) -> Option<&str> {
        match self {
            Self::Global => None,
            Self::Local(name) | Self::Exported(name) => Some(name),
        }
    }
}

impl fmt::Display for ScopeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Global => f.write_str(Self::GLOBAL),
            Self::Local(name) => write!(f, "{}{name}", Self::LOCAL_PREFIX),
            Self::Exported(name) => write!(f, "{}{name}", Self::EXPORTED_PREFIX),
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[error("invalid scope tag: {0:?}")]
pub struct ParseScopeTagError(String);

impl FromStr for ScopeTag {
    type Err = ParseScopeTagError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == Self::GLOBAL {
            Ok(Self::Global)
        } else if let Some(name) = s.strip_prefix(Self::LOCAL_PREFIX) {
            Ok(Self::Local(name.to_string()))
        } else if let Some(name) = s.strip_prefix(Self::EXPORTED_PREFIX) {
            Ok(Self::Exported(name.to_string()))
        } else {
            Err(ParseScopeTagError(s.to_string()))
        }
    }
}

impl From<ScopeTag> for String {
    fn from(tag: ScopeTag) -> Self {
        tag.to_string()
    }
}

impl TryFrom<String> for ScopeTag {
    type Error = ParseScopeTagError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// Scope → callee names for one file. Sets keep callees deduplicated.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CallGraphEntry {
    scopes: BTreeMap<ScopeTag, BTreeSet<String>>,
}

impl CallGraphEntry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `scope` calls `callee`. Returns false if it was already known.
    pub fn record(&mut self, scope: ScopeTag, callee: impl Into<String>) -> bool {
        self.scopes.entry(scope).or_default().insert(callee.into())
    }

    pub fn callees(&self, scope: &ScopeTag) -> Option<&BTreeSet<String>> {
        self.scopes.get(scope)
    }

    pub fn scopes(&self) -> impl Iterator<Item = (&ScopeTag, &BTreeSet<String>)> {
        self.scopes.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.scopes.is_empty()
    }

    pub fn scope_count(&self) -> usize {
        self.scopes.len()
    }

    /// Total number of (scope, callee) pairs.
    pub fn call_count(&self) -> usize {
        self.scopes.values().map(BTreeSet::len).sum()
    }
}

impl FromIterator<(ScopeTag, String)> for CallGraphEntry {
    fn from_iter<I: IntoIterator<Item = (ScopeTag, String)>>(iter: I) -> Self {
        let mut entry = Self::new();
        for (scope, callee) in iter {
            entry.record(scope, callee);
        }
        entry
    }
}

/// Ordered string arguments of every `require(...)` call in a file.
pub type RequireList = Vec<String>;

/// Relative path → call graph entry, for every successfully extracted file.
pub type CallGraphMap = BTreeMap<String, CallGraphEntry>;

/// Outcome of processing one file during a scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileStatus {
    Success,
    Bytecode,
    EncodingFailure,
    SyntaxError,
    ExtractionError,
    IoError,
    PermissionError,
    Unknown,
}

impl FileStatus {
    pub fn is_success(self) -> bool {
        matches!(self, Self::Success)
    }

    /// Statuses that depend only on file content. A cached file with one of
    /// these and an unchanged hash does not need to be processed again.
    pub fn is_content_derived(self) -> bool {
        !matches!(self, Self::IoError | Self::PermissionError | Self::Unknown)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Bytecode => "bytecode",
            Self::EncodingFailure => "encoding_failure",
            Self::SyntaxError => "syntax_error",
            Self::ExtractionError => "extraction_error",
            Self::IoError => "io_error",
            Self::PermissionError => "permission_error",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for FileStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// Content fingerprint used for incremental pruning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileFingerprint {
    /// SHA-256 of the raw file bytes, lowercase hex.
    pub hash: String,
    /// Modification time, seconds since the Unix epoch.
    pub mtime: u64,
}

/// One processed file, as reported to observers and callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileScanRecord {
    pub relative_path: String,
    pub content_hash: Option<String>,
    pub modified_time: Option<u64>,
    pub status: FileStatus,
}
