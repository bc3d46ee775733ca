//! Persisted scan artifact.
//!
//! The artifact doubles as the incremental cache: a later scan of the same
//! root loads it, keeps entries whose content hash still matches and
//! re-extracts the rest. Every map is keyed by root-relative path.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io::{BufWriter, Write};
use std::path::Path;

use super::error::{CacheError, CacheResult};
use super::graph::CallNetwork;
use crate::types::{CallGraphMap, FileFingerprint, FileStatus, RequireList};

/// Bumped whenever the on-disk layout changes.
pub const CACHE_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanCache {
    pub version: u32,
    /// Seconds since the Unix epoch when the scan finished.
    pub scanned_at: u64,
    pub file_hashes: BTreeMap<String, FileFingerprint>,
    pub file_status: BTreeMap<String, FileStatus>,
    pub call_graph: CallGraphMap,
    pub requires: BTreeMap<String, RequireList>,
    pub call_network: CallNetwork,
}

impl Default for ScanCache {
    fn default() -> Self {
        Self {
            version: CACHE_VERSION,
            scanned_at: 0,
            file_hashes: BTreeMap::new(),
            file_status: BTreeMap::new(),
            call_graph: CallGraphMap::new(),
            requires: BTreeMap::new(),
            call_network: CallNetwork::new(),
        }
    }
}

#[derive(Deserialize)]
struct VersionProbe {
    version: u32,
}

impl ScanCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load an artifact. `Ok(None)` if nothing exists at `path`.
    pub fn load(path: &Path) -> CacheResult<Option<Self>> {
        if !path.exists() {
            return Ok(None);
        }

        let json = fs::read_to_string(path).map_err(|source| CacheError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        let probe: VersionProbe = serde_json::from_str(&json).map_err(|source| CacheError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        if probe.version != CACHE_VERSION {
            return Err(CacheError::Version {
                path: path.to_path_buf(),
                found: probe.version,
                expected: CACHE_VERSION,
            });
        }

        let cache: Self = serde_json::from_str(&json).map_err(|source| CacheError::Parse {
            path: path.to_path_buf(),
            source,
        })?;

        tracing::debug!(
            target: "cache",
            "loaded {} ({} files, {} nodes)",
            path.display(),
            cache.file_hashes.len(),
            cache.call_network.node_count()
        );
        Ok(Some(cache))
    }

    /// Write the artifact atomically: temp file in the destination directory,
    /// then rename over `path`.
    pub fn save(&self, path: &Path) -> CacheResult<()> {
        let write_err = |source| CacheError::Write {
            path: path.to_path_buf(),
            source,
        };

        let parent = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        fs::create_dir_all(parent).map_err(write_err)?;

        let mut temp = tempfile::NamedTempFile::new_in(parent).map_err(write_err)?;
        {
            let mut writer = BufWriter::new(temp.as_file_mut());
            serde_json::to_writer(&mut writer, self).map_err(CacheError::Serialize)?;
            writer.flush().map_err(write_err)?;
        }
        temp.persist(path).map_err(|e| write_err(e.error))?;

        tracing::debug!(target: "cache", "saved {}", path.display());
        Ok(())
    }
}
