//! Scan orchestration
//!
//! ```text
//! COLLECT → FILTER → DISPATCH → AGGREGATE → PERSIST
//!    │         │         │           │           │
//!    ▼         ▼         ▼           ▼           ▼
//! [paths] [hash+probe] [workers] [link once]  artifact
//! ```
//!
//! - **COLLECT**: walk the root, keep files with a selected suffix or a Lua shebang
//! - **FILTER**: hash each file; reuse unchanged cache entries; reject bytecode
//!   and undecodable files
//! - **DISPATCH**: ingest + extract, sequentially or on a worker pool
//! - **AGGREGATE**: single-threaded; links each result into the network as it arrives
//! - **PERSIST**: one atomic write of the artifact
//!
//! The network is always rebuilt from empty. Unchanged files are linked from
//! their cached entry instead of being parsed again, so deleted files drop out
//! and an incremental scan yields the same network as a full one.

pub mod discover;
pub mod filter;
pub mod worker;

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;
use thiserror::Error;

use crate::config::ScanConfig;
use crate::linker::{self, LinkUnit};
use crate::storage::{CacheError, CallNetwork, ScanCache};
use crate::types::{
    CallGraphEntry, CallGraphMap, FileFingerprint, FileScanRecord, FileStatus, RequireList,
};
use discover::{Candidate, discover};
use worker::{FileResult, Job, WorkerOptions, dispatch_parallel, dispatch_sequential};

/// Cooperative cancellation flag, cheap to clone and share.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScanPhase {
    Collecting,
    Filtering,
    Dispatching,
    Aggregating,
    Persisting,
    Done,
    Cancelled,
}

impl fmt::Display for ScanPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Collecting => "collecting",
            Self::Filtering => "filtering",
            Self::Dispatching => "dispatching",
            Self::Aggregating => "aggregating",
            Self::Persisting => "persisting",
            Self::Done => "done",
            Self::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

/// Progress sink. Called only from the thread running the scan.
pub trait ScanObserver {
    /// A phase started. `total` is the number of files it will handle.
    fn on_phase(&self, _phase: ScanPhase, _total: usize) {}

    /// A file reached its final status.
    fn on_file(&self, _record: &FileScanRecord) {}
}

/// Observer that ignores every event.
pub struct NoopObserver;

impl ScanObserver for NoopObserver {}

/// What to scan and how.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanRequest {
    pub root: PathBuf,
    /// File name suffixes, e.g. `.lua`
    pub extensions: Vec<String>,
    pub incremental: bool,
    pub parallel: bool,
    /// Artifact to load (incremental) and write. Nothing is persisted when `None`.
    pub artifact: Option<PathBuf>,
}

impl ScanRequest {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            extensions: vec![".lua".to_string()],
            incremental: false,
            parallel: true,
            artifact: None,
        }
    }

    /// Request built from the `[scan]` settings.
    pub fn from_config(root: impl Into<PathBuf>, config: &ScanConfig) -> Self {
        Self {
            root: root.into(),
            extensions: config.extensions.clone(),
            incremental: config.incremental,
            parallel: config.parallel,
            artifact: Some(config.artifact_path.clone()),
        }
    }

    pub fn with_extensions<I, S>(mut self, extensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.extensions = extensions.into_iter().map(Into::into).collect();
        self
    }

    pub fn incremental(mut self, incremental: bool) -> Self {
        self.incremental = incremental;
        self
    }

    pub fn parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    pub fn artifact(mut self, path: impl Into<PathBuf>) -> Self {
        self.artifact = Some(path.into());
        self
    }
}

/// Everything a scan produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanOutcome {
    /// Entries of successfully extracted files, by relative path.
    pub call_graph: CallGraphMap,
    pub requires: BTreeMap<String, RequireList>,
    pub network: CallNetwork,
    /// One record per collected file, ordered by relative path.
    pub records: Vec<FileScanRecord>,
    /// Files taken from the previous artifact without reprocessing.
    pub reused: usize,
    pub cancelled: bool,
}

impl ScanOutcome {
    pub fn status_of(&self, relative_path: &str) -> Option<FileStatus> {
        self.records
            .binary_search_by(|record| record.relative_path.as_str().cmp(relative_path))
            .ok()
            .map(|idx| self.records[idx].status)
    }

    pub fn status_counts(&self) -> BTreeMap<FileStatus, usize> {
        let mut counts = BTreeMap::new();
        for record in &self.records {
            *counts.entry(record.status).or_insert(0) += 1;
        }
        counts
    }

    pub fn failures(&self) -> impl Iterator<Item = &FileScanRecord> {
        self.records.iter().filter(|record| !record.status.is_success())
    }

    /// Artifact form of this outcome.
    pub fn to_cache(&self) -> ScanCache {
        let mut cache = ScanCache::new();
        cache.scanned_at = chrono::Utc::now().timestamp().max(0) as u64;
        for record in &self.records {
            cache
                .file_status
                .insert(record.relative_path.clone(), record.status);
            if let Some(hash) = &record.content_hash {
                cache.file_hashes.insert(
                    record.relative_path.clone(),
                    FileFingerprint {
                        hash: hash.clone(),
                        mtime: record.modified_time.unwrap_or(0),
                    },
                );
            }
        }
        cache.call_graph = self.call_graph.clone();
        cache.requires = self.requires.clone();
        cache.call_network = self.network.clone();
        cache
    }
}

#[derive(Error, Debug)]
pub enum ScanError {
    #[error("Scan root '{path}' not found or not a directory")]
    RootNotFound {
        path: PathBuf,
        #[source]
        source: Option<std::io::Error>,
    },

    /// The scan completed but the artifact could not be written. The
    /// computed outcome is still available.
    #[error("Failed to persist scan artifact '{path}': {source}")]
    PersistFailure {
        path: PathBuf,
        #[source]
        source: CacheError,
        outcome: Box<ScanOutcome>,
    },
}

impl ScanError {
    /// The computed outcome, if the scan got that far.
    pub fn into_outcome(self) -> Option<ScanOutcome> {
        match self {
            Self::RootNotFound { .. } => None,
            Self::PersistFailure { outcome, .. } => Some(*outcome),
        }
    }
}

pub type ScanResult<T> = Result<T, ScanError>;

/// Runs scans with one set of `[scan]` settings.
pub struct Scanner {
    config: ScanConfig,
}

impl Scanner {
    pub fn new(config: ScanConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ScanConfig {
        &self.config
    }

    /// Scan without progress reporting or cancellation.
    pub fn scan(&self, request: &ScanRequest) -> ScanResult<ScanOutcome> {
        self.scan_with(request, &NoopObserver, &CancelToken::new())
    }

    pub fn scan_with(
        &self,
        request: &ScanRequest,
        observer: &dyn ScanObserver,
        cancel: &CancelToken,
    ) -> ScanResult<ScanOutcome> {
        let start = Instant::now();
        let root = canonical_root(&request.root)?;

        observer.on_phase(ScanPhase::Collecting, 0);
        let candidates = discover(&root, &request.extensions, &self.config);
        if cancel.is_cancelled() {
            return Ok(self.finish_cancelled(Aggregate::default(), observer));
        }

        let previous = if request.incremental {
            request.artifact.as_deref().and_then(load_previous)
        } else {
            None
        };

        observer.on_phase(ScanPhase::Filtering, candidates.len());
        let mut aggregate = Aggregate::default();
        let mut jobs = Vec::new();
        for candidate in candidates {
            if cancel.is_cancelled() {
                return Ok(self.finish_cancelled(aggregate, observer));
            }
            if let Some(job) = self.filter(candidate, previous.as_ref(), &mut aggregate, observer) {
                jobs.push(job);
            }
        }

        observer.on_phase(ScanPhase::Dispatching, jobs.len());
        let use_pool = request.parallel && jobs.len() > self.config.parallel_threshold;
        let on_result = |result: FileResult| {
            let record = aggregate.apply(result);
            observer.on_file(&record);
        };
        let cancelled = if use_pool {
            let options = WorkerOptions {
                threads: self.config.parallel_threads.max(1),
                channel_size: self.config.channel_size,
                strict_syntax: self.config.strict_syntax,
            };
            dispatch_parallel(jobs, options, cancel, on_result)
        } else {
            dispatch_sequential(jobs, self.config.strict_syntax, cancel, on_result)
        };
        if cancelled {
            return Ok(self.finish_cancelled(aggregate, observer));
        }

        observer.on_phase(ScanPhase::Aggregating, aggregate.records.len());
        let outcome = aggregate.into_outcome(false);

        if let Some(path) = &request.artifact {
            observer.on_phase(ScanPhase::Persisting, outcome.records.len());
            if let Err(source) = outcome.to_cache().save(path) {
                tracing::error!(target: "cache", "failed to persist {}: {source}", path.display());
                return Err(ScanError::PersistFailure {
                    path: path.clone(),
                    source,
                    outcome: Box::new(outcome),
                });
            }
        }

        observer.on_phase(ScanPhase::Done, outcome.records.len());
        tracing::info!(
            target: "scan",
            "scanned {} files ({} reused, {} failed) into {} nodes / {} edges in {:.2?}",
            outcome.records.len(),
            outcome.reused,
            outcome.failures().count(),
            outcome.network.node_count(),
            outcome.network.edge_count(),
            start.elapsed()
        );
        Ok(outcome)
    }

    /// Fingerprint, reuse or probe one candidate. Returns a job if the file
    /// still needs extraction.
    fn filter(
        &self,
        candidate: Candidate,
        previous: Option<&ScanCache>,
        aggregate: &mut Aggregate,
        observer: &dyn ScanObserver,
    ) -> Option<Job> {
        let probed = match filter::fingerprint(&candidate.absolute) {
            Ok(probed) => probed,
            Err(reason) => {
                tracing::debug!(target: "ingest", "skipping {}: {reason}", candidate.relative);
                let record = aggregate.record(&candidate.relative, None, reason.status());
                observer.on_file(&record);
                return None;
            }
        };
        let fingerprint = probed.fingerprint;

        if let Some(cache) = previous {
            if let Some(record) = aggregate.reuse(&candidate, &fingerprint, cache) {
                observer.on_file(&record);
                return None;
            }
        }

        match filter::classify(&probed.bytes) {
            Ok(encoding) => Some(Job {
                relative: candidate.relative,
                absolute: candidate.absolute,
                hint: Some(encoding),
                fingerprint,
            }),
            Err(reason) => {
                tracing::debug!(target: "ingest", "skipping {}: {reason}", candidate.relative);
                let record =
                    aggregate.record(&candidate.relative, Some(&fingerprint), reason.status());
                observer.on_file(&record);
                None
            }
        }
    }

    fn finish_cancelled(&self, aggregate: Aggregate, observer: &dyn ScanObserver) -> ScanOutcome {
        tracing::warn!(
            target: "scan",
            "scan cancelled after {} files",
            aggregate.records.len()
        );
        observer.on_phase(ScanPhase::Cancelled, aggregate.records.len());
        aggregate.into_outcome(true)
    }
}

fn canonical_root(root: &Path) -> ScanResult<PathBuf> {
    let canonical = root.canonicalize().map_err(|e| ScanError::RootNotFound {
        path: root.to_path_buf(),
        source: Some(e),
    })?;
    if !canonical.is_dir() {
        return Err(ScanError::RootNotFound {
            path: root.to_path_buf(),
            source: None,
        });
    }
    Ok(canonical)
}

fn load_previous(path: &Path) -> Option<ScanCache> {
    match ScanCache::load(path) {
        Ok(cache) => cache,
        Err(e) => {
            tracing::warn!(target: "cache", "ignoring previous artifact, running a full scan: {e}");
            None
        }
    }
}

/// Single-writer aggregation state.
#[derive(Default)]
struct Aggregate {
    network: CallNetwork,
    call_graph: CallGraphMap,
    requires: BTreeMap<String, RequireList>,
    records: BTreeMap<String, FileScanRecord>,
    reused: usize,
}

impl Aggregate {
    fn record(
        &mut self,
        relative: &str,
        fingerprint: Option<&FileFingerprint>,
        status: FileStatus,
    ) -> FileScanRecord {
        let record = FileScanRecord {
            relative_path: relative.to_string(),
            content_hash: fingerprint.map(|f| f.hash.clone()),
            modified_time: fingerprint.map(|f| f.mtime),
            status,
        };
        self.records.insert(relative.to_string(), record.clone());
        record
    }

    /// Carry an unchanged file over from `cache`. `None` if it must be reprocessed.
    fn reuse(
        &mut self,
        candidate: &Candidate,
        fingerprint: &FileFingerprint,
        cache: &ScanCache,
    ) -> Option<FileScanRecord> {
        let cached = cache.file_hashes.get(&candidate.relative)?;
        if cached.hash != fingerprint.hash {
            return None;
        }
        let status = *cache.file_status.get(&candidate.relative)?;
        if !status.is_content_derived() {
            return None;
        }

        if status.is_success() {
            let entry = cache.call_graph.get(&candidate.relative)?.clone();
            let requires = cache
                .requires
                .get(&candidate.relative)
                .cloned()
                .unwrap_or_default();
            self.link(candidate, entry, requires);
        }

        self.reused += 1;
        tracing::trace!(target: "scan", "reusing {}", candidate.relative);
        Some(self.record(&candidate.relative, Some(fingerprint), status))
    }

    fn apply(&mut self, result: FileResult) -> FileScanRecord {
        let FileResult { job, outcome } = result;
        match outcome {
            Ok(extraction) => {
                let candidate = Candidate {
                    absolute: job.absolute,
                    relative: job.relative,
                };
                self.link(&candidate, extraction.entry, extraction.requires);
                self.record(&candidate.relative, Some(&job.fingerprint), FileStatus::Success)
            }
            Err(status) => {
                // A file processed twice keeps only its latest result
                self.call_graph.remove(&job.relative);
                self.requires.remove(&job.relative);
                self.record(&job.relative, Some(&job.fingerprint), status)
            }
        }
    }

    fn link(&mut self, candidate: &Candidate, entry: CallGraphEntry, requires: RequireList) {
        linker::link(
            &mut self.network,
            &LinkUnit {
                relative_path: &candidate.relative,
                absolute_path: &candidate.absolute,
                entry: &entry,
                requires: &requires,
            },
        );
        self.call_graph.insert(candidate.relative.clone(), entry);
        self.requires.insert(candidate.relative.clone(), requires);
    }

    fn into_outcome(self, cancelled: bool) -> ScanOutcome {
        ScanOutcome {
            call_graph: self.call_graph,
            requires: self.requires,
            network: self.network,
            records: self.records.into_values().collect(),
            reused: self.reused,
            cancelled,
        }
    }
}
