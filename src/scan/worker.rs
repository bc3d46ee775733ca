//! Dispatching stage: run ingestion and extraction for every job, either on
//! a single worker thread or on a fixed pool of them.
//!
//! Workers only see read-only job data and hand back owned [`FileResult`]s
//! over a bounded channel. The caller's `on_result` closure runs on the
//! calling thread and is the single place results are merged.

use crossbeam_channel::{Receiver, Sender, bounded};
use encoding_rs::Encoding;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::path::PathBuf;
use std::thread;

use super::CancelToken;
use crate::ingest::ingest;
use crate::parsing::{CallGraphExtractor, EXTRACT_STACK_SIZE, Extraction};
use crate::types::{FileFingerprint, FileStatus};

/// One file to ingest and extract.
#[derive(Debug, Clone)]
pub struct Job {
    pub relative: String,
    pub absolute: PathBuf,
    /// Encoding that already decoded this file during filtering.
    pub hint: Option<&'static Encoding>,
    pub fingerprint: FileFingerprint,
}

/// Owned outcome of one job.
#[derive(Debug)]
pub struct FileResult {
    pub job: Job,
    pub outcome: Result<Extraction, FileStatus>,
}

/// Extraction settings shared by every worker.
#[derive(Debug, Clone, Copy)]
pub struct WorkerOptions {
    pub threads: usize,
    pub channel_size: usize,
    pub strict_syntax: bool,
}

/// Per-thread extraction state. Rebuilt after a panic.
struct WorkerState {
    strict_syntax: bool,
    extractor: Option<CallGraphExtractor>,
}

impl WorkerState {
    fn new(strict_syntax: bool) -> Self {
        Self {
            strict_syntax,
            extractor: Self::build(strict_syntax),
        }
    }

    fn build(strict_syntax: bool) -> Option<CallGraphExtractor> {
        match CallGraphExtractor::new(strict_syntax) {
            Ok(extractor) => Some(extractor),
            Err(e) => {
                tracing::error!(target: "extract", "cannot create Lua parser: {e}");
                None
            }
        }
    }

    fn run(&mut self, job: Job) -> FileResult {
        let outcome = match catch_unwind(AssertUnwindSafe(|| self.process(&job))) {
            Ok(outcome) => outcome,
            Err(_) => {
                tracing::error!(target: "scan", "worker panicked on {}", job.relative);
                self.extractor = Self::build(self.strict_syntax);
                Err(FileStatus::Unknown)
            }
        };
        FileResult { job, outcome }
    }

    fn process(&mut self, job: &Job) -> Result<Extraction, FileStatus> {
        let source = ingest(&job.absolute, job.hint).into_result().map_err(|reason| {
            tracing::debug!(target: "ingest", "skipping {}: {reason}", job.relative);
            reason.status()
        })?;

        let extractor = self.extractor.as_mut().ok_or(FileStatus::ExtractionError)?;
        extractor.extract_source(&source.text).map_err(|e| {
            tracing::debug!(target: "extract", "{}: {e}", job.relative);
            e.status()
        })
    }
}

/// Process `jobs` one at a time, in order.
///
/// Extraction still runs on a single worker thread so that deep syntax trees
/// get [`EXTRACT_STACK_SIZE`] of stack whatever thread the caller is on.
/// Returns `true` if the scan was cancelled before every job ran.
pub fn dispatch_sequential(
    jobs: Vec<Job>,
    strict_syntax: bool,
    cancel: &CancelToken,
    on_result: impl FnMut(FileResult),
) -> bool {
    let options = WorkerOptions {
        threads: 1,
        channel_size: 1,
        strict_syntax,
    };
    dispatch_parallel(jobs, options, cancel, on_result)
}

/// Process `jobs` on `min(threads, jobs)` worker threads.
///
/// A feeder thread pushes jobs into a bounded channel; results are handed to
/// `on_result` on the calling thread as they complete. Returns `true` if the
/// scan was cancelled.
pub fn dispatch_parallel(
    jobs: Vec<Job>,
    options: WorkerOptions,
    cancel: &CancelToken,
    mut on_result: impl FnMut(FileResult),
) -> bool {
    if jobs.is_empty() {
        return cancel.is_cancelled();
    }
    let workers = options.threads.min(jobs.len()).max(1);
    let capacity = options.channel_size.max(1);
    tracing::debug!(
        target: "scan",
        "dispatching {} jobs to {workers} workers",
        jobs.len()
    );

    let mut cancelled = false;
    thread::scope(|s| {
        let (job_tx, job_rx) = bounded::<Job>(capacity);
        let (result_tx, result_rx) = bounded::<FileResult>(capacity);

        let mut spawned = 0;
        for id in 0..workers {
            let rx = job_rx.clone();
            let tx = result_tx.clone();
            let strict_syntax = options.strict_syntax;
            let handle = thread::Builder::new()
                .name(format!("luagraph-worker-{id}"))
                .stack_size(EXTRACT_STACK_SIZE)
                .spawn_scoped(s, move || work(rx, tx, strict_syntax));
            match handle {
                Ok(_) => spawned += 1,
                Err(e) => tracing::warn!(target: "scan", "cannot spawn worker {id}: {e}"),
            }
        }
        drop(job_rx);
        drop(result_tx);

        if spawned == 0 {
            tracing::warn!(target: "scan", "no worker threads, extracting on the calling thread");
            cancelled = run_inline(jobs, options.strict_syntax, cancel, &mut on_result);
            return;
        }

        s.spawn(move || feed(jobs, job_tx, cancel));

        for result in &result_rx {
            on_result(result);
            if cancel.is_cancelled() {
                cancelled = true;
                break;
            }
        }
        // Unblocks workers waiting to send, which in turn unblocks the feeder
        drop(result_rx);
    });

    cancelled || cancel.is_cancelled()
}

/// Last resort when no worker thread could be started.
fn run_inline(
    jobs: Vec<Job>,
    strict_syntax: bool,
    cancel: &CancelToken,
    on_result: &mut impl FnMut(FileResult),
) -> bool {
    let mut state = WorkerState::new(strict_syntax);
    for job in jobs {
        if cancel.is_cancelled() {
            return true;
        }
        on_result(state.run(job));
    }
    cancel.is_cancelled()
}

fn feed(jobs: Vec<Job>, tx: Sender<Job>, cancel: &CancelToken) {
    for job in jobs {
        if cancel.is_cancelled() {
            break;
        }
        if tx.send(job).is_err() {
            break;
        }
    }
}

fn work(rx: Receiver<Job>, tx: Sender<FileResult>, strict_syntax: bool) {
    let mut state = WorkerState::new(strict_syntax);
    for job in rx {
        if tx.send(state.run(job)).is_err() {
            break;
        }
    }
}
