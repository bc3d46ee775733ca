//! Scan command - extract and link a Lua source tree.

use anyhow::Context;
use indicatif::{ProgressBar, ProgressStyle};
use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use crate::config::Settings;
use crate::scan::{
    CancelToken, ScanError, ScanObserver, ScanOutcome, ScanPhase, ScanRequest, Scanner,
};
use crate::types::FileScanRecord;

const TEMPLATE_SCAN: &str = "{spinner} {msg:<12} [{bar:30}] {pos}/{len} files ({percent}%) - {eta}";

/// Arguments for the scan command.
pub struct ScanArgs {
    pub root: PathBuf,
    pub extensions: Vec<String>,
    pub output: Option<PathBuf>,
    pub incremental: bool,
    pub no_parallel: bool,
    pub threads: Option<usize>,
    pub lenient: bool,
    pub progress: bool,
}

/// Run the scan command.
pub fn run(args: ScanArgs, settings: &Settings) -> anyhow::Result<ExitCode> {
    let mut config = settings.scan.clone();
    if let Some(threads) = args.threads {
        config.parallel_threads = threads.max(1);
    }
    if args.lenient {
        config.strict_syntax = false;
    }

    let mut request = ScanRequest::from_config(&args.root, &config);
    if !args.extensions.is_empty() {
        request.extensions = normalize_extensions(&args.extensions);
    }
    if let Some(output) = args.output {
        request.artifact = Some(output);
    }
    request.incremental |= args.incremental;
    if args.no_parallel {
        request.parallel = false;
    }

    tracing::debug!(target: "scan", "request: {request:?}");

    let observer = ProgressObserver::new(args.progress);
    let scanner = Scanner::new(config);

    match scanner.scan_with(&request, &observer, &CancelToken::new()) {
        Ok(outcome) => {
            observer.finish();
            print_summary(&outcome, request.artifact.as_deref());
            Ok(ExitCode::SUCCESS)
        }
        Err(ScanError::PersistFailure {
            path,
            source,
            outcome,
        }) => {
            observer.finish();
            print_summary(&outcome, None);
            Err(source).with_context(|| {
                format!("Scan finished but '{}' was not written", path.display())
            })
        }
        Err(e) => {
            observer.finish();
            Err(e.into())
        }
    }
}

/// Accept `lua` as well as `.lua`.
fn normalize_extensions(extensions: &[String]) -> Vec<String> {
    extensions
        .iter()
        .map(|ext| ext.trim())
        .filter(|ext| !ext.is_empty())
        .map(|ext| {
            if ext.starts_with('.') {
                ext.to_string()
            } else {
                format!(".{ext}")
            }
        })
        .collect()
}

fn print_summary(outcome: &ScanOutcome, artifact: Option<&Path>) {
    let counts = outcome.status_counts();
    let summary: Vec<String> = counts
        .iter()
        .map(|(status, count)| format!("{count} {status}"))
        .collect();

    println!(
        "Scanned {} files ({}){}",
        outcome.records.len(),
        if summary.is_empty() {
            "none".to_string()
        } else {
            summary.join(", ")
        },
        if outcome.reused > 0 {
            format!(", {} unchanged", outcome.reused)
        } else {
            String::new()
        }
    );
    println!(
        "Call network: {} nodes, {} edges",
        outcome.network.node_count(),
        outcome.network.edge_count()
    );

    for record in outcome.failures() {
        println!("  {}: {}", record.relative_path, record.status);
    }

    if outcome.cancelled {
        println!("Scan cancelled; artifact not written");
    } else if let Some(path) = artifact {
        println!("Artifact written to {}", path.display());
    }
}

/// Streams scan progress to an indicatif bar on stderr.
struct ProgressObserver {
    bar: ProgressBar,
}

impl ProgressObserver {
    fn new(enabled: bool) -> Self {
        let bar = if enabled && std::io::stderr().is_terminal() {
            let style = ProgressStyle::with_template(TEMPLATE_SCAN)
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("=> ");
            ProgressBar::new(0).with_style(style)
        } else {
            ProgressBar::hidden()
        };
        Self { bar }
    }

    fn finish(&self) {
        if !self.bar.is_finished() {
            self.bar.finish_and_clear();
        }
    }
}

impl ScanObserver for ProgressObserver {
    fn on_phase(&self, phase: ScanPhase, total: usize) {
        match phase {
            ScanPhase::Filtering => self.bar.set_length(total as u64),
            ScanPhase::Done => self.bar.finish_with_message(phase.to_string()),
            ScanPhase::Cancelled => self.bar.abandon_with_message(phase.to_string()),
            ScanPhase::Collecting
            | ScanPhase::Dispatching
            | ScanPhase::Aggregating
            | ScanPhase::Persisting => {}
        }
        self.bar.set_message(phase.to_string());
    }

    fn on_file(&self, record: &FileScanRecord) {
        self.bar.inc(1);
        if !record.status.is_success() {
            self.bar.println(format!("{}: {}", record.relative_path, record.status));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_extensions() {
        let raw = vec!["lua".to_string(), " .luac".to_string(), String::new()];
        assert_eq!(normalize_extensions(&raw), vec![".lua", ".luac"]);
    }
}
