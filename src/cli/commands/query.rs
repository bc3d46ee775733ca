//! Query command - answer questions from a scan artifact.

use anyhow::{Context, anyhow};
use serde_json::json;
use std::path::Path;
use std::process::ExitCode;

use crate::cli::QueryKind;
use crate::cli::output::Envelope;
use crate::storage::ScanCache;
use crate::types::FileStatus;

/// Result of one query, before formatting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Answer {
    /// The subject is not a node of the network.
    NotFound(String),
    Names {
        subject: Option<String>,
        names: Vec<String>,
    },
    Ranked(Vec<(String, usize)>),
    Paths {
        paths: Vec<Vec<String>>,
        truncated: bool,
    },
    Exports {
        file: String,
        exports: Vec<String>,
        defines: Vec<String>,
    },
    Status(Vec<(String, FileStatus)>),
}

/// Run the query command.
pub fn run(artifact: &Path, json: bool, query: &QueryKind) -> anyhow::Result<ExitCode> {
    let cache = ScanCache::load(artifact)
        .with_context(|| format!("Failed to load artifact '{}'", artifact.display()))?
        .ok_or_else(|| {
            anyhow!(
                "No artifact at '{}'. Run 'luagraph scan' first.",
                artifact.display()
            )
        })?;

    tracing::debug!(
        target: "cache",
        "loaded {} nodes / {} edges from {}",
        cache.call_network.node_count(),
        cache.call_network.edge_count(),
        artifact.display()
    );

    let answer = answer(&cache, query);
    if json {
        print_json(query.name(), &answer)
    } else {
        Ok(print_text(&answer))
    }
}

/// Evaluate `query` against a loaded artifact.
pub fn answer(cache: &ScanCache, query: &QueryKind) -> Answer {
    let network = &cache.call_network;
    match query {
        QueryKind::Ancestors { symbol, no_files } | QueryKind::Descendants { symbol, no_files } => {
            let reached = if matches!(query, QueryKind::Ancestors { .. }) {
                network.ancestors(symbol)
            } else {
                network.descendants(symbol)
            };
            match reached {
                Some(set) => Answer::Names {
                    subject: Some(symbol.clone()),
                    names: set
                        .into_iter()
                        .filter(|name| !*no_files || !network.is_file(name))
                        .collect(),
                },
                None => Answer::NotFound(symbol.clone()),
            }
        }
        QueryKind::Callers { symbol } if network.contains(symbol) => Answer::Names {
            subject: Some(symbol.clone()),
            names: network.callers(symbol),
        },
        QueryKind::Callees { symbol } if network.contains(symbol) => Answer::Names {
            subject: Some(symbol.clone()),
            names: network.callees(symbol),
        },
        QueryKind::Callers { symbol } | QueryKind::Callees { symbol } => {
            Answer::NotFound(symbol.clone())
        }
        QueryKind::Entries => Answer::Names {
            subject: None,
            names: network.entry_points(),
        },
        QueryKind::Paths {
            from,
            to,
            max_depth,
            max_paths,
        } => {
            if !network.contains(from) {
                return Answer::NotFound(from.clone());
            }
            if !network.contains(to) {
                return Answer::NotFound(to.clone());
            }
            let paths = network.call_paths(from, to, *max_depth, *max_paths);
            let truncated = *max_paths > 0 && paths.len() >= *max_paths;
            Answer::Paths { paths, truncated }
        }
        QueryKind::Exports { file } if network.is_file(file) => Answer::Exports {
            file: file.clone(),
            exports: network.file_exports(file),
            defines: network.file_defines(file),
        },
        QueryKind::Exports { file } => Answer::NotFound(file.clone()),
        QueryKind::Top { limit } => Answer::Ranked(network.most_called(*limit)),
        QueryKind::Status { failures } => Answer::Status(
            cache
                .file_status
                .iter()
                .filter(|(_, status)| !*failures || !status.is_success())
                .map(|(path, status)| (path.clone(), *status))
                .collect(),
        ),
    }
}

fn print_text(answer: &Answer) -> ExitCode {
    match answer {
        Answer::NotFound(subject) => {
            eprintln!("'{subject}' is not in the call network");
            return ExitCode::from(3);
        }
        Answer::Names { names, .. } => {
            for name in names {
                println!("{name}");
            }
        }
        Answer::Ranked(ranked) => {
            for (name, calls) in ranked {
                println!("{calls:>6}  {name}");
            }
        }
        Answer::Paths { paths, truncated } => {
            for path in paths {
                println!("{}", path.join(" -> "));
            }
            if *truncated {
                eprintln!("(stopped after {} paths)", paths.len());
            }
        }
        Answer::Exports {
            exports, defines, ..
        } => {
            for name in exports {
                println!("export  {name}");
            }
            for name in defines {
                println!("define  {name}");
            }
        }
        Answer::Status(rows) => {
            for (path, status) in rows {
                println!("{status:<18} {path}");
            }
        }
    }
    ExitCode::SUCCESS
}

fn print_json(query: &str, answer: &Answer) -> anyhow::Result<ExitCode> {
    let envelope = match answer {
        Answer::NotFound(subject) => Envelope::not_found(query, subject),
        Answer::Names { subject, names } => {
            let envelope = Envelope::success(query, json!(names)).with_count(names.len());
            match subject {
                Some(subject) => envelope.with_subject(subject.as_str()),
                None => envelope,
            }
        }
        Answer::Ranked(ranked) => {
            let items: Vec<_> = ranked
                .iter()
                .map(|(name, calls)| json!({ "name": name, "calls": calls }))
                .collect();
            Envelope::success(query, json!(items)).with_count(ranked.len())
        }
        Answer::Paths { paths, truncated } => Envelope::success(query, json!(paths))
            .with_count(paths.len())
            .with_truncated(*truncated),
        Answer::Exports {
            file,
            exports,
            defines,
        } => Envelope::success(query, json!({ "exports": exports, "defines": defines }))
            .with_subject(file.as_str())
            .with_count(exports.len() + defines.len()),
        Answer::Status(rows) => {
            let items: Vec<_> = rows
                .iter()
                .map(|(path, status)| json!({ "path": path, "status": status }))
                .collect();
            Envelope::success(query, json!(items)).with_count(rows.len())
        }
    };

    println!("{}", envelope.to_json()?);
    Ok(envelope.process_exit_code())
}
