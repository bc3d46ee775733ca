use anyhow::anyhow;
use clap::Parser;
use std::process::ExitCode;

use luagraph::Settings;
use luagraph::cli::commands::{init, query, scan};
use luagraph::cli::{Cli, Commands};
use luagraph::logging;

fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();

    // Configuration errors are fatal only when a file was named explicitly
    let settings = match &cli.config {
        Some(path) => Settings::load_from(path)
            .map_err(|e| anyhow!("Configuration error in '{}': {e}", path.display()))?,
        None => Settings::load().unwrap_or_else(|e| {
            eprintln!("Configuration error: {e}");
            eprintln!("Using default configuration for now.");
            Settings::default()
        }),
    };

    logging::init_with_config(&settings.logging);

    match cli.command {
        Commands::Init { force } => {
            let dir = std::env::current_dir()?;
            init::run_init(&dir, force)?;
            Ok(ExitCode::SUCCESS)
        }

        Commands::Config => {
            init::run_config(&settings)?;
            Ok(ExitCode::SUCCESS)
        }

        Commands::Scan {
            root,
            extensions,
            output,
            incremental,
            no_parallel,
            threads,
            lenient,
            no_progress,
        } => scan::run(
            scan::ScanArgs {
                root,
                extensions,
                output,
                incremental,
                no_parallel,
                threads,
                lenient,
                progress: !no_progress,
            },
            &settings,
        ),

        Commands::Query {
            artifact,
            json,
            query: kind,
        } => query::run(&artifact, json, &kind),
    }
}
