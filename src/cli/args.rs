//! CLI argument parsing using clap.

use clap::{
    Parser, Subcommand,
    builder::styling::{AnsiColor, Effects, Styles},
};
use std::path::PathBuf;

fn clap_cargo_style() -> Styles {
    Styles::styled()
        .header(AnsiColor::Cyan.on_default() | Effects::BOLD)
        .usage(AnsiColor::Cyan.on_default() | Effects::BOLD)
        .literal(AnsiColor::Green.on_default())
        .placeholder(AnsiColor::Green.on_default())
}

/// Static call-graph extraction for Lua source trees
#[derive(Parser)]
#[command(
    name = "luagraph",
    version = env!("CARGO_PKG_VERSION"),
    about = "Static call-graph extraction for Lua source trees",
    long_about = "Build a whole-program call graph from Lua sources without running them, then query it.",
    next_line_help = true,
    styles = clap_cargo_style(),
    after_help = "Quick Start:\n  $ luagraph init\n  $ luagraph scan ./firmware -o graph.json\n  $ luagraph query graph.json ancestors os.execute\n  $ luagraph query graph.json exports /lib/net.lua --json"
)]
pub struct Cli {
    /// Path to custom settings.toml file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands
#[derive(Subcommand)]
pub enum Commands {
    /// Initialize project
    #[command(about = "Set up .luagraph directory with default configuration")]
    Init {
        /// Force overwrite existing configuration
        #[arg(short, long)]
        force: bool,
    },

    /// Scan a directory tree and write the call-graph artifact
    #[command(
        about = "Extract and link the call graph of a Lua source tree",
        after_help = "Examples:\n  luagraph scan .\n  luagraph scan ./rom -e .lua,.luac -o rom.json\n  luagraph scan ./rom --incremental --threads 4"
    )]
    Scan {
        /// Root directory to scan
        #[arg(value_name = "ROOT")]
        root: PathBuf,

        /// File suffixes to scan, comma separated (overrides config)
        #[arg(short, long, value_delimiter = ',')]
        extensions: Vec<String>,

        /// Artifact path (overrides config)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Reuse unchanged entries from the existing artifact
        #[arg(long)]
        incremental: bool,

        /// Extract on the calling thread only
        #[arg(long)]
        no_parallel: bool,

        /// Number of worker threads (overrides config)
        #[arg(short, long)]
        threads: Option<usize>,

        /// Walk error-recovered syntax trees instead of rejecting the file
        #[arg(long)]
        lenient: bool,

        /// Disable the progress bar
        #[arg(long)]
        no_progress: bool,
    },

    /// Query a scan artifact
    #[command(
        about = "Query callers, callees, reachability and exports",
        after_help = "Examples:\n  luagraph query graph.json ancestors os.execute\n  luagraph query graph.json paths app.main.1a2b3c4d io.popen --max-depth 6\n  luagraph query graph.json top --limit 10 --json\n  luagraph query graph.json status --failures"
    )]
    Query {
        /// Artifact written by `scan`
        #[arg(value_name = "ARTIFACT")]
        artifact: PathBuf,

        /// Output in JSON format
        #[arg(long, global = true)]
        json: bool,

        #[command(subcommand)]
        query: QueryKind,
    },

    /// Show current configuration settings
    #[command(about = "Display active settings from .luagraph/settings.toml")]
    Config,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum QueryKind {
    /// Every node with a path to SYMBOL
    Ancestors {
        symbol: String,

        /// Leave file nodes out of the result
        #[arg(long)]
        no_files: bool,
    },

    /// Every node reachable from SYMBOL
    Descendants {
        symbol: String,

        /// Leave file nodes out of the result
        #[arg(long)]
        no_files: bool,
    },

    /// Direct callers of SYMBOL
    Callers { symbol: String },

    /// Direct callees of SYMBOL
    Callees { symbol: String },

    /// Functions nothing calls
    Entries,

    /// Call paths between two nodes
    Paths {
        from: String,
        to: String,

        /// Maximum number of edges per path
        #[arg(long, default_value_t = 8)]
        max_depth: usize,

        /// Stop after this many paths
        #[arg(long, default_value_t = 20)]
        max_paths: usize,
    },

    /// Functions a file exports and defines
    Exports {
        /// Relative file path as stored in the artifact, e.g. /lib/util.lua
        file: String,
    },

    /// Most called functions
    Top {
        #[arg(short, long, default_value_t = 20)]
        limit: usize,
    },

    /// Per-file scan status
    Status {
        /// Only list files that were not extracted
        #[arg(long)]
        failures: bool,
    },
}

impl QueryKind {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Ancestors { .. } => "ancestors",
            Self::Descendants { .. } => "descendants",
            Self::Callers { .. } => "callers",
            Self::Callees { .. } => "callees",
            Self::Entries => "entries",
            Self::Paths { .. } => "paths",
            Self::Exports { .. } => "exports",
            Self::Top { .. } => "top",
            Self::Status { .. } => "status",
        }
    }
}
