//! Layered configuration.
//!
//! Sources, lowest precedence first:
//! - Built-in defaults
//! - `.luagraph/settings.toml`, found by walking up from the current directory
//! - Environment variables
//! - CLI argument overrides (applied by the command handlers)
//!
//! # Environment Variables
//!
//! Environment variables must be prefixed with `LUAGRAPH_` and use double
//! underscores to separate nested levels:
//! - `LUAGRAPH_SCAN__PARALLEL_THREADS=8` sets `scan.parallel_threads`
//! - `LUAGRAPH_SCAN__STRICT_SYNTAX=false` sets `scan.strict_syntax`
//! - `LUAGRAPH_LOGGING__DEFAULT=debug` sets `logging.default`

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Directory holding the settings file and, by default, the scan artifact.
pub const CONFIG_DIR: &str = ".luagraph";
const SETTINGS_FILE: &str = "settings.toml";
const ENV_PREFIX: &str = "LUAGRAPH_";

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct Settings {
    /// Version of the configuration schema
    #[serde(default = "default_version")]
    pub version: u32,

    #[serde(default)]
    pub scan: ScanConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct ScanConfig {
    /// File name suffixes selected for scanning, matched in order
    #[serde(default = "default_extensions")]
    pub extensions: Vec<String>,

    /// Dispatch extraction to a worker pool
    #[serde(default = "default_true")]
    pub parallel: bool,

    /// Reuse unchanged entries from the previous artifact
    #[serde(default = "default_false")]
    pub incremental: bool,

    /// Below this many files to process, extraction stays sequential
    #[serde(default = "default_parallel_threshold")]
    pub parallel_threshold: usize,

    /// Worker threads for parallel extraction
    #[serde(default = "default_parallel_threads")]
    pub parallel_threads: usize,

    /// Capacity of the job and result channels
    #[serde(default = "default_channel_size")]
    pub channel_size: usize,

    /// Treat recovered parse errors as a failed file
    #[serde(default = "default_true")]
    pub strict_syntax: bool,

    /// Also scan extension-less scripts starting with a Lua shebang
    #[serde(default = "default_true")]
    pub include_shebang_scripts: bool,

    /// Skip files excluded by .gitignore and friends
    #[serde(default = "default_false")]
    pub respect_gitignore: bool,

    #[serde(default = "default_false")]
    pub follow_links: bool,

    /// Glob patterns excluded from the walk
    #[serde(default)]
    pub ignore_patterns: Vec<String>,

    /// Where `scan` writes its artifact when `-o` is not given
    #[serde(default = "default_artifact_path")]
    pub artifact_path: PathBuf,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct LoggingConfig {
    /// Level for every target without an explicit entry
    #[serde(default = "default_log_level")]
    pub default: String,

    /// Per-target levels, e.g. `scan = "debug"`
    #[serde(default)]
    pub modules: BTreeMap<String, String>,
}

// Default value functions
fn default_version() -> u32 {
    1
}
fn default_true() -> bool {
    true
}
fn default_false() -> bool {
    false
}
fn default_extensions() -> Vec<String> {
    vec![".lua".to_string()]
}
fn default_parallel_threshold() -> usize {
    16
}
fn default_parallel_threads() -> usize {
    num_cpus::get()
}
fn default_channel_size() -> usize {
    256
}
fn default_artifact_path() -> PathBuf {
    PathBuf::from(CONFIG_DIR).join("graph.json")
}
fn default_log_level() -> String {
    "warn".to_string()
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            version: default_version(),
            scan: ScanConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            extensions: default_extensions(),
            parallel: true,
            incremental: false,
            parallel_threshold: default_parallel_threshold(),
            parallel_threads: default_parallel_threads(),
            channel_size: default_channel_size(),
            strict_syntax: true,
            include_shebang_scripts: true,
            respect_gitignore: false,
            follow_links: false,
            ignore_patterns: vec![".git/**".to_string(), CONFIG_DIR.to_string() + "/**"],
            artifact_path: default_artifact_path(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            default: default_log_level(),
            modules: BTreeMap::new(),
        }
    }
}

impl Settings {
    /// Load configuration from all sources
    pub fn load() -> Result<Self, Box<figment::Error>> {
        let config_path = Self::find_workspace_config()
            .unwrap_or_else(|| PathBuf::from(CONFIG_DIR).join(SETTINGS_FILE));
        Self::load_from(config_path)
    }

    /// Load configuration using a specific settings file
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self, Box<figment::Error>> {
        Figment::new()
            .merge(Serialized::defaults(Settings::default()))
            .merge(Toml::file(path.as_ref()))
            // Double underscore separates nesting levels; single underscores
            // stay inside field names
            .merge(Env::prefixed(ENV_PREFIX).map(|key| {
                key.as_str().to_lowercase().replace("__", ".").into()
            }))
            .extract()
            .map_err(Box::new)
    }

    /// Find the settings file by looking for a `.luagraph` directory,
    /// from the current directory up to the filesystem root
    pub fn find_workspace_config() -> Option<PathBuf> {
        let current = std::env::current_dir().ok()?;

        current
            .ancestors()
            .map(|ancestor| ancestor.join(CONFIG_DIR))
            .find(|dir| dir.is_dir())
            .map(|dir| dir.join(SETTINGS_FILE))
    }

    /// Save current configuration to file
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), Box<dyn std::error::Error>> {
        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let toml_string = toml::to_string_pretty(self)?;
        std::fs::write(path, toml_string)?;

        Ok(())
    }

    /// Write a default settings file under `dir/.luagraph/`
    pub fn init_config_file(
        dir: &Path,
        force: bool,
    ) -> Result<PathBuf, Box<dyn std::error::Error>> {
        let config_path = dir.join(CONFIG_DIR).join(SETTINGS_FILE);

        if !force && config_path.exists() {
            return Err("Configuration file already exists. Use --force to overwrite".into());
        }

        Settings::default().save(&config_path)?;
        Ok(config_path)
    }
}
