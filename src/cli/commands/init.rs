//! Init and Config commands.

use anyhow::{Context, anyhow};
use std::path::Path;

use crate::config::Settings;

/// Run init command - create configuration file in `dir`.
pub fn run_init(dir: &Path, force: bool) -> anyhow::Result<()> {
    let path = Settings::init_config_file(dir, force)
        .map_err(|e| anyhow!("{e}"))
        .context("Could not initialize configuration")?;

    println!("Created configuration file at: {}", path.display());
    println!("Edit this file to customize your settings.");
    Ok(())
}

/// Run config command - display current configuration.
pub fn run_config(config: &Settings) -> anyhow::Result<()> {
    let toml_str =
        toml::to_string_pretty(config).context("Could not render configuration as TOML")?;
    println!("Current Configuration:");
    println!("{}", "=".repeat(50));
    println!("{toml_str}");
    Ok(())
}
