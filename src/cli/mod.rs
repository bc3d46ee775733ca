//! Command-line interface: argument parsing and command handlers.

pub mod args;
pub mod commands;
pub mod output;

pub use args::{Cli, Commands, QueryKind};
