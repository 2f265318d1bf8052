// src/cli.rs

//! CLI argument parsing using `clap`.

use std::path::PathBuf;

use clap::{Parser, ValueEnum};

use crate::config::default_config_path;

/// Command-line arguments for `flowexec`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "flowexec",
    version,
    about = "Run flows of queries concurrently and stream their logs and status.",
    long_about = None
)]
pub struct CliArgs {
    /// Path to the flows file (TOML). Defaults to `$FLOWEXEC_CONFIG`, then
    /// `Flows.toml`.
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Diagnostic logging level (error, warn, info, debug, trace).
    ///
    /// Overrides `FLOWEXEC_LOG`.
    #[arg(long, value_enum, value_name = "LEVEL")]
    pub log_level: Option<TraceLevel>,

    /// What to print on stdout.
    #[arg(long, value_enum, default_value = "messages")]
    pub output: OutputMode,

    /// Parse + validate and print the flows, but don't run anything.
    #[arg(long)]
    pub dry_run: bool,
}

/// Diagnostic log level as exposed on the CLI.
#[derive(Debug, Copy, Clone, ValueEnum)]
pub enum TraceLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, ValueEnum)]
pub enum OutputMode {
    /// Every outbound message as one JSON line.
    Messages,
    /// Only flow log records, one JSON line each.
    Logs,
}

impl CliArgs {
    pub fn config_path(&self) -> PathBuf {
        self.config.clone().unwrap_or_else(default_config_path)
    }
}

/// Convenience wrapper around `CliArgs::parse()`.
pub fn parse() -> CliArgs {
    CliArgs::parse()
}
