// src/logging.rs

//! Diagnostic logging for the `flowexec` binary.
//!
//! `--log-level` wins; otherwise `FLOWEXEC_LOG` is read as an
//! `EnvFilter` directive (`info`, `flowexec::session=debug,warn`, ...).
//! Without either, `info` is used.
//!
//! Output goes to STDERR. Flow log lines are protocol data and are
//! delivered through the outbound channel, never through `tracing`.

use anyhow::{Result, anyhow};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt;

use crate::cli::TraceLevel;

pub const LOG_ENV_VAR: &str = "FLOWEXEC_LOG";

/// Install the global subscriber. Call once at startup.
pub fn init_logging(cli_level: Option<TraceLevel>) -> Result<()> {
    let filter = match cli_level {
        Some(level) => EnvFilter::new(level.directive()),
        None => EnvFilter::try_from_env(LOG_ENV_VAR).unwrap_or_else(|_| EnvFilter::new("info")),
    };

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|e| anyhow!("failed to install tracing subscriber: {e}"))
}

impl TraceLevel {
    fn directive(self) -> &'static str {
        match self {
            TraceLevel::Error => "error",
            TraceLevel::Warn => "warn",
            TraceLevel::Info => "info",
            TraceLevel::Debug => "debug",
            TraceLevel::Trace => "trace",
        }
    }
}
