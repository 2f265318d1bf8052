// src/config/model.rs

use serde::Deserialize;

use crate::protocol::QuerySpec;

/// Top-level configuration as read from a TOML file.
///
/// ```toml
/// [executor]
/// log_batch_interval_ms = 200
///
/// [[flow]]
/// id = "F.demo"
/// cancel_after_ms = 1500
///
/// [[flow.query]]
/// name = "Heartbeat"
/// query = "repeat 5 log INFO beat {i}; sleep 5000"
/// ```
///
/// Every section is optional; `[executor]` falls back to its defaults.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawConfigFile {
    #[serde(default)]
    pub executor: ExecutorConfig,

    #[serde(default, rename = "flow")]
    pub flows: Vec<FlowConfig>,
}

/// Validated configuration. Only constructed through
/// `ConfigFile::try_from(RawConfigFile)`.
#[derive(Debug, Clone)]
pub struct ConfigFile {
    pub executor: ExecutorConfig,
    pub flows: Vec<FlowConfig>,
}

impl ConfigFile {
    pub(crate) fn new_unchecked(executor: ExecutorConfig, flows: Vec<FlowConfig>) -> Self {
        Self { executor, flows }
    }
}

/// `[executor]` section: channel sizes, batching thresholds and grace periods.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    /// Buffered inbound messages before `submit` waits.
    pub inbound_capacity: usize,
    /// Buffered outbound messages before flow emitters wait.
    pub outbound_capacity: usize,
    /// Flush a log batch once it holds this many lines.
    pub log_batch_max_rows: u64,
    /// Flush a log batch once its body reaches this many bytes.
    pub log_batch_max_bytes: usize,
    /// Flush a log batch this long after its first line.
    pub log_batch_interval_ms: u64,
    /// How long a query may keep running after cancellation before the
    /// executor stops waiting for it.
    pub cancel_grace_ms: u64,
    /// Upper bound on the best-effort drain at shutdown.
    pub shutdown_grace_ms: u64,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            inbound_capacity: 100,
            outbound_capacity: 1000,
            log_batch_max_rows: 100,
            log_batch_max_bytes: 64 * 1024,
            log_batch_interval_ms: 500,
            cancel_grace_ms: 10_000,
            shutdown_grace_ms: 5_000,
        }
    }
}

/// One `[[flow]]` entry.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct FlowConfig {
    /// Flow id; minted when omitted.
    #[serde(default)]
    pub id: Option<String>,

    /// Send a `Cancel` for this flow after this many milliseconds.
    #[serde(default)]
    pub cancel_after_ms: Option<u64>,

    #[serde(default, rename = "query")]
    pub queries: Vec<QuerySpec>,
}
