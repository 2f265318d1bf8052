// src/config/validate.rs

use std::collections::HashSet;

use crate::config::model::{ConfigFile, ExecutorConfig, FlowConfig, RawConfigFile};
use crate::errors::{FlowexecError, Result};

impl TryFrom<RawConfigFile> for ConfigFile {
    type Error = FlowexecError;

    fn try_from(raw: RawConfigFile) -> std::result::Result<Self, Self::Error> {
        validate_executor_config(&raw.executor)?;
        validate_flows(&raw.flows)?;
        Ok(ConfigFile::new_unchecked(raw.executor, raw.flows))
    }
}

/// Reject limits the executor cannot run with.
pub fn validate_executor_config(cfg: &ExecutorConfig) -> Result<()> {
    let checks: [(&str, bool); 5] = [
        ("inbound_capacity", cfg.inbound_capacity == 0),
        ("outbound_capacity", cfg.outbound_capacity == 0),
        ("log_batch_max_rows", cfg.log_batch_max_rows == 0),
        ("log_batch_max_bytes", cfg.log_batch_max_bytes == 0),
        ("log_batch_interval_ms", cfg.log_batch_interval_ms == 0),
    ];

    for (field, is_zero) in checks {
        if is_zero {
            return Err(FlowexecError::ConfigError(format!(
                "[executor].{field} must be >= 1 (got 0)"
            )));
        }
    }

    Ok(())
}

fn validate_flows(flows: &[FlowConfig]) -> Result<()> {
    let mut seen_ids = HashSet::new();

    for (index, flow) in flows.iter().enumerate() {
        let label = flow
            .id
            .clone()
            .unwrap_or_else(|| format!("#{}", index + 1));

        if let Some(id) = &flow.id {
            if id.trim().is_empty() {
                return Err(FlowexecError::ConfigError(format!(
                    "flow {label} has an empty id"
                )));
            }
            if !seen_ids.insert(id.as_str()) {
                return Err(FlowexecError::ConfigError(format!(
                    "duplicate flow id '{id}'"
                )));
            }
        }

        if flow.queries.is_empty() {
            return Err(FlowexecError::ConfigError(format!(
                "flow {label} must contain at least one [[flow.query]]"
            )));
        }

        let mut names = HashSet::new();
        for query in &flow.queries {
            if !names.insert(query.name.as_str()) {
                return Err(FlowexecError::ConfigError(format!(
                    "flow {label} has duplicate query name '{}'",
                    query.name
                )));
            }
        }
    }

    Ok(())
}
