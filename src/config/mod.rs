// src/config/mod.rs

//! Configuration loading and validation for flowexec.
//!
//! Responsibilities:
//! - Define the TOML-backed data model (`model.rs`).
//! - Load a config file from disk (`loader.rs`).
//! - Validate executor limits and flow definitions (`validate.rs`).

pub mod loader;
pub mod model;
pub mod validate;

pub use loader::{
    CONFIG_ENV_VAR, default_config_path, load_and_validate, load_from_path, parse_config_str,
};
pub use model::{ConfigFile, ExecutorConfig, FlowConfig, RawConfigFile};
pub use validate::validate_executor_config;
