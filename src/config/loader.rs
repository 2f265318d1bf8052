// src/config/loader.rs

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::config::model::{ConfigFile, RawConfigFile};
use crate::errors::Result;

/// Environment variable that overrides the default flows file location.
pub const CONFIG_ENV_VAR: &str = "FLOWEXEC_CONFIG";

/// Deserialize a flows file without any semantic checks.
pub fn parse_config_str(contents: &str) -> Result<RawConfigFile> {
    Ok(toml::from_str(contents)?)
}

/// Read and deserialize `path`. Limits and flows are not checked here;
/// see [`load_and_validate`].
pub fn load_from_path(path: impl AsRef<Path>) -> Result<RawConfigFile> {
    let path = path.as_ref();
    debug!(path = %path.display(), "reading flows file");
    parse_config_str(&fs::read_to_string(path)?)
}

/// Read `path`, fill in `[executor]` defaults, and reject configurations
/// the executor cannot run.
pub fn load_and_validate(path: impl AsRef<Path>) -> Result<ConfigFile> {
    ConfigFile::try_from(load_from_path(path)?)
}

/// `$FLOWEXEC_CONFIG` if set and non-empty, else `Flows.toml` in the
/// working directory.
pub fn default_config_path() -> PathBuf {
    env::var_os(CONFIG_ENV_VAR)
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("Flows.toml"))
}
