//! Configuration loading.
//!
//! Loading is pure: read the file, parse TOML into [`ServerConfig`]. Every
//! field is defaulted, so an empty file is a valid configuration. Command
//! line overrides are applied by the caller afterwards.

use anyhow::Context;
use cb_core::ServerConfig;
use std::path::Path;

/// Load `ServerConfig` from a TOML file.
pub fn load_config(config_path: &Path) -> anyhow::Result<ServerConfig> {
    let content = std::fs::read_to_string(config_path)
        .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;
    toml::from_str(&content).context("Failed to parse config as TOML")
}

/// Load the file at `config_path` if one was given, defaults otherwise.
pub fn resolve_config(config_path: Option<&Path>) -> anyhow::Result<ServerConfig> {
    match config_path {
        Some(path) => load_config(path),
        None => Ok(ServerConfig::default()),
    }
}
