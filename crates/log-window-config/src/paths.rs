//! Configuration paths
//!
//! Uses XDG directories via `dirs` crate.
//!
//! Platform-specific locations:
//! - Linux: `~/.config/log-window/`
//! - macOS: `~/Library/Application Support/log-window/`
//! - Windows: `%APPDATA%\log-window\`

use anyhow::{Context, Result};
use std::path::PathBuf;

const APP_NAME: &str = "log-window";

/// Name of the config file looked up in the CWD and home directory
pub const CONFIG_FILE: &str = ".log-window.toml";

/// Get the application config directory (not created)
pub fn config_dir() -> Result<PathBuf> {
    let base = dirs::config_dir().context("Could not determine config directory")?;
    Ok(base.join(APP_NAME))
}

/// Get path to the config file in the config directory
pub fn app_config_path() -> Result<PathBuf> {
    Ok(config_dir()?.join("config.toml"))
}

/// Get path to the config file in the home directory
pub fn home_config_path() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(CONFIG_FILE))
}
