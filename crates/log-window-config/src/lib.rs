//! Configuration for log-window
//!
//! This crate provides:
//! - Config file lookup (CWD, home directory, XDG config directory)
//! - `LogWindowConfig` with defaults for every setting
//! - Conversion into the engine's reader and gap settings

pub mod app_config;
pub mod config_file;
pub mod paths;

pub use app_config::LogWindowConfig;
pub use config_file::load_config_file;
