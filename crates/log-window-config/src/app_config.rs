//! Application configuration
//!
//! Configuration loaded from .log-window.toml file.

use anyhow::{Context, Result};
use chrono::TimeDelta;
use log_window::{GapSettings, ReaderSettings};
use log_window_text::{DEFAULT_HEADER_PATTERN, DEFAULT_TIMESTAMP_FORMAT, TextFormat};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Application configuration loaded from .log-window.toml
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct LogWindowConfig {
    /// Size of each source's loaded byte window
    #[serde(default = "default_window_bytes")]
    pub window_bytes: i64,

    /// How often idle readers check their file for growth
    #[serde(default = "default_tail_poll_interval_ms")]
    pub tail_poll_interval_ms: u64,

    /// How long to wait for all sources to finish loading
    #[serde(default = "default_idle_timeout_ms")]
    pub idle_timeout_ms: u64,

    #[serde(default = "default_idle_poll_interval_ms")]
    pub idle_poll_interval_ms: u64,

    /// Minimum silence reported as a time gap
    #[serde(default = "default_gap_threshold_secs")]
    pub gap_threshold_secs: i64,

    /// Gap scans stop after this many gaps
    #[serde(default = "default_max_gaps")]
    pub max_gaps: usize,

    #[serde(default = "default_gap_retry_limit")]
    pub gap_retry_limit: u32,

    #[serde(default = "default_gap_retry_backoff_ms")]
    pub gap_retry_backoff_ms: u64,

    /// Regex recognising a message header; needs a named group `time`
    #[serde(default = "default_timestamp_pattern")]
    pub timestamp_pattern: String,

    /// chrono format of the `time` group
    #[serde(default = "default_timestamp_format")]
    pub timestamp_format: String,

    /// Write the tool's own log here instead of stderr
    #[serde(default)]
    pub log_file: Option<PathBuf>,
}

fn default_window_bytes() -> i64 {
    64 * 1024
}

fn default_tail_poll_interval_ms() -> u64 {
    500
}

fn default_idle_timeout_ms() -> u64 {
    30_000
}

fn default_idle_poll_interval_ms() -> u64 {
    20
}

fn default_gap_threshold_secs() -> i64 {
    60
}

fn default_max_gaps() -> usize {
    1000
}

fn default_gap_retry_limit() -> u32 {
    3
}

fn default_gap_retry_backoff_ms() -> u64 {
    250
}

fn default_timestamp_pattern() -> String {
    DEFAULT_HEADER_PATTERN.to_string()
}

fn default_timestamp_format() -> String {
    DEFAULT_TIMESTAMP_FORMAT.to_string()
}

impl Default for LogWindowConfig {
    fn default() -> Self {
        Self {
            window_bytes: default_window_bytes(),
            tail_poll_interval_ms: default_tail_poll_interval_ms(),
            idle_timeout_ms: default_idle_timeout_ms(),
            idle_poll_interval_ms: default_idle_poll_interval_ms(),
            gap_threshold_secs: default_gap_threshold_secs(),
            max_gaps: default_max_gaps(),
            gap_retry_limit: default_gap_retry_limit(),
            gap_retry_backoff_ms: default_gap_retry_backoff_ms(),
            timestamp_pattern: default_timestamp_pattern(),
            timestamp_format: default_timestamp_format(),
            log_file: None,
        }
    }
}

impl LogWindowConfig {
    /// Load config from CWD first, then home and config directory, or use defaults
    pub fn load() -> Self {
        if let Some((path, content)) = crate::load_config_file() {
            match toml::from_str(&content) {
                Ok(config) => {
                    log::info!("Loaded config from {}", path.display());
                    return config;
                }
                Err(e) => {
                    log::warn!("Failed to parse config file {}: {}", path.display(), e);
                }
            }
        }

        log::debug!("Using default config");
        Self::default()
    }

    /// Load config from an explicitly given file
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))
    }

    pub fn reader_settings(&self) -> ReaderSettings {
        ReaderSettings {
            window_bytes: self.window_bytes.max(1),
            tail_poll_interval: Duration::from_millis(self.tail_poll_interval_ms),
            idle_timeout: Duration::from_millis(self.idle_timeout_ms),
            idle_poll_interval: Duration::from_millis(self.idle_poll_interval_ms.max(1)),
        }
    }

    /// Gap scan settings; a threshold that is not a positive, representable
    /// number of seconds falls back to the default
    pub fn gap_settings(&self) -> GapSettings {
        let defaults = GapSettings::default();
        let threshold = match TimeDelta::try_seconds(self.gap_threshold_secs) {
            Some(threshold) if threshold > TimeDelta::zero() => threshold,
            _ => {
                log::warn!(
                    "Ignoring gap_threshold_secs = {}, using {}s",
                    self.gap_threshold_secs,
                    defaults.threshold.num_seconds()
                );
                defaults.threshold
            }
        };
        GapSettings {
            threshold,
            max_gaps: self.max_gaps,
            retry_limit: self.gap_retry_limit,
            retry_backoff: Duration::from_millis(self.gap_retry_backoff_ms),
            ..defaults
        }
    }

    pub fn text_format(&self) -> Result<TextFormat> {
        TextFormat::new(&self.timestamp_pattern, self.timestamp_format.clone())
            .context("Invalid timestamp_pattern in config")
    }
}
