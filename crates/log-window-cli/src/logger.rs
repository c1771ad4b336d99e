//! Logging setup
//!
//! With a log file, everything goes through simplelog into that file so the
//! printed messages on stdout stay clean. Without one, env_logger writes to
//! stderr and only warnings show unless `RUST_LOG` says otherwise.

use anyhow::{Context, Result};
use simplelog::{ConfigBuilder, LevelFilter, WriteLogger};
use std::fs::File;
use std::path::Path;

fn level_from_env() -> LevelFilter {
    std::env::var("RUST_LOG")
        .map(|v| match v.to_lowercase().as_str() {
            "error" => LevelFilter::Error,
            "warn" => LevelFilter::Warn,
            "info" => LevelFilter::Info,
            "debug" => LevelFilter::Debug,
            "trace" => LevelFilter::Trace,
            _ => LevelFilter::Info,
        })
        .unwrap_or(LevelFilter::Debug)
}

pub fn init(log_file: Option<&Path>) -> Result<()> {
    let Some(path) = log_file else {
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn"))
            .try_init()
            .context("Failed to initialize logger")?;
        return Ok(());
    };

    let config = ConfigBuilder::new()
        .set_time_format_rfc3339()
        .set_time_offset_to_local()
        .unwrap_or_else(|c| c) // Fallback if local time offset fails
        .build();

    let file = File::create(path)
        .with_context(|| format!("Failed to create log file {}", path.display()))?;
    WriteLogger::init(level_from_env(), config, file).context("Failed to initialize logger")?;
    Ok(())
}
