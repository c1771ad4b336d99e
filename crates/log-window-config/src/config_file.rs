use crate::paths::{CONFIG_FILE, app_config_path, home_config_path};
use std::path::PathBuf;

/// Load config file content
///
/// Searches in:
/// 1. Current working directory as .log-window.toml
/// 2. Home directory as .log-window.toml
/// 3. The config directory as log-window/config.toml
///
/// Returns the path and content of the first file found.
pub fn load_config_file() -> Option<(PathBuf, String)> {
    let candidates = std::iter::once(Some(PathBuf::from(CONFIG_FILE)))
        .chain(std::iter::once(home_config_path()))
        .chain(std::iter::once(app_config_path().ok()))
        .flatten();

    for path in candidates {
        if let Ok(content) = std::fs::read_to_string(&path) {
            log::debug!("Loaded config from {}", path.display());
            return Some((path, content));
        }
    }

    None
}
