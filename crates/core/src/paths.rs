//! Centralized path functions for all geoapi storage locations.

use std::path::PathBuf;

/// Config root: `~/Library/Application Support/geoapi/` (macOS) or `~/.config/geoapi/` (Linux).
pub fn app_config_dir() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("geoapi"))
}

/// Client configuration file: `<app_config_dir>/config.toml`.
pub fn config_file() -> Option<PathBuf> {
    app_config_dir().map(|d| d.join("config.toml"))
}

/// Persisted session-token store: `<app_config_dir>/session-tokens.json`.
pub fn token_store_path() -> Option<PathBuf> {
    app_config_dir().map(|d| d.join("session-tokens.json"))
}
