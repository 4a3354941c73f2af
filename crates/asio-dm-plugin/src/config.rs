//! Plugin configuration.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use tracing::info;

/// Plugin configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct Config {
    /// Logging settings
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Patching settings
    #[serde(default)]
    pub patching: PatchingConfig,
    /// Driver family settings
    #[serde(default)]
    pub drivers: DriversConfig,
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LoggingConfig {
    /// Filter directive, e.g. "info" or "asio_dm_hook=trace"
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: default_log_level() }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Patching settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PatchingConfig {
    /// Put the dispatch table page back to its prior protection after patching
    #[serde(default = "default_true")]
    pub restore_page_protection: bool,
}

impl Default for PatchingConfig {
    fn default() -> Self {
        Self { restore_page_protection: true }
    }
}

/// Driver family settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DriversConfig {
    /// Also hook ASIO4ALL with a passthrough that only logs
    #[serde(default = "default_debug_passthrough")]
    pub debug_passthrough: bool,
}

impl Default for DriversConfig {
    fn default() -> Self {
        Self { debug_passthrough: default_debug_passthrough() }
    }
}

fn default_debug_passthrough() -> bool {
    cfg!(debug_assertions)
}

fn default_true() -> bool {
    true
}

/// Load configuration from a file, or defaults if it does not exist.
///
/// # Errors
/// Returns an error if the file exists but cannot be read or parsed.
pub fn load_from(config_path: &Path) -> Result<Config> {
    if config_path.exists() {
        let content = std::fs::read_to_string(config_path)
            .with_context(|| format!("Failed to read config file: {config_path:?}"))?;
        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {config_path:?}"))?;
        Ok(config)
    } else {
        info!(?config_path, "Config file not found, using defaults");
        Ok(Config::default())
    }
}

/// Load configuration from the per-user config directory.
///
/// # Errors
/// Returns an error if the config directory cannot be determined or the
/// file exists but is unusable.
pub fn load_config() -> Result<Config> {
    load_from(&config_path()?)
}

/// Get the configuration file path.
fn config_path() -> Result<PathBuf> {
    let dirs = ProjectDirs::from("com", "asio-dm", "ASIO-DM")
        .context("Could not determine config directory")?;
    Ok(dirs.config_dir().join("config.toml"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let config = load_from(&dir.path().join("config.toml")).expect("defaults");
        assert_eq!(config, Config::default());
        assert_eq!(config.logging.level, "info");
        assert!(config.patching.restore_page_protection);
        assert_eq!(config.drivers.debug_passthrough, cfg!(debug_assertions));
    }

    #[test]
    fn test_partial_file_keeps_other_defaults() {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[patching]\nrestore_page_protection = false\n").expect("write");

        let config = load_from(&path).expect("parsed");
        assert!(!config.patching.restore_page_protection);
        assert_eq!(config.logging, LoggingConfig::default());
        assert_eq!(config.drivers, DriversConfig::default());
    }

    #[test]
    fn test_full_file() {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            "[logging]\nlevel = \"asio_dm_hook=trace\"\n\n[drivers]\ndebug_passthrough = true\n",
        )
        .expect("write");

        let config = load_from(&path).expect("parsed");
        assert_eq!(config.logging.level, "asio_dm_hook=trace");
        assert!(config.drivers.debug_passthrough);
        assert!(config.patching.restore_page_protection);
    }

    #[test]
    fn test_invalid_file_is_an_error() {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[patching]\nrestore_page_protection = \"sometimes\"\n")
            .expect("write");

        let err = load_from(&path).expect_err("must not parse");
        assert!(format!("{err:#}").contains("Failed to parse config file"));
    }

    #[test]
    fn test_serialized_defaults_round_trip() {
        let text = toml::to_string(&Config::default()).expect("serialize");
        let parsed: Config = toml::from_str(&text).expect("parse");
        assert_eq!(parsed, Config::default());
    }
}
