//! TOML configuration for the reporting connector.

use std::path::{Path, PathBuf};
use std::time::Duration;

use msp_session::SessionConfig;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error type for configuration file operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error accessing config at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Top-level connector configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReportdConfig {
    /// Connection parameters passed straight to the session engine.
    pub server: SessionConfig,
    pub spool: SpoolSettings,
}

/// Spool directory handling.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SpoolSettings {
    /// Directory the report generator drops finished files into.
    pub directory: PathBuf,
    /// Seconds between spool scans.
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    /// Remove files after an acknowledged upload.
    #[serde(default = "default_true")]
    pub delete_after_upload: bool,
    /// `tracing` log level for the connector.
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_poll_interval_secs() -> u64 {
    10
}
fn default_true() -> bool {
    true
}
fn default_log_level() -> String {
    "info".to_string()
}

impl SpoolSettings {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }
}

/// Loads the connector configuration from `path`.
pub fn load_config(path: &Path) -> Result<ReportdConfig, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(toml::from_str(&content)?)
}
