//! TOML configuration for the device agent.
//!
//! ```toml
//! [server]
//! address = "mgmt.example.net"
//! device_id = "edge-0017"
//! login_name = "agent"
//! password = "secret"
//! use_encryption = true
//!
//! [agent]
//! push_interval_secs = 60
//! ```
//!
//! Every tuning field has a serde default, so a minimal file keeps working
//! as new fields are added.

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

/// Top-level agent configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentConfig {
    /// Connection parameters passed straight to the session engine.
    pub server: SessionConfig,
    #[serde(default)]
    pub agent: AgentSettings,
}

/// Agent behaviour settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentSettings {
    /// Seconds between telemetry pushes.
    #[serde(default = "default_push_interval_secs")]
    pub push_interval_secs: u64,
    /// Seconds to wait before reconnecting after a lost session.
    #[serde(default = "default_reconnect_secs")]
    pub reconnect_secs: u64,
    /// Also report the volatile device status on every push cycle.
    #[serde(default = "default_true")]
    pub report_status: bool,
    /// `tracing` log level: `"error"`, `"warn"`, `"info"`, `"debug"`, `"trace"`.
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_push_interval_secs() -> u64 {
    60
}
fn default_reconnect_secs() -> u64 {
    30
}
fn default_true() -> bool {
    true
}
fn default_log_level() -> String {
    "info".to_string()
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            push_interval_secs: default_push_interval_secs(),
            reconnect_secs: default_reconnect_secs(),
            report_status: default_true(),
            log_level: default_log_level(),
        }
    }
}

impl AgentSettings {
    pub fn push_interval(&self) -> Duration {
        Duration::from_secs(self.push_interval_secs)
    }

    pub fn reconnect_interval(&self) -> Duration {
        Duration::from_secs(self.reconnect_secs)
    }
}

/// Loads the agent configuration from `path`.
pub fn load_config(path: &Path) -> Result<AgentConfig, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(toml::from_str(&content)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_config_fills_defaults() {
        let cfg: AgentConfig = toml::from_str(
            r#"
[server]
address = "10.1.2.3"
device_id = "edge-1"
login_name = "agent"
password = "pw"
"#,
        )
        .expect("deserialize");

        assert_eq!(cfg.server.address, "10.1.2.3");
        assert_eq!(cfg.agent.push_interval_secs, 60);
        assert!(cfg.agent.report_status);
        assert_eq!(cfg.agent.log_level, "info");
    }

    #[test]
    fn test_full_config_round_trips() {
        let cfg = AgentConfig {
            server: {
                let mut s = SessionConfig::new("10.1.2.3", "edge-1", "agent", "pw");
                s.use_encryption = true;
                s
            },
            agent: AgentSettings {
                push_interval_secs: 15,
                reconnect_secs: 5,
                report_status: false,
                log_level: "debug".to_string(),
            },
        };

        let text = toml::to_string_pretty(&cfg).expect("serialize");
        let restored: AgentConfig = toml::from_str(&text).expect("deserialize");
        assert_eq!(restored, cfg);
        assert_eq!(restored.agent.push_interval(), Duration::from_secs(15));
    }

    #[test]
    fn test_invalid_toml_is_a_parse_error() {
        let result: Result<AgentConfig, _> = toml::from_str("[[[ nope");
        assert!(result.is_err());
    }
}
