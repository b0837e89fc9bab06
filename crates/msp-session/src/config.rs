//! Session configuration.

use std::time::Duration;

use msp_proto::codes::{DEFAULT_PORT, DEFAULT_RECV_BUFFER, MAX_RECV_BUFFER};
use serde::{Deserialize, Serialize};

/// Connection parameters for one session.
///
/// The struct deserializes from the `[server]`-style sections of the
/// consumers' TOML config files; every tuning field has a default so
/// minimal configs keep working as fields are added.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionConfig {
    /// Host name or IP address of the management server.
    pub address: String,
    /// TCP port of the management server.
    #[serde(default = "default_port")]
    pub port: u16,
    /// Stable identifier this device presents at login.
    pub device_id: String,
    /// Login name.
    pub login_name: String,
    /// Password.
    pub password: String,
    /// Ask the server to negotiate transport encryption during connect.
    #[serde(default)]
    pub use_encryption: bool,
    /// Allow zlib compression of outgoing message bodies.
    #[serde(default)]
    pub allow_compression: bool,
    /// Default timeout for a single command round-trip, in milliseconds.
    #[serde(default = "default_command_timeout_ms")]
    pub command_timeout_ms: u64,
    /// Initial receive buffer size in bytes.
    #[serde(default = "default_recv_buffer_size")]
    pub recv_buffer_size: usize,
    /// Hard cap on a single received frame in bytes.
    #[serde(default = "default_max_frame_size")]
    pub max_frame_size: usize,
    /// Free-form client identification string sent at login.
    #[serde(default = "default_client_info")]
    pub client_info: String,
}

fn default_port() -> u16 {
    DEFAULT_PORT
}
fn default_command_timeout_ms() -> u64 {
    30_000
}
fn default_recv_buffer_size() -> usize {
    DEFAULT_RECV_BUFFER
}
fn default_max_frame_size() -> usize {
    MAX_RECV_BUFFER
}
fn default_client_info() -> String {
    concat!("msp-session/", env!("CARGO_PKG_VERSION")).to_string()
}

impl SessionConfig {
    /// Minimal config for the given endpoint and credentials; everything
    /// else at defaults.
    pub fn new(
        address: impl Into<String>,
        device_id: impl Into<String>,
        login_name: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            address: address.into(),
            port: default_port(),
            device_id: device_id.into(),
            login_name: login_name.into(),
            password: password.into(),
            use_encryption: false,
            allow_compression: false,
            command_timeout_ms: default_command_timeout_ms(),
            recv_buffer_size: default_recv_buffer_size(),
            max_frame_size: default_max_frame_size(),
            client_info: default_client_info(),
        }
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_uses_well_known_port_and_timeout() {
        let cfg = SessionConfig::new("mgmt.example.net", "dev-1", "agent", "pw");
        assert_eq!(cfg.port, DEFAULT_PORT);
        assert_eq!(cfg.command_timeout(), Duration::from_secs(30));
        assert!(!cfg.use_encryption);
    }

    #[test]
    fn test_minimal_toml_fills_defaults() {
        let cfg: SessionConfig = toml::from_str(
            r#"
address = "10.0.0.5"
device_id = "dev-7"
login_name = "agent"
password = "pw"
"#,
        )
        .expect("deserialize minimal");
        assert_eq!(cfg.port, DEFAULT_PORT);
        assert_eq!(cfg.recv_buffer_size, DEFAULT_RECV_BUFFER);
        assert_eq!(cfg.max_frame_size, MAX_RECV_BUFFER);
        assert!(!cfg.allow_compression);
    }

    #[test]
    fn test_toml_overrides_survive_round_trip() {
        let mut cfg = SessionConfig::new("10.0.0.5", "dev-7", "agent", "pw");
        cfg.port = 9911;
        cfg.use_encryption = true;
        cfg.command_timeout_ms = 5_000;

        let text = toml::to_string_pretty(&cfg).expect("serialize");
        let restored: SessionConfig = toml::from_str(&text).expect("deserialize");
        assert_eq!(restored, cfg);
        assert_eq!(restored.command_timeout(), Duration::from_secs(5));
    }
}
