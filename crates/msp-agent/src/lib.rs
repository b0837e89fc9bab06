//! # msp-agent
//!
//! Device agent for the management server. Connects with the session
//! engine, reports the device description once, then pushes host telemetry
//! on a fixed interval until shut down. Reconnect policy lives here, not in
//! the engine: a lost session is retried after a configurable pause.

pub mod config;
pub mod telemetry;

pub use config::{load_config, AgentConfig, AgentSettings, ConfigError};
pub use telemetry::Telemetry;
