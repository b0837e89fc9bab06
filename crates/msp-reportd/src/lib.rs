//! # msp-reportd
//!
//! Reporting-server connector. A second, independent consumer of the
//! session engine: it watches a spool directory for finished report files
//! and ships each one to the management server with the chunked transfer
//! path, announcing the file first and waiting for the acknowledgement
//! after the final chunk.

pub mod config;
pub mod spool;

pub use config::{load_config, ConfigError, ReportdConfig, SpoolSettings};
