//! # msp-session
//!
//! Client-side engine for the management session protocol: connection
//! establishment, optional transport encryption, request/reply correlation
//! over a single full-duplex TCP stream, keepalive handling, and chunked
//! binary payload transfer.
//!
//! One background task per session owns the read side of the socket and
//! dispatches every decoded message either to an inline control handler
//! (key exchange, keepalive) or to the wait queue. Any number of caller
//! tasks may send requests and block for their replies concurrently.
//!
//! ```no_run
//! use msp_session::{Session, SessionConfig, PushItem};
//!
//! # async fn example() -> Result<(), msp_session::SessionError> {
//! let mut config = SessionConfig::new("mgmt.example.net", "dev-0001", "agent", "secret");
//! config.use_encryption = true;
//!
//! let session = Session::connect(config).await?;
//! session
//!     .push_data(&[PushItem::new("dev-0001", "cpu.load", "0.42")])
//!     .await?;
//! session.disconnect().await;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod correlator;
pub mod crypto;
pub mod error;
mod receiver;
pub mod session;

pub use config::SessionConfig;
pub use correlator::{MessageWaitQueue, WaitHandle};
pub use crypto::{CipherId, EncryptionContext};
pub use error::SessionError;
pub use session::{DeviceInfo, DeviceStatus, PushItem, Session, SessionState};

// Re-exported so consumers build messages and name protocol constants
// without a direct msp-proto dependency.
pub use msp_proto::codes;
pub use msp_proto::{FieldValue, Message, ResultCode};
