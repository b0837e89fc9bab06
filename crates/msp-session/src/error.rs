//! Error type for session operations.

use msp_proto::{FrameError, ProtocolError, ResultCode};
use thiserror::Error;

/// Errors surfaced by the session engine.
///
/// Fatal kinds (`Io`, `Protocol`, `Encryption`) stop the receiver loop and
/// close the session; every caller still blocked on a reply then observes
/// [`SessionError::SessionClosed`]. `Timeout` and `Server` are local to one
/// call and leave the session usable. The engine never reconnects on its
/// own.
#[derive(Debug, Error)]
pub enum SessionError {
    /// Socket read or write failed.
    #[error("socket I/O failure")]
    Io(#[from] std::io::Error),

    /// Malformed or oversized frame on the wire.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// The encryption handshake did not produce a usable cipher.
    #[error("encryption negotiation failed: {0}")]
    EncryptionNegotiation(String),

    /// Encryption or decryption failed on an established session.
    #[error("message encryption failure")]
    Encryption,

    /// The server speaks an incompatible protocol revision.
    #[error("server protocol version is {actual}, this client requires {expected}")]
    ProtocolVersionMismatch { expected: i32, actual: i32 },

    /// The server rejected the login.
    #[error("login rejected: {0}")]
    Authentication(ResultCode),

    /// No reply arrived before the deadline. Local to one request.
    #[error("request timed out")]
    Timeout,

    /// The server returned a non-success completion code. Local to one
    /// request; the code carries its table-looked-up description.
    #[error("server error: {0}")]
    Server(ResultCode),

    /// The session was closed while the operation was in flight.
    #[error("session closed")]
    SessionClosed,

    /// The session is not in a state that permits this operation.
    #[error("not connected")]
    NotConnected,
}

impl From<FrameError> for SessionError {
    fn from(err: FrameError) -> Self {
        match err {
            FrameError::Io(e) => SessionError::Io(e),
            FrameError::Protocol(e) => SessionError::Protocol(e),
            FrameError::UnexpectedEof { .. } => SessionError::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                err.to_string(),
            )),
        }
    }
}

impl SessionError {
    /// Whether the error kills the whole session rather than one call.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            SessionError::Io(_)
                | SessionError::Protocol(_)
                | SessionError::Encryption
                | SessionError::SessionClosed
        )
    }
}
