//! Streaming frame reassembly.
//!
//! TCP is a stream: a single `read()` may return less than one frame or
//! pieces of several. [`FrameReader`] accumulates bytes until the length
//! prefix and the full body of one frame are present, then hands out exactly
//! that frame and advances the buffer. The declared length of every frame is
//! checked against a hard cap before its body is awaited, so a hostile or
//! corrupted peer cannot make the buffer grow without bound.

use bytes::{Buf, BytesMut};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::codec::ProtocolError;
use crate::codes::{DEFAULT_RECV_BUFFER, HEADER_SIZE, MAX_RECV_BUFFER};

/// Errors surfaced while reading frames off a stream.
#[derive(Debug, Error)]
pub enum FrameError {
    #[error("socket read failed")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// The peer closed the connection in the middle of a frame.
    #[error("connection closed mid-frame with {buffered} bytes buffered")]
    UnexpectedEof { buffered: usize },
}

/// Incremental reader that reassembles complete frames from a byte stream.
pub struct FrameReader {
    buf: BytesMut,
    max_frame: usize,
}

impl FrameReader {
    pub fn new() -> Self {
        Self::with_limits(DEFAULT_RECV_BUFFER, MAX_RECV_BUFFER)
    }

    /// `initial` sizes the buffer up front; `max_frame` is the fatal cap on
    /// a single frame's declared length.
    pub fn with_limits(initial: usize, max_frame: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(initial),
            max_frame,
        }
    }

    /// Reads until one complete frame is available and returns its bytes.
    ///
    /// Returns `Ok(None)` on a clean end of stream (connection closed on a
    /// frame boundary). A close in the middle of a frame is
    /// [`FrameError::UnexpectedEof`]; an oversized declared length is fatal
    /// [`ProtocolError::Oversized`].
    pub async fn next_frame<R>(&mut self, stream: &mut R) -> Result<Option<Vec<u8>>, FrameError>
    where
        R: AsyncRead + Unpin,
    {
        loop {
            if let Some(frame) = self.extract()? {
                return Ok(Some(frame));
            }

            let n = stream.read_buf(&mut self.buf).await?;
            if n == 0 {
                if self.buf.is_empty() {
                    return Ok(None);
                }
                return Err(FrameError::UnexpectedEof {
                    buffered: self.buf.len(),
                });
            }
        }
    }

    /// Pops one complete frame off the front of the buffer, if present.
    fn extract(&mut self) -> Result<Option<Vec<u8>>, ProtocolError> {
        if self.buf.len() < HEADER_SIZE {
            return Ok(None);
        }

        let declared =
            u32::from_be_bytes([self.buf[4], self.buf[5], self.buf[6], self.buf[7]]) as usize;

        if declared < HEADER_SIZE {
            // A frame can never be shorter than its own header.
            return Err(ProtocolError::LengthMismatch {
                declared,
                available: HEADER_SIZE,
            });
        }
        if declared > self.max_frame {
            return Err(ProtocolError::Oversized {
                declared,
                limit: self.max_frame,
            });
        }
        if self.buf.len() < declared {
            // Body not complete yet; make room for the rest in one go.
            self.buf.reserve(declared - self.buf.len());
            return Ok(None);
        }

        let frame = self.buf.copy_to_bytes(declared).to_vec();
        Ok(Some(frame))
    }
}

impl Default for FrameReader {
    fn default() -> Self {
        Self::new()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
