//! Chunked binary payload transfer.
//!
//! Large payloads travel as a sequence of binary-flagged messages sharing
//! one request id. Every chunk but the last is exactly the fixed chunk
//! size; the final chunk carries the end-of-file flag. The receiving side
//! appends chunks in arrival order until end-of-file. A sender that cannot
//! finish signals an explicit abort message instead of going silent.

use thiserror::Error;

use crate::codes::msg;
use crate::message::Message;

/// Errors while reassembling a chunked transfer.
#[derive(Debug, Error, PartialEq)]
pub enum ChunkError {
    #[error("chunk carries request id {actual}, transfer is {expected}")]
    RequestIdMismatch { expected: u32, actual: u32 },

    #[error("non-binary message in chunked transfer")]
    NotBinary,

    #[error("chunk received after end of file")]
    AfterEndOfFile,

    #[error("transfer aborted by sender")]
    Aborted,
}

/// Number of chunks a payload of `len` bytes produces at `chunk_size`.
///
/// An empty payload still produces one (empty, end-of-file) chunk.
pub fn chunk_count(len: usize, chunk_size: usize) -> usize {
    if len == 0 {
        1
    } else {
        len.div_ceil(chunk_size)
    }
}

/// Splits `payload` into `(bytes, is_last)` chunks of at most `chunk_size`.
pub fn split_chunks(payload: &[u8], chunk_size: usize) -> Vec<(&[u8], bool)> {
    let total = chunk_count(payload.len(), chunk_size);
    if payload.is_empty() {
        return vec![(payload, true)];
    }
    payload
        .chunks(chunk_size)
        .enumerate()
        .map(|(i, chunk)| (chunk, i + 1 == total))
        .collect()
}

/// Builds the binary message for one chunk of a transfer.
pub fn chunk_message(request_id: u32, chunk: &[u8], is_last: bool) -> Message {
    let mut message = Message::new(msg::FILE_DATA, request_id);
    message.set_binary_data(chunk.to_vec());
    message.set_end_of_file(is_last);
    message
}

/// Reassembles a chunked transfer on the receiving side.
#[derive(Debug)]
pub struct ChunkAssembler {
    request_id: u32,
    data: Vec<u8>,
    complete: bool,
}

impl ChunkAssembler {
    pub fn new(request_id: u32) -> Self {
        Self {
            request_id,
            data: Vec::new(),
            complete: false,
        }
    }

    /// Feeds one message of the transfer. Returns `true` once the
    /// end-of-file chunk has been consumed.
    pub fn push(&mut self, message: &Message) -> Result<bool, ChunkError> {
        if message.request_id() != self.request_id {
            return Err(ChunkError::RequestIdMismatch {
                expected: self.request_id,
                actual: message.request_id(),
            });
        }
        if message.code() == msg::ABORT_FILE_TRANSFER {
            return Err(ChunkError::Aborted);
        }
        if !message.is_binary() {
            return Err(ChunkError::NotBinary);
        }
        if self.complete {
            return Err(ChunkError::AfterEndOfFile);
        }

        self.data.extend_from_slice(message.binary_data());
        if message.is_end_of_file() {
            self.complete = true;
        }
        Ok(self.complete)
    }

    pub fn is_complete(&self) -> bool {
        self.complete
    }

    pub fn bytes_received(&self) -> usize {
        self.data.len()
    }

    /// Consumes the assembler and returns the reassembled payload.
    pub fn into_payload(self) -> Vec<u8> {
        self.data
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codes::FILE_CHUNK_SIZE;

    #[test]
    fn test_300_kib_payload_splits_into_three_chunks() {
        let payload: Vec<u8> = (0..300 * 1024).map(|i| (i % 251) as u8).collect();
        let chunks = split_chunks(&payload, FILE_CHUNK_SIZE);

        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].0.len(), FILE_CHUNK_SIZE);
        assert!(!chunks[0].1);
        assert_eq!(chunks[1].0.len(), FILE_CHUNK_SIZE);
        assert!(!chunks[1].1);
        assert_eq!(chunks[2].0.len(), 300 * 1024 - 2 * FILE_CHUNK_SIZE);
        assert!(chunks[2].1);
    }

    #[test]
    fn test_exact_multiple_marks_last_full_chunk() {
        let payload = vec![0u8; 2 * FILE_CHUNK_SIZE];
        let chunks = split_chunks(&payload, FILE_CHUNK_SIZE);
        assert_eq!(chunks.len(), 2);
        assert!(!chunks[0].1);
        assert!(chunks[1].1);
    }

    #[test]
    fn test_empty_payload_is_one_end_of_file_chunk() {
        let chunks = split_chunks(&[], FILE_CHUNK_SIZE);
        assert_eq!(chunks.len(), 1);
        assert!(chunks[0].0.is_empty());
        assert!(chunks[0].1);
    }

    #[test]
    fn test_reassembly_reproduces_payload() {
        let payload: Vec<u8> = (0..300 * 1024).map(|i| (i % 199) as u8).collect();
        let mut assembler = ChunkAssembler::new(17);

        let mut complete = false;
        for (chunk, is_last) in split_chunks(&payload, FILE_CHUNK_SIZE) {
            let message = chunk_message(17, chunk, is_last);
            complete = assembler.push(&message).unwrap();
        }

        assert!(complete);
        assert_eq!(assembler.into_payload(), payload);
    }

    #[test]
    fn test_foreign_request_id_is_rejected() {
        let mut assembler = ChunkAssembler::new(1);
        let message = chunk_message(2, b"data", false);
        assert_eq!(
            assembler.push(&message),
            Err(ChunkError::RequestIdMismatch {
                expected: 1,
                actual: 2
            })
        );
        assert_eq!(assembler.bytes_received(), 0);
    }

    #[test]
    fn test_abort_message_fails_the_transfer() {
        let mut assembler = ChunkAssembler::new(5);
        assembler
            .push(&chunk_message(5, b"partial", false))
            .unwrap();

        let mut abort = Message::new(msg::ABORT_FILE_TRANSFER, 5);
        abort.set_binary_data(Vec::new());
        assert_eq!(assembler.push(&abort), Err(ChunkError::Aborted));
    }

    #[test]
    fn test_chunk_after_end_of_file_is_rejected() {
        let mut assembler = ChunkAssembler::new(5);
        assembler.push(&chunk_message(5, b"all", true)).unwrap();
        assert_eq!(
            assembler.push(&chunk_message(5, b"more", true)),
            Err(ChunkError::AfterEndOfFile)
        );
    }
}
