//! Binary codec for protocol messages.
//!
//! Wire format, all multi-byte integers big-endian:
//! ```text
//! [code:2][flags:2][frame_len:4][request_id:4][aux:4]   16-byte header
//! then, for field messages:   aux × [field_id:4][type_tag:1][payload]
//! then, for binary messages:  aux raw payload bytes
//! ```
//! `aux` is the field count for field messages and the raw payload length
//! for binary messages. When the `COMPRESSED` flag is set, the body after
//! the header is `[uncompressed_len:4][zlib stream]`.
//!
//! Decoding is total: any byte slice claiming to be one complete frame
//! either decodes or produces a typed [`ProtocolError`]; malformed input
//! never panics and never silently truncates a field.

use std::io::{Read, Write};

use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use thiserror::Error;

use crate::codes::{flags, COMPRESSION_THRESHOLD, HEADER_SIZE};
use crate::message::{type_tag, FieldValue, Message};

/// Errors produced while decoding a frame or assembling one from a stream.
#[derive(Debug, Error, PartialEq)]
pub enum ProtocolError {
    /// The input ends before the structure it declares.
    #[error("truncated frame: need at least {needed} bytes, got {available}")]
    Truncated { needed: usize, available: usize },

    /// A declared length disagrees with the bytes actually present.
    #[error("length mismatch: declared {declared}, available {available}")]
    LengthMismatch { declared: usize, available: usize },

    /// A frame declares a size above the receive limit.
    #[error("frame of {declared} bytes exceeds the {limit} byte limit")]
    Oversized { declared: usize, limit: usize },

    /// The field type tag is not part of the protocol.
    #[error("unknown field type tag 0x{0:02X}")]
    UnknownTypeTag(u8),

    /// A text field does not hold valid UTF-8.
    #[error("field 0x{field_id:X} is not valid UTF-8")]
    BadUtf8 { field_id: u32 },

    /// The compressed body cannot be inflated.
    #[error("corrupt compressed body: {0}")]
    Decompress(String),
}

// ── Encoding ──────────────────────────────────────────────────────────────────

/// Encodes a message into one complete frame.
///
/// With `allow_compression` the body is zlib-compressed when it exceeds
/// [`COMPRESSION_THRESHOLD`] bytes and compression actually shrinks it;
/// otherwise it is sent as-is. The `COMPRESSED` flag is owned by this
/// function and never taken from the message itself.
pub fn encode(msg: &Message, allow_compression: bool) -> Vec<u8> {
    let (body, aux) = if msg.is_binary() {
        (msg.binary_data().to_vec(), msg.binary_data().len() as u32)
    } else {
        let mut body = Vec::new();
        for (field_id, value) in msg.fields() {
            encode_field(&mut body, field_id, value);
        }
        (body, msg.field_count() as u32)
    };

    let mut header_flags = msg.flags() & !flags::COMPRESSED;
    let body = if allow_compression && body.len() > COMPRESSION_THRESHOLD {
        match compress_body(&body) {
            Some(compressed) if compressed.len() < body.len() => {
                header_flags |= flags::COMPRESSED;
                compressed
            }
            _ => body,
        }
    } else {
        body
    };

    let mut buf = Vec::with_capacity(HEADER_SIZE + body.len());
    buf.extend_from_slice(&msg.code().to_be_bytes());
    buf.extend_from_slice(&header_flags.to_be_bytes());
    buf.extend_from_slice(&((HEADER_SIZE + body.len()) as u32).to_be_bytes());
    buf.extend_from_slice(&msg.request_id().to_be_bytes());
    buf.extend_from_slice(&aux.to_be_bytes());
    buf.extend_from_slice(&body);
    buf
}

fn encode_field(buf: &mut Vec<u8>, field_id: u32, value: &FieldValue) {
    buf.extend_from_slice(&field_id.to_be_bytes());
    buf.push(value.type_tag());
    match value {
        FieldValue::Int16(v) => buf.extend_from_slice(&v.to_be_bytes()),
        FieldValue::Int32(v) => buf.extend_from_slice(&v.to_be_bytes()),
        FieldValue::Int64(v) => buf.extend_from_slice(&v.to_be_bytes()),
        FieldValue::Float(v) => buf.extend_from_slice(&v.to_be_bytes()),
        FieldValue::Timestamp(v) => buf.extend_from_slice(&v.to_be_bytes()),
        FieldValue::Text(v) => {
            buf.extend_from_slice(&(v.len() as u32).to_be_bytes());
            buf.extend_from_slice(v.as_bytes());
        }
        FieldValue::Binary(v) => {
            buf.extend_from_slice(&(v.len() as u32).to_be_bytes());
            buf.extend_from_slice(v);
        }
    }
}

fn compress_body(body: &[u8]) -> Option<Vec<u8>> {
    let mut out = Vec::with_capacity(body.len() / 2 + 8);
    out.extend_from_slice(&(body.len() as u32).to_be_bytes());
    let mut encoder = ZlibEncoder::new(out, Compression::best());
    encoder.write_all(body).ok()?;
    encoder.finish().ok()
}

// ── Decoding ──────────────────────────────────────────────────────────────────

/// Decodes one complete frame, as produced by [`encode`] and extracted by
/// the frame reader.
pub fn decode(bytes: &[u8]) -> Result<Message, ProtocolError> {
    if bytes.len() < HEADER_SIZE {
        return Err(ProtocolError::Truncated {
            needed: HEADER_SIZE,
            available: bytes.len(),
        });
    }

    let code = u16::from_be_bytes([bytes[0], bytes[1]]);
    let header_flags = u16::from_be_bytes([bytes[2], bytes[3]]);
    let frame_len = u32::from_be_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]) as usize;
    let request_id = u32::from_be_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]);
    let aux = u32::from_be_bytes([bytes[12], bytes[13], bytes[14], bytes[15]]) as usize;

    if frame_len != bytes.len() {
        return Err(ProtocolError::LengthMismatch {
            declared: frame_len,
            available: bytes.len(),
        });
    }

    let body = if header_flags & flags::COMPRESSED != 0 {
        decompress_body(&bytes[HEADER_SIZE..])?
    } else {
        bytes[HEADER_SIZE..].to_vec()
    };

    let mut msg = Message::new(code, request_id);
    // The compression flag describes the transport form, not the message.
    msg.set_flags(header_flags & !flags::COMPRESSED);

    if header_flags & flags::BINARY != 0 {
        if body.len() != aux {
            return Err(ProtocolError::LengthMismatch {
                declared: aux,
                available: body.len(),
            });
        }
        msg.set_binary_data(body);
    } else {
        let mut reader = Reader::new(&body);
        for _ in 0..aux {
            let (field_id, value) = decode_field(&mut reader)?;
            msg.set(field_id, value);
        }
        if !reader.at_end() {
            return Err(ProtocolError::LengthMismatch {
                declared: reader.pos(),
                available: body.len(),
            });
        }
    }

    Ok(msg)
}

fn decode_field(reader: &mut Reader<'_>) -> Result<(u32, FieldValue), ProtocolError> {
    let field_id = reader.read_u32()?;
    let tag = reader.read_u8()?;
    let value = match tag {
        type_tag::INT16 => FieldValue::Int16(reader.read_i16()?),
        type_tag::INT32 => FieldValue::Int32(reader.read_i32()?),
        type_tag::INT64 => FieldValue::Int64(reader.read_i64()?),
        type_tag::FLOAT => FieldValue::Float(reader.read_f64()?),
        type_tag::TIMESTAMP => FieldValue::Timestamp(reader.read_i64()?),
        type_tag::TEXT => {
            let len = reader.read_u32()? as usize;
            let raw = reader.read_bytes(len)?;
            let text = std::str::from_utf8(raw)
                .map_err(|_| ProtocolError::BadUtf8 { field_id })?
                .to_string();
            FieldValue::Text(text)
        }
        type_tag::BINARY => {
            let len = reader.read_u32()? as usize;
            FieldValue::Binary(reader.read_bytes(len)?.to_vec())
        }
        other => return Err(ProtocolError::UnknownTypeTag(other)),
    };
    Ok((field_id, value))
}

fn decompress_body(body: &[u8]) -> Result<Vec<u8>, ProtocolError> {
    if body.len() < 4 {
        return Err(ProtocolError::Truncated {
            needed: 4,
            available: body.len(),
        });
    }
    let declared = u32::from_be_bytes([body[0], body[1], body[2], body[3]]) as usize;
    let mut out = Vec::with_capacity(declared);
    ZlibDecoder::new(&body[4..])
        .read_to_end(&mut out)
        .map_err(|e| ProtocolError::Decompress(e.to_string()))?;
    if out.len() != declared {
        return Err(ProtocolError::Decompress(format!(
            "inflated to {} bytes, header declared {declared}",
            out.len()
        )));
    }
    Ok(out)
}

// ── Bounds-checked cursor ─────────────────────────────────────────────────────

struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn pos(&self) -> usize {
        self.pos
    }

    fn at_end(&self) -> bool {
        self.pos == self.buf.len()
    }

    fn read_bytes(&mut self, len: usize) -> Result<&'a [u8], ProtocolError> {
        let end = self.pos.checked_add(len).ok_or(ProtocolError::Truncated {
            needed: usize::MAX,
            available: self.buf.len(),
        })?;
        if end > self.buf.len() {
            return Err(ProtocolError::Truncated {
                needed: end,
                available: self.buf.len(),
            });
        }
        let slice = &self.buf[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn read_u8(&mut self) -> Result<u8, ProtocolError> {
        Ok(self.read_bytes(1)?[0])
    }

    fn read_u32(&mut self) -> Result<u32, ProtocolError> {
        let b = self.read_bytes(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn read_i16(&mut self) -> Result<i16, ProtocolError> {
        let b = self.read_bytes(2)?;
        Ok(i16::from_be_bytes([b[0], b[1]]))
    }

    fn read_i32(&mut self) -> Result<i32, ProtocolError> {
        let b = self.read_bytes(4)?;
        Ok(i32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn read_i64(&mut self) -> Result<i64, ProtocolError> {
        let b = self.read_bytes(8)?;
        Ok(i64::from_be_bytes([
            b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7],
        ]))
    }

    fn read_f64(&mut self) -> Result<f64, ProtocolError> {
        let b = self.read_bytes(8)?;
        Ok(f64::from_be_bytes([
            b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7],
        ]))
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codes::{field, msg};

    fn round_trip(message: &Message) -> Message {
        let encoded = encode(message, false);
        decode(&encoded).expect("decode failed")
    }

    #[test]
    fn test_empty_message_round_trip() {
        let message = Message::new(msg::GET_SERVER_INFO, 1);
        assert_eq!(round_trip(&message), message);
    }

    #[test]
    fn test_all_field_types_round_trip() {
        let mut message = Message::new(msg::LOGIN, 42);
        message.set_int16(0x100, -7);
        message.set_int32(0x101, i32::MIN);
        message.set_int64(0x102, i64::MAX);
        message.set_float(0x103, -2.5);
        message.set_text(0x104, "verwaltungsserver \u{2713}");
        message.set_binary(0x105, vec![0u8, 0xFF, 0x7F]);
        message.set_timestamp(0x106, 1_700_000_000);
        assert_eq!(round_trip(&message), message);
    }

    #[test]
    fn test_empty_text_and_binary_fields_round_trip() {
        let mut message = Message::new(msg::LOGIN, 3);
        message.set_text(0x100, "");
        message.set_binary(0x101, Vec::new());
        assert_eq!(round_trip(&message), message);
    }

    #[test]
    fn test_binary_message_round_trip() {
        let mut message = Message::new(msg::FILE_DATA, 9);
        message.set_binary_data((0..=255u8).collect());
        message.set_end_of_file(true);
        assert_eq!(round_trip(&message), message);
    }

    #[test]
    fn test_compressed_round_trip_clears_transport_flag() {
        let mut message = Message::new(msg::PUSH_DATA, 11);
        message.set_binary(0x100, vec![0x42u8; 4096]);

        let encoded = encode(&message, true);
        let header_flags = u16::from_be_bytes([encoded[2], encoded[3]]);
        assert!(header_flags & flags::COMPRESSED != 0, "4 KiB of repeats must compress");
        assert!(encoded.len() < HEADER_SIZE + 4096 + 9);

        let decoded = decode(&encoded).expect("decode failed");
        assert_eq!(decoded, message);
        assert!(!decoded.has_flag(flags::COMPRESSED));
    }

    #[test]
    fn test_small_body_is_never_compressed() {
        let mut message = Message::new(msg::PUSH_DATA, 12);
        message.set_text(0x100, "tiny");
        let encoded = encode(&message, true);
        let header_flags = u16::from_be_bytes([encoded[2], encoded[3]]);
        assert_eq!(header_flags & flags::COMPRESSED, 0);
    }

    #[test]
    fn test_incompressible_body_is_sent_plain() {
        // A pseudo-random body larger than the threshold that zlib cannot shrink.
        let mut state = 0x12345678u32;
        let data: Vec<u8> = (0..512)
            .map(|_| {
                state = state.wrapping_mul(1664525).wrapping_add(1013904223);
                (state >> 24) as u8
            })
            .collect();
        let mut message = Message::new(msg::FILE_DATA, 13);
        message.set_binary_data(data);

        let encoded = encode(&message, true);
        let decoded = decode(&encoded).expect("decode failed");
        assert_eq!(decoded, message);
    }

    #[test]
    fn test_decode_truncated_header() {
        let result = decode(&[0x00, 0x10, 0x00]);
        assert!(matches!(result, Err(ProtocolError::Truncated { .. })));
    }

    #[test]
    fn test_decode_frame_length_mismatch() {
        let message = Message::new(msg::GET_SERVER_INFO, 1);
        let mut encoded = encode(&message, false);
        encoded.push(0xAA); // trailing garbage not covered by frame_len
        assert!(matches!(
            decode(&encoded),
            Err(ProtocolError::LengthMismatch { .. })
        ));
    }

    #[test]
    fn test_decode_truncated_field_payload() {
        let mut message = Message::new(msg::LOGIN, 2);
        message.set_text(field::LOGIN_NAME, "admin");
        let mut encoded = encode(&message, false);
        // Claim a longer text than the frame carries.
        let text_len_offset = HEADER_SIZE + 4 + 1;
        encoded[text_len_offset..text_len_offset + 4].copy_from_slice(&100u32.to_be_bytes());
        assert!(matches!(
            decode(&encoded),
            Err(ProtocolError::Truncated { .. })
        ));
    }

    #[test]
    fn test_decode_unknown_type_tag() {
        let mut message = Message::new(msg::LOGIN, 2);
        message.set_int16(field::CIPHER, 1);
        let mut encoded = encode(&message, false);
        encoded[HEADER_SIZE + 4] = 0x7E;
        assert_eq!(decode(&encoded), Err(ProtocolError::UnknownTypeTag(0x7E)));
    }

    #[test]
    fn test_decode_invalid_utf8_text_field() {
        let mut message = Message::new(msg::LOGIN, 2);
        message.set_text(field::LOGIN_NAME, "ab");
        let mut encoded = encode(&message, false);
        encoded[HEADER_SIZE + 9] = 0xFF; // first content byte
        assert_eq!(
            decode(&encoded),
            Err(ProtocolError::BadUtf8 {
                field_id: field::LOGIN_NAME
            })
        );
    }

    #[test]
    fn test_decode_corrupt_compressed_body() {
        let mut message = Message::new(msg::PUSH_DATA, 4);
        message.set_binary(0x100, vec![7u8; 1024]);
        let mut encoded = encode(&message, true);
        let last = encoded.len() - 1;
        encoded[HEADER_SIZE + 6] ^= 0xFF;
        encoded[last] ^= 0xFF;
        assert!(matches!(
            decode(&encoded),
            Err(ProtocolError::Decompress(_))
        ));
    }

    #[test]
    fn test_binary_payload_length_must_match_aux() {
        let mut message = Message::new(msg::FILE_DATA, 5);
        message.set_binary_data(vec![1, 2, 3, 4]);
        let mut encoded = encode(&message, false);
        // Tamper with aux (payload length) while keeping frame_len intact.
        encoded[12..16].copy_from_slice(&3u32.to_be_bytes());
        assert!(matches!(
            decode(&encoded),
            Err(ProtocolError::LengthMismatch { .. })
        ));
    }
}
