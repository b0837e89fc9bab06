//! # msp-proto
//!
//! Wire protocol for the management session protocol: the in-memory message
//! model, the binary codec, streaming frame reassembly, and chunked binary
//! payload transfer.
//!
//! This crate is pure protocol: it has no dependency on sockets, crypto, or
//! OS APIs. The session engine (`msp-session`) composes it with a TCP
//! stream and an encryption context; the device agent and the reporting
//! connector never touch this crate directly except through message codes.
//!
//! - **`codes`** – the protocol-constants table: message codes, field ids,
//!   flags, cipher ids, and the server completion-code enum.
//! - **`message`** – [`Message`]: code, request id, ordered typed fields,
//!   optional raw payload.
//! - **`codec`** – [`encode`]/[`decode`] between messages and frames.
//! - **`frame`** – [`FrameReader`]: reassembles complete frames from a
//!   stream, enforcing the receive-size cap.
//! - **`chunk`** – splitting and reassembly of large binary payloads.

pub mod chunk;
pub mod codec;
pub mod codes;
pub mod frame;
pub mod message;

pub use chunk::{chunk_count, chunk_message, split_chunks, ChunkAssembler, ChunkError};
pub use codec::{decode, encode, ProtocolError};
pub use codes::ResultCode;
pub use frame::{FrameError, FrameReader};
pub use message::{FieldValue, Message};
