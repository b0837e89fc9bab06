//! Protocol constants shared by the encoder and the decoder.
//!
//! Every numeric code that appears on the wire is named here: message codes,
//! field ids, header flags, cipher ids, and the server completion codes.
//! Adding a message type or field is a single edit in this module.

/// Protocol version spoken by this client. The server reports its own version
/// in the capability reply; a mismatch is fatal.
pub const PROTOCOL_VERSION: i32 = 1;

/// Well-known TCP port of the management server.
pub const DEFAULT_PORT: u16 = 4747;

/// Fixed message header size in bytes.
pub const HEADER_SIZE: usize = 16;

/// Initial receive buffer size.
pub const DEFAULT_RECV_BUFFER: usize = 64 * 1024;

/// Hard cap on a single frame. A frame declaring more than this is treated
/// as hostile or corrupt and kills the connection.
pub const MAX_RECV_BUFFER: usize = 256 * 1024;

/// Chunk size for binary payload transfer.
pub const FILE_CHUNK_SIZE: usize = 128 * 1024;

/// Bodies at or below this size are never compressed.
pub const COMPRESSION_THRESHOLD: usize = 128;

// ── Header flags ──────────────────────────────────────────────────────────────

/// Bit flags carried in the message header.
pub mod flags {
    /// Message carries a raw binary payload instead of typed fields.
    pub const BINARY: u16 = 0x0001;
    /// Final chunk of a chunked transfer.
    pub const END_OF_FILE: u16 = 0x0002;
    /// Never encrypt this message, even with an active encryption context.
    pub const PLAIN: u16 = 0x0004;
    /// Body is zlib-compressed. Set by the encoder, never by callers.
    pub const COMPRESSED: u16 = 0x0008;
}

// ── Message codes ─────────────────────────────────────────────────────────────

/// Message (command) codes.
///
/// Codes `0x0001..=0x000F` are reserved for protocol control messages that
/// the receiver loop consumes itself; they never reach application code and
/// application commands must not reuse them.
pub mod msg {
    /// Envelope wrapping an encrypted frame.
    pub const ENCRYPTED_ENVELOPE: u16 = 0x0001;
    /// Server → client: public key and supported-cipher mask.
    pub const REQUEST_SESSION_KEY: u16 = 0x0002;
    /// Client → server: wrapped session key material.
    pub const SESSION_KEY: u16 = 0x0003;
    /// Server → client: periodic liveness probe carrying the server clock.
    pub const KEEPALIVE: u16 = 0x0004;

    /// Generic completion reply carrying a result code.
    pub const REQUEST_COMPLETED: u16 = 0x0010;
    pub const GET_SERVER_INFO: u16 = 0x0011;
    pub const LOGIN: u16 = 0x0012;
    pub const LOGIN_RESPONSE: u16 = 0x0013;
    pub const REQUEST_ENCRYPTION: u16 = 0x0014;

    pub const PUSH_DATA: u16 = 0x0020;
    pub const REPORT_DEVICE_INFO: u16 = 0x0021;
    pub const REPORT_DEVICE_STATUS: u16 = 0x0022;
    pub const FILE_DATA: u16 = 0x0023;
    pub const ABORT_FILE_TRANSFER: u16 = 0x0024;
    pub const REPORT_READY: u16 = 0x0025;
}

/// Returns `true` for codes in the reserved control range.
pub fn is_control(code: u16) -> bool {
    (0x0001..=0x000F).contains(&code)
}

// ── Field ids ─────────────────────────────────────────────────────────────────

/// Field ids.
pub mod field {
    pub const RCC: u32 = 0x01;
    pub const PROTOCOL_VERSION: u32 = 0x02;
    pub const SERVER_VERSION: u32 = 0x03;
    pub const TIMESTAMP: u32 = 0x04;
    pub const LOGIN_NAME: u32 = 0x05;
    pub const PASSWORD: u32 = 0x06;
    pub const DEVICE_ID: u32 = 0x07;
    pub const CLIENT_INFO: u32 = 0x08;
    pub const OS_INFO: u32 = 0x09;

    pub const PUBLIC_KEY: u32 = 0x0A;
    pub const EPHEMERAL_KEY: u32 = 0x0B;
    pub const SESSION_KEY: u32 = 0x0C;
    pub const SESSION_IV: u32 = 0x0D;
    pub const CIPHER: u32 = 0x0E;
    pub const KEY_LENGTH: u32 = 0x0F;
    pub const IV_LENGTH: u32 = 0x10;
    pub const SUPPORTED_CIPHERS: u32 = 0x11;

    pub const ITEM_COUNT: u32 = 0x12;
    pub const FLAGS: u32 = 0x13;
    pub const BATTERY_LEVEL: u32 = 0x14;
    pub const VENDOR: u32 = 0x15;
    pub const MODEL: u32 = 0x16;
    pub const OS_NAME: u32 = 0x17;
    pub const OS_VERSION: u32 = 0x18;
    pub const SERIAL_NUMBER: u32 = 0x19;
    pub const USER_NAME: u32 = 0x1A;
    pub const FILE_NAME: u32 = 0x1B;
    pub const FILE_SIZE: u32 = 0x1C;
    pub const STATUS: u32 = 0x1D;
    pub const JOB_ID: u32 = 0x1E;

    /// Base id of the repeating push-item group. Each item occupies
    /// [`PUSH_ITEM_STRIDE`] consecutive ids: target, metric, value.
    pub const PUSH_DATA_BASE: u32 = 0x1000;
    pub const PUSH_ITEM_STRIDE: u32 = 0x04;
}

// ── Cipher ids ────────────────────────────────────────────────────────────────

/// Cipher ids used in the session-key exchange. The bitmask advertised by
/// the server is `1 << (id - 1)` per cipher.
pub mod cipher {
    pub const CHACHA20_POLY1305: u16 = 0x01;
    pub const XCHACHA20_POLY1305: u16 = 0x02;
    /// Defined by the protocol but not available in this client.
    pub const AES_256_GCM: u16 = 0x03;
    /// Defined by the protocol but not available in this client.
    pub const AES_128_GCM: u16 = 0x04;
}

// ── Server completion codes ───────────────────────────────────────────────────

/// Completion code returned by the server in the `RCC` field.
///
/// A closed enum with a message table, so callers match on the kind instead
/// of parsing text. Codes this client does not know map to [`Unknown`].
///
/// [`Unknown`]: ResultCode::Unknown
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultCode {
    Success,
    AccessDenied,
    InvalidRequest,
    Timeout,
    NotConnected,
    UnsupportedAuth,
    BadProtocol,
    InvalidCredentials,
    EncryptionError,
    NoCiphers,
    IoError,
    InternalError,
    FileTransferAborted,
    Unknown(u32),
}

impl ResultCode {
    pub fn from_u32(value: u32) -> Self {
        match value {
            0 => ResultCode::Success,
            1 => ResultCode::AccessDenied,
            2 => ResultCode::InvalidRequest,
            3 => ResultCode::Timeout,
            4 => ResultCode::NotConnected,
            5 => ResultCode::UnsupportedAuth,
            6 => ResultCode::BadProtocol,
            7 => ResultCode::InvalidCredentials,
            8 => ResultCode::EncryptionError,
            9 => ResultCode::NoCiphers,
            10 => ResultCode::IoError,
            11 => ResultCode::InternalError,
            12 => ResultCode::FileTransferAborted,
            other => ResultCode::Unknown(other),
        }
    }

    pub fn as_u32(self) -> u32 {
        match self {
            ResultCode::Success => 0,
            ResultCode::AccessDenied => 1,
            ResultCode::InvalidRequest => 2,
            ResultCode::Timeout => 3,
            ResultCode::NotConnected => 4,
            ResultCode::UnsupportedAuth => 5,
            ResultCode::BadProtocol => 6,
            ResultCode::InvalidCredentials => 7,
            ResultCode::EncryptionError => 8,
            ResultCode::NoCiphers => 9,
            ResultCode::IoError => 10,
            ResultCode::InternalError => 11,
            ResultCode::FileTransferAborted => 12,
            ResultCode::Unknown(other) => other,
        }
    }

    /// Human-readable description for logs and error messages.
    pub fn message(self) -> &'static str {
        match self {
            ResultCode::Success => "success",
            ResultCode::AccessDenied => "access denied",
            ResultCode::InvalidRequest => "invalid request",
            ResultCode::Timeout => "request timed out",
            ResultCode::NotConnected => "not connected",
            ResultCode::UnsupportedAuth => "unsupported authentication method",
            ResultCode::BadProtocol => "incompatible protocol version",
            ResultCode::InvalidCredentials => "invalid login name or password",
            ResultCode::EncryptionError => "encryption error",
            ResultCode::NoCiphers => "no common cipher",
            ResultCode::IoError => "server-side I/O error",
            ResultCode::InternalError => "internal server error",
            ResultCode::FileTransferAborted => "file transfer aborted",
            ResultCode::Unknown(_) => "unknown error",
        }
    }
}

impl std::fmt::Display for ResultCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.message(), self.as_u32())
    }
}
