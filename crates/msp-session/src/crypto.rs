//! Transport encryption: cipher negotiation and the per-message envelope.
//!
//! The handshake is server-initiated. The server advertises an X25519
//! public key and a cipher bitmask; the client picks a cipher, generates a
//! random session key and IV, and returns them wrapped for the server's key
//! (ephemeral X25519 agreement, HKDF-SHA256, ChaCha20-Poly1305 key wrap).
//! Once established, every non-plain frame travels inside an encrypted
//! envelope frame: a random nonce followed by the AEAD ciphertext of the
//! inner frame, with the session IV bound as associated data. The AEAD tag
//! provides the integrity check.
//!
//! The context is created once per session and never mutated afterwards, so
//! it can be shared freely between the receiver task and senders.

use chacha20poly1305::aead::{Aead, KeyInit, Payload};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce, XChaCha20Poly1305, XNonce};
use hkdf::Hkdf;
use msp_proto::codes::{cipher as cipher_id, field, msg, ResultCode};
use msp_proto::{decode, encode, Message};
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::Sha256;
use tracing::debug;
use x25519_dalek::{EphemeralSecret, PublicKey};

use crate::error::SessionError;

/// HKDF info string for deriving the key-wrapping key from the X25519
/// shared secret. Part of the wire protocol.
pub const KEY_WRAP_INFO: &[u8] = b"msp-session-key-wrap";

/// Length of the derived key-wrapping key.
pub const KEY_WRAP_LEN: usize = 32;

/// Worst-case growth of a frame wrapped in an encrypted envelope: the
/// envelope header, the largest nonce, and the AEAD tag. The receiver adds
/// this to its frame cap so a maximum-size inner frame still fits.
pub const ENVELOPE_OVERHEAD: usize = 16 + 24 + 16;

// ── Cipher table ──────────────────────────────────────────────────────────────

/// Ciphers this client can actually run. The protocol also defines AES-GCM
/// ids; a server advertising only those gets a no-ciphers refusal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CipherId {
    ChaCha20Poly1305,
    XChaCha20Poly1305,
}

/// Local preference order, strongest nonce margin first.
pub const CIPHER_PREFERENCE: [CipherId; 2] =
    [CipherId::XChaCha20Poly1305, CipherId::ChaCha20Poly1305];

impl CipherId {
    pub fn from_wire(id: u16) -> Option<Self> {
        match id {
            cipher_id::CHACHA20_POLY1305 => Some(CipherId::ChaCha20Poly1305),
            cipher_id::XCHACHA20_POLY1305 => Some(CipherId::XChaCha20Poly1305),
            _ => None,
        }
    }

    pub fn wire(self) -> u16 {
        match self {
            CipherId::ChaCha20Poly1305 => cipher_id::CHACHA20_POLY1305,
            CipherId::XChaCha20Poly1305 => cipher_id::XCHACHA20_POLY1305,
        }
    }

    pub fn key_len(self) -> usize {
        32
    }

    /// IV length; doubles as the per-message nonce length.
    pub fn iv_len(self) -> usize {
        match self {
            CipherId::ChaCha20Poly1305 => 12,
            CipherId::XChaCha20Poly1305 => 24,
        }
    }

    /// Bit in the supported-ciphers mask.
    pub fn mask(self) -> u32 {
        1 << (self.wire() - 1)
    }

    pub fn name(self) -> &'static str {
        match self {
            CipherId::ChaCha20Poly1305 => "ChaCha20-Poly1305",
            CipherId::XChaCha20Poly1305 => "XChaCha20-Poly1305",
        }
    }
}

/// Picks the preferred locally-supported cipher out of a server mask.
pub fn select_cipher(server_mask: u32) -> Option<CipherId> {
    CIPHER_PREFERENCE
        .into_iter()
        .find(|c| server_mask & c.mask() != 0)
}

// ── Encryption context ────────────────────────────────────────────────────────

enum AeadCipher {
    ChaCha(ChaCha20Poly1305),
    XChaCha(XChaCha20Poly1305),
}

impl AeadCipher {
    fn seal(&self, nonce: &[u8], payload: Payload<'_, '_>) -> Result<Vec<u8>, SessionError> {
        match self {
            AeadCipher::ChaCha(aead) => aead.encrypt(Nonce::from_slice(nonce), payload),
            AeadCipher::XChaCha(aead) => aead.encrypt(XNonce::from_slice(nonce), payload),
        }
        .map_err(|_| SessionError::Encryption)
    }

    fn open(&self, nonce: &[u8], payload: Payload<'_, '_>) -> Result<Vec<u8>, SessionError> {
        match self {
            AeadCipher::ChaCha(aead) => aead.decrypt(Nonce::from_slice(nonce), payload),
            AeadCipher::XChaCha(aead) => aead.decrypt(XNonce::from_slice(nonce), payload),
        }
        .map_err(|_| SessionError::Encryption)
    }
}

/// Negotiated cipher state for one session.
pub struct EncryptionContext {
    cipher: CipherId,
    aead: AeadCipher,
    iv: Vec<u8>,
}

impl EncryptionContext {
    /// Builds a context from already-negotiated material. Used by the
    /// handshake and by peers that unwrapped the key on their side.
    pub fn from_parts(cipher: CipherId, key: &[u8], iv: Vec<u8>) -> Result<Self, SessionError> {
        if key.len() != cipher.key_len() || iv.len() != cipher.iv_len() {
            return Err(SessionError::EncryptionNegotiation(format!(
                "bad key material for {}: key {} bytes, iv {} bytes",
                cipher.name(),
                key.len(),
                iv.len()
            )));
        }
        let aead = match cipher {
            CipherId::ChaCha20Poly1305 => {
                AeadCipher::ChaCha(ChaCha20Poly1305::new(Key::from_slice(key)))
            }
            CipherId::XChaCha20Poly1305 => {
                AeadCipher::XChaCha(XChaCha20Poly1305::new(Key::from_slice(key)))
            }
        };
        Ok(Self { cipher, aead, iv })
    }

    /// Answers a server key-exchange request: selects a cipher, generates
    /// session key material, and returns the context together with the
    /// wrapped-key reply to send back.
    pub fn establish(request: &Message) -> Result<(Self, Message), SessionError> {
        let server_pub: [u8; 32] = request
            .get_binary(field::PUBLIC_KEY)
            .ok_or_else(|| negotiation("server public key missing from key request"))?
            .try_into()
            .map_err(|_| negotiation("server public key is not 32 bytes"))?;
        let server_mask = request.get_int32(field::SUPPORTED_CIPHERS).unwrap_or(0) as u32;

        let cipher = select_cipher(server_mask)
            .ok_or_else(|| negotiation(format!("no common cipher in mask 0x{server_mask:X}")))?;
        debug!("cipher selected: {}", cipher.name());

        let mut key = vec![0u8; cipher.key_len()];
        OsRng.fill_bytes(&mut key);
        let mut iv = vec![0u8; cipher.iv_len()];
        OsRng.fill_bytes(&mut iv);

        // Wrap key and IV for the server: ephemeral ECDH, HKDF, AEAD.
        let ephemeral = EphemeralSecret::random_from_rng(OsRng);
        let ephemeral_pub = PublicKey::from(&ephemeral);
        let shared = ephemeral.diffie_hellman(&PublicKey::from(server_pub));
        let wrap = wrap_cipher(shared.as_bytes())?;
        let wrapped_key = wrap_seal(&wrap, &key)?;
        let wrapped_iv = wrap_seal(&wrap, &iv)?;

        let mut reply = Message::new(msg::SESSION_KEY, request.request_id());
        reply.set_plain(true);
        reply.set_binary(field::EPHEMERAL_KEY, ephemeral_pub.as_bytes().to_vec());
        reply.set_binary(field::SESSION_KEY, wrapped_key);
        reply.set_binary(field::SESSION_IV, wrapped_iv);
        reply.set_int16(field::CIPHER, cipher.wire() as i16);
        reply.set_int16(field::KEY_LENGTH, cipher.key_len() as i16);
        reply.set_int16(field::IV_LENGTH, cipher.iv_len() as i16);
        reply.set_int32(field::RCC, ResultCode::Success.as_u32() as i32);

        let context = Self::from_parts(cipher, &key, iv)?;
        Ok((context, reply))
    }

    /// Builds the refusal reply sent when [`establish`] fails.
    ///
    /// [`establish`]: EncryptionContext::establish
    pub fn refusal(request: &Message) -> Message {
        let mut reply = Message::new(msg::SESSION_KEY, request.request_id());
        reply.set_plain(true);
        reply.set_int32(field::RCC, ResultCode::NoCiphers.as_u32() as i32);
        reply
    }

    pub fn cipher(&self) -> CipherId {
        self.cipher
    }

    /// Wraps one encoded frame in an encrypted envelope frame.
    pub fn encrypt_frame(&self, frame: &[u8]) -> Result<Vec<u8>, SessionError> {
        let mut nonce = vec![0u8; self.cipher.iv_len()];
        OsRng.fill_bytes(&mut nonce);
        let ciphertext = self.aead.seal(
            &nonce,
            Payload {
                msg: frame,
                aad: &self.iv,
            },
        )?;

        let mut payload = nonce;
        payload.extend_from_slice(&ciphertext);
        let mut envelope = Message::new(msg::ENCRYPTED_ENVELOPE, 0);
        envelope.set_binary_data(payload);
        Ok(encode(&envelope, false))
    }

    /// Unwraps an encrypted envelope frame back to the inner frame bytes.
    pub fn decrypt_frame(&self, frame: &[u8]) -> Result<Vec<u8>, SessionError> {
        let envelope = decode(frame)?;
        let payload = envelope.binary_data();
        let nonce_len = self.cipher.iv_len();
        if envelope.code() != msg::ENCRYPTED_ENVELOPE || payload.len() <= nonce_len {
            return Err(SessionError::Encryption);
        }
        let (nonce, ciphertext) = payload.split_at(nonce_len);
        self.aead.open(
            nonce,
            Payload {
                msg: ciphertext,
                aad: &self.iv,
            },
        )
    }
}

fn negotiation(detail: impl Into<String>) -> SessionError {
    SessionError::EncryptionNegotiation(detail.into())
}

/// Derives the key-wrapping cipher from an X25519 shared secret.
pub fn wrap_cipher(shared_secret: &[u8]) -> Result<ChaCha20Poly1305, SessionError> {
    let hk = Hkdf::<Sha256>::new(None, shared_secret);
    let mut okm = [0u8; KEY_WRAP_LEN];
    hk.expand(KEY_WRAP_INFO, &mut okm)
        .map_err(|_| negotiation("key derivation failed"))?;
    Ok(ChaCha20Poly1305::new(Key::from_slice(&okm)))
}

fn wrap_seal(wrap: &ChaCha20Poly1305, plaintext: &[u8]) -> Result<Vec<u8>, SessionError> {
    let mut nonce = [0u8; 12];
    OsRng.fill_bytes(&mut nonce);
    let ciphertext = wrap
        .encrypt(Nonce::from_slice(&nonce), plaintext)
        .map_err(|_| negotiation("key wrap failed"))?;
    let mut out = nonce.to_vec();
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

/// Opens a `nonce || ciphertext` blob produced by the key wrap. The server
/// side of the exchange; kept next to the wrap so the two stay in sync.
pub fn wrap_open(wrap: &ChaCha20Poly1305, blob: &[u8]) -> Result<Vec<u8>, SessionError> {
    if blob.len() <= 12 {
        return Err(negotiation("wrapped blob too short"));
    }
    let (nonce, ciphertext) = blob.split_at(12);
    wrap.decrypt(Nonce::from_slice(nonce), ciphertext)
        .map_err(|_| negotiation("key unwrap failed"))
}

// ── Tests ─────────────────────────────────────────────────────────────────────
