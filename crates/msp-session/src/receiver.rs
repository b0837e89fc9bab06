//! Background receiver loop.
//!
//! Exactly one task per session owns the read half of the socket. Frames
//! are processed strictly in arrival order: decrypt (when an envelope),
//! decode, then dispatch. Key-exchange requests and keepalives are consumed
//! here and never reach the correlator; everything else is offered to the
//! wait queue. Any I/O, framing, or crypto failure ends the loop and tears
//! the session down, waking every blocked caller.

use std::sync::Arc;

use msp_proto::codes::{field, msg};
use msp_proto::{decode, FrameReader, Message};
use tokio::net::tcp::OwnedReadHalf;
use tracing::{debug, info, trace, warn};

use crate::crypto::EncryptionContext;
use crate::error::SessionError;
use crate::session::Shared;

pub(crate) async fn run(mut read_half: OwnedReadHalf, shared: Arc<Shared>) {
    // Envelopes outgrow the frames they wrap; give the cap headroom for it.
    let mut frames = FrameReader::with_limits(
        shared.config.recv_buffer_size,
        shared.config.max_frame_size + crate::crypto::ENVELOPE_OVERHEAD,
    );

    loop {
        let frame = match frames.next_frame(&mut read_half).await {
            Ok(Some(frame)) => frame,
            Ok(None) => {
                debug!("server closed the connection");
                break;
            }
            Err(e) => {
                warn!("receive failed: {e}");
                break;
            }
        };

        // Peek at the code: envelopes must be unwrapped before decoding.
        let code = u16::from_be_bytes([frame[0], frame[1]]);
        let frame = if code == msg::ENCRYPTED_ENVELOPE {
            let Some(context) = shared.crypto.get() else {
                warn!("encrypted frame arrived before key negotiation");
                break;
            };
            match context.decrypt_frame(&frame) {
                Ok(inner) => inner,
                Err(e) => {
                    warn!("frame decryption failed: {e}");
                    break;
                }
            }
        } else {
            frame
        };

        let message = match decode(&frame) {
            Ok(message) => message,
            Err(e) => {
                warn!("malformed frame: {e}");
                break;
            }
        };

        match message.code() {
            msg::REQUEST_SESSION_KEY => {
                if answer_key_request(&shared, &message).await.is_err() {
                    break;
                }
            }
            msg::KEEPALIVE => {
                if let Some(timestamp) = message.get_int64(field::TIMESTAMP) {
                    shared.record_server_time(timestamp);
                }
                trace!("keepalive");
            }
            _ => {
                shared.wait_queue.deliver(message);
            }
        }
    }

    shared.teardown();
}

/// Answers a server key-exchange request inline. The reply goes out through
/// the shared write lock, serialized against concurrent senders.
async fn answer_key_request(
    shared: &Arc<Shared>,
    request: &Message,
) -> Result<(), SessionError> {
    let reply = match EncryptionContext::establish(request) {
        Ok((context, reply)) => {
            let cipher = context.cipher();
            if shared.crypto.set(context).is_err() {
                // A second key exchange on a live context would desync both
                // sides; ignore it.
                warn!("duplicate key exchange request ignored");
                return Ok(());
            }
            info!("transport encryption enabled ({})", cipher.name());
            reply
        }
        Err(e) => {
            warn!("cipher negotiation failed: {e}");
            EncryptionContext::refusal(request)
        }
    };
    shared.send(&reply).await
}
