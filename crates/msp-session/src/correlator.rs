//! Request/reply correlation.
//!
//! Every blocking request registers a pending slot *before* the request
//! bytes reach the socket, closing the race against a reply that arrives
//! immediately. The receiver loop feeds decoded messages into
//! [`MessageWaitQueue::deliver`], which hands each to exactly one waiter.
//! Replies nobody registered for are dropped: they are either unsolicited
//! notifications handled elsewhere or stale duplicates.
//!
//! The registry lock is independent of the socket write lock, so a slow
//! write never delays delivery of unrelated replies.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use msp_proto::Message;
use tokio::sync::oneshot;
use tracing::trace;

use crate::error::SessionError;

/// Key of a pending request: message code plus request id.
type Key = (u16, u32);

/// Handle for one registered pending request.
///
/// Dropping the handle without waiting leaves a dead slot that the next
/// delivery for this key removes; ids are never reused within a session, so
/// a dead slot can never capture a future caller's reply.
#[derive(Debug)]
pub struct WaitHandle {
    key: Key,
    rx: oneshot::Receiver<Message>,
}

#[derive(Default)]
struct Registry {
    pending: HashMap<Key, oneshot::Sender<Message>>,
    shut_down: bool,
}

/// Registry of outstanding requests with single-delivery semantics.
#[derive(Default)]
pub struct MessageWaitQueue {
    registry: Mutex<Registry>,
}

impl MessageWaitQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates the pending slot for `(code, request_id)`.
    ///
    /// Request ids are unique for the session lifetime, so a key collision
    /// cannot happen in correct use; a duplicate registration replaces the
    /// dead slot it implies.
    pub fn register(&self, code: u16, request_id: u32) -> Result<WaitHandle, SessionError> {
        let mut registry = self.registry.lock().expect("correlator lock poisoned");
        if registry.shut_down {
            return Err(SessionError::SessionClosed);
        }
        let (tx, rx) = oneshot::channel();
        registry.pending.insert((code, request_id), tx);
        Ok(WaitHandle {
            key: (code, request_id),
            rx,
        })
    }

    /// Delivers a message to its registered waiter, if any. Returns whether
    /// a waiter existed.
    pub fn deliver(&self, message: Message) -> bool {
        let key = (message.code(), message.request_id());
        let sender = {
            let mut registry = self.registry.lock().expect("correlator lock poisoned");
            registry.pending.remove(&key)
        };
        match sender {
            // send fails only if the waiter already gave up (timeout); the
            // slot is gone either way.
            Some(tx) => tx.send(message).is_ok(),
            None => {
                trace!(
                    code = key.0,
                    request_id = key.1,
                    "dropping message without a waiter"
                );
                false
            }
        }
    }

    /// Blocks until delivery or timeout. On timeout the pending slot is
    /// removed so it cannot linger for the rest of the session.
    pub async fn wait(
        &self,
        handle: WaitHandle,
        timeout: Duration,
    ) -> Result<Message, SessionError> {
        match tokio::time::timeout(timeout, handle.rx).await {
            Ok(Ok(message)) => Ok(message),
            // Sender dropped without a message: the queue was shut down.
            Ok(Err(_)) => Err(SessionError::SessionClosed),
            Err(_) => {
                let mut registry = self.registry.lock().expect("correlator lock poisoned");
                registry.pending.remove(&handle.key);
                Err(SessionError::Timeout)
            }
        }
    }

    /// Cancels every live waiter. Idempotent; later registrations fail
    /// with [`SessionError::SessionClosed`].
    pub fn shutdown(&self) {
        let mut registry = self.registry.lock().expect("correlator lock poisoned");
        registry.shut_down = true;
        // Dropping the senders wakes every waiter with a closed-channel
        // error, which `wait` maps to SessionClosed.
        registry.pending.clear();
    }

    #[cfg(test)]
    fn pending_count(&self) -> usize {
        self.registry.lock().unwrap().pending.len()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
