//! Session facade: connection lifecycle and the request/reply surface.
//!
//! A [`Session`] owns the socket, the background receiver task, the
//! encryption context, and the request-id counter. Any number of tasks may
//! send and wait concurrently; writes are serialized by one lock (shared
//! with the receiver's inline handshake replies), while reply delivery runs
//! under the correlator's own lock so a slow write never delays it.
//!
//! The blocking-request pattern used by every high-level operation is
//! register → send → wait: the pending slot exists before the request bytes
//! hit the wire, so a reply can never arrive unregistered.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex as StdMutex, OnceLock};
use std::time::{Duration, Instant, SystemTime};

use msp_proto::chunk::{chunk_message, split_chunks};
use msp_proto::codes::{field, msg, ResultCode, FILE_CHUNK_SIZE, PROTOCOL_VERSION};
use msp_proto::{encode, Message};
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::SessionConfig;
use crate::correlator::{MessageWaitQueue, WaitHandle};
use crate::crypto::EncryptionContext;
use crate::error::SessionError;
use crate::receiver;

/// Lifecycle of a session. Application requests are accepted only in
/// [`Established`].
///
/// [`Established`]: SessionState::Established
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Handshaking,
    Authenticating,
    Established,
    Closing,
}

/// One value pushed to the server: a metric of a target object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushItem {
    pub target: String,
    pub metric: String,
    pub value: String,
}

impl PushItem {
    pub fn new(
        target: impl Into<String>,
        metric: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        Self {
            target: target.into(),
            metric: metric.into(),
            value: value.into(),
        }
    }
}

/// Static device description reported once after login.
#[derive(Debug, Clone, Default)]
pub struct DeviceInfo {
    pub vendor: String,
    pub model: String,
    pub os_name: String,
    pub os_version: String,
    pub serial_number: String,
    pub user_name: Option<String>,
}

/// Volatile device state reported periodically.
#[derive(Debug, Clone, Copy)]
pub struct DeviceStatus {
    pub flags: i32,
    /// Percent, or -1 when unknown or not applicable.
    pub battery_level: i32,
}

// ── Shared state ──────────────────────────────────────────────────────────────

/// State shared between the facade and the receiver task.
pub(crate) struct Shared {
    pub(crate) config: SessionConfig,
    pub(crate) writer: tokio::sync::Mutex<Option<OwnedWriteHalf>>,
    pub(crate) crypto: OnceLock<EncryptionContext>,
    pub(crate) wait_queue: MessageWaitQueue,
    next_request_id: AtomicU32,
    state: StdMutex<SessionState>,
    server_version: StdMutex<Option<String>>,
    /// Last server-reported clock value and when it was received.
    server_clock: StdMutex<Option<(i64, Instant)>>,
}

impl Shared {
    fn new(config: SessionConfig, writer: OwnedWriteHalf) -> Self {
        Self {
            config,
            writer: tokio::sync::Mutex::new(Some(writer)),
            crypto: OnceLock::new(),
            wait_queue: MessageWaitQueue::new(),
            next_request_id: AtomicU32::new(1),
            state: StdMutex::new(SessionState::Disconnected),
            server_version: StdMutex::new(None),
            server_clock: StdMutex::new(None),
        }
    }

    pub(crate) fn state(&self) -> SessionState {
        *self.state.lock().expect("state lock poisoned")
    }

    pub(crate) fn set_state(&self, state: SessionState) {
        *self.state.lock().expect("state lock poisoned") = state;
    }

    pub(crate) fn record_server_time(&self, timestamp: i64) {
        *self.server_clock.lock().expect("clock lock poisoned") =
            Some((timestamp, Instant::now()));
    }

    fn next_request_id(&self) -> u32 {
        self.next_request_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Encodes, encrypts (unless the message is flagged plain), and writes
    /// one message under the write lock.
    pub(crate) async fn send(&self, message: &Message) -> Result<(), SessionError> {
        let mut wire = encode(message, self.config.allow_compression);
        if !message.is_plain() {
            if let Some(context) = self.crypto.get() {
                wire = context.encrypt_frame(&wire)?;
            }
        }
        let mut guard = self.writer.lock().await;
        let writer = guard.as_mut().ok_or(SessionError::NotConnected)?;
        writer.write_all(&wire).await?;
        Ok(())
    }

    /// Called by the receiver when its loop ends for any reason.
    pub(crate) fn teardown(&self) {
        self.wait_queue.shutdown();
        self.set_state(SessionState::Disconnected);
    }
}

// ── Pure message builders ─────────────────────────────────────────────────────

fn apply_push_items(message: &mut Message, items: &[PushItem]) {
    message.set_int32(field::ITEM_COUNT, items.len() as i32);
    let mut id = field::PUSH_DATA_BASE;
    for item in items {
        message.set_text(id, item.target.clone());
        message.set_text(id + 1, item.metric.clone());
        message.set_text(id + 2, item.value.clone());
        id += field::PUSH_ITEM_STRIDE;
    }
}

fn apply_device_info(message: &mut Message, info: &DeviceInfo) {
    message.set_text(field::VENDOR, info.vendor.clone());
    message.set_text(field::MODEL, info.model.clone());
    message.set_text(field::OS_NAME, info.os_name.clone());
    message.set_text(field::OS_VERSION, info.os_version.clone());
    message.set_text(field::SERIAL_NUMBER, info.serial_number.clone());
    if let Some(user) = &info.user_name {
        message.set_text(field::USER_NAME, user.clone());
    }
}

fn result_code(message: &Message) -> ResultCode {
    match message.get_int32(field::RCC) {
        Some(raw) => ResultCode::from_u32(raw as u32),
        None => ResultCode::Unknown(u32::MAX),
    }
}

// ── Session ───────────────────────────────────────────────────────────────────

/// A live connection to the management server.
pub struct Session {
    shared: Arc<Shared>,
    receiver: StdMutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("state", &self.shared.state())
            .finish_non_exhaustive()
    }
}

impl Session {
    /// Connects, verifies protocol compatibility, optionally negotiates
    /// encryption, and logs in.
    ///
    /// On any failure everything opened so far is torn down before the
    /// error is returned. There is no automatic retry.
    pub async fn connect(config: SessionConfig) -> Result<Self, SessionError> {
        info!("connecting to {}:{}", config.address, config.port);
        let stream = TcpStream::connect((config.address.as_str(), config.port)).await?;
        let (read_half, write_half) = stream.into_split();

        let shared = Arc::new(Shared::new(config, write_half));
        shared.set_state(SessionState::Connecting);
        let task = tokio::spawn(receiver::run(read_half, Arc::clone(&shared)));

        let session = Session {
            shared,
            receiver: StdMutex::new(Some(task)),
        };
        match session.establish().await {
            Ok(()) => Ok(session),
            Err(e) => {
                session.disconnect().await;
                Err(e)
            }
        }
    }

    /// Drives the connect sequence: capability exchange, optional
    /// encryption, login.
    async fn establish(&self) -> Result<(), SessionError> {
        let timeout = self.shared.config.command_timeout();

        // Capability exchange and protocol-version check.
        let request = self.new_message(msg::GET_SERVER_INFO);
        let handle = self
            .shared
            .wait_queue
            .register(msg::REQUEST_COMPLETED, request.request_id())?;
        self.shared.send(&request).await?;
        let reply = self.shared.wait_queue.wait(handle, timeout).await?;

        let actual = reply.get_int32(field::PROTOCOL_VERSION).unwrap_or(0);
        if actual != PROTOCOL_VERSION {
            warn!("server speaks protocol version {actual}; not attempting login");
            return Err(SessionError::ProtocolVersionMismatch {
                expected: PROTOCOL_VERSION,
                actual,
            });
        }
        if let Some(version) = reply.get_text(field::SERVER_VERSION) {
            debug!("server version {version}");
            *self
                .shared
                .server_version
                .lock()
                .expect("version lock poisoned") = Some(version.to_string());
        }
        if let Some(timestamp) = reply.get_int64(field::TIMESTAMP) {
            self.shared.record_server_time(timestamp);
        }

        // Encryption, when requested. The completion round-trip bounds the
        // whole key exchange: the server acknowledges only after accepting
        // our session key, and frames arrive in order, so by the time the
        // acknowledgement is delivered the context either exists or the
        // negotiation failed.
        if self.shared.config.use_encryption {
            self.shared.set_state(SessionState::Handshaking);
            let request = self.new_message(msg::REQUEST_ENCRYPTION);
            let handle = self
                .shared
                .wait_queue
                .register(msg::REQUEST_COMPLETED, request.request_id())?;
            self.shared.send(&request).await?;
            let reply = self.shared.wait_queue.wait(handle, timeout).await?;
            let rcc = result_code(&reply);
            if rcc != ResultCode::Success {
                return Err(SessionError::EncryptionNegotiation(format!(
                    "server refused encryption: {rcc}"
                )));
            }
            if self.shared.crypto.get().is_none() {
                return Err(SessionError::EncryptionNegotiation(
                    "server acknowledged encryption without a key exchange".into(),
                ));
            }
        }

        // Login.
        self.shared.set_state(SessionState::Authenticating);
        let config = &self.shared.config;
        let mut request = self.new_message(msg::LOGIN);
        request.set_text(field::DEVICE_ID, config.device_id.clone());
        request.set_text(field::LOGIN_NAME, config.login_name.clone());
        request.set_text(field::PASSWORD, config.password.clone());
        request.set_text(field::CLIENT_INFO, config.client_info.clone());
        request.set_text(
            field::OS_INFO,
            format!("{} {}", std::env::consts::OS, std::env::consts::ARCH),
        );
        let handle = self
            .shared
            .wait_queue
            .register(msg::LOGIN_RESPONSE, request.request_id())?;
        self.shared.send(&request).await?;
        let reply = self.shared.wait_queue.wait(handle, timeout).await?;
        let rcc = result_code(&reply);
        if rcc != ResultCode::Success {
            warn!("login failed: {rcc}");
            return Err(SessionError::Authentication(rcc));
        }

        self.shared.set_state(SessionState::Established);
        info!("connected and logged in");
        Ok(())
    }

    pub fn state(&self) -> SessionState {
        self.shared.state()
    }

    pub fn server_version(&self) -> Option<String> {
        self.shared
            .server_version
            .lock()
            .expect("version lock poisoned")
            .clone()
    }

    /// Server clock estimate: the last reported timestamp (capability reply
    /// or keepalive) advanced by the local time since it arrived.
    pub fn server_time(&self) -> Option<SystemTime> {
        let clock = self.shared.server_clock.lock().expect("clock lock poisoned");
        clock.map(|(timestamp, received_at)| {
            SystemTime::UNIX_EPOCH
                + Duration::from_secs(timestamp.max(0) as u64)
                + received_at.elapsed()
        })
    }

    /// Allocates a message with the next request id.
    pub fn new_message(&self, code: u16) -> Message {
        Message::new(code, self.shared.next_request_id())
    }

    /// Encodes, encrypts, and writes one message. Send-and-forget; pair
    /// with [`register_completion`] + [`wait_for_completion`] for a
    /// blocking request.
    ///
    /// [`register_completion`]: Session::register_completion
    /// [`wait_for_completion`]: Session::wait_for_completion
    pub async fn send_message(&self, message: &Message) -> Result<(), SessionError> {
        if self.shared.state() != SessionState::Established {
            return Err(SessionError::NotConnected);
        }
        self.shared.send(message).await
    }

    /// Registers for a reply with the given code and request id. Must be
    /// called before the request is sent.
    pub fn register_reply(&self, code: u16, request_id: u32) -> Result<WaitHandle, SessionError> {
        self.shared.wait_queue.register(code, request_id)
    }

    /// Registers for the generic completion reply of `request_id`.
    pub fn register_completion(&self, request_id: u32) -> Result<WaitHandle, SessionError> {
        self.register_reply(msg::REQUEST_COMPLETED, request_id)
    }

    /// Waits for a registered reply.
    pub async fn wait_for_message(
        &self,
        handle: WaitHandle,
        timeout: Duration,
    ) -> Result<Message, SessionError> {
        self.shared.wait_queue.wait(handle, timeout).await
    }

    /// Waits for a completion reply with the default command timeout and
    /// turns a non-success result code into [`SessionError::Server`].
    pub async fn wait_for_completion(&self, handle: WaitHandle) -> Result<Message, SessionError> {
        self.wait_for_completion_timeout(handle, self.shared.config.command_timeout())
            .await
    }

    /// [`wait_for_completion`] with an explicit timeout.
    ///
    /// [`wait_for_completion`]: Session::wait_for_completion
    pub async fn wait_for_completion_timeout(
        &self,
        handle: WaitHandle,
        timeout: Duration,
    ) -> Result<Message, SessionError> {
        let reply = self.shared.wait_queue.wait(handle, timeout).await?;
        let rcc = result_code(&reply);
        if rcc != ResultCode::Success {
            return Err(SessionError::Server(rcc));
        }
        Ok(reply)
    }

    /// Sends a command without arguments and waits for its completion.
    pub async fn execute_simple_command(&self, code: u16) -> Result<(), SessionError> {
        let request = self.new_message(code);
        let handle = self.register_completion(request.request_id())?;
        self.send_message(&request).await?;
        self.wait_for_completion(handle).await.map(|_| ())
    }

    /// Pushes a batch of values and waits for the acknowledgement.
    pub async fn push_data(&self, items: &[PushItem]) -> Result<(), SessionError> {
        let mut request = self.new_message(msg::PUSH_DATA);
        apply_push_items(&mut request, items);
        let handle = self.register_completion(request.request_id())?;
        self.send_message(&request).await?;
        self.wait_for_completion(handle).await.map(|_| ())
    }

    /// Reports the static device description.
    pub async fn report_device_info(&self, info: &DeviceInfo) -> Result<(), SessionError> {
        let mut request = self.new_message(msg::REPORT_DEVICE_INFO);
        apply_device_info(&mut request, info);
        let handle = self.register_completion(request.request_id())?;
        self.send_message(&request).await?;
        self.wait_for_completion(handle).await.map(|_| ())
    }

    /// Reports the volatile device state.
    pub async fn report_device_status(&self, status: &DeviceStatus) -> Result<(), SessionError> {
        let mut request = self.new_message(msg::REPORT_DEVICE_STATUS);
        request.set_int32(field::FLAGS, status.flags);
        request.set_int32(field::BATTERY_LEVEL, status.battery_level);
        if let Ok(now) = SystemTime::now().duration_since(SystemTime::UNIX_EPOCH) {
            request.set_timestamp(field::TIMESTAMP, now.as_secs() as i64);
        }
        let handle = self.register_completion(request.request_id())?;
        self.send_message(&request).await?;
        self.wait_for_completion(handle).await.map(|_| ())
    }

    /// Streams `payload` as binary chunks under `request_id`; the final (or
    /// short) chunk carries the end-of-file flag. A failure mid-transfer
    /// sends an explicit abort so the receiver never mistakes truncation
    /// for completion.
    pub async fn send_chunked(
        &self,
        request_id: u32,
        payload: &[u8],
    ) -> Result<(), SessionError> {
        for (chunk, is_last) in split_chunks(payload, FILE_CHUNK_SIZE) {
            let message = chunk_message(request_id, chunk, is_last);
            if let Err(e) = self.send_message(&message).await {
                let mut abort = Message::new(msg::ABORT_FILE_TRANSFER, request_id);
                abort.set_binary_data(Vec::new());
                if self.shared.send(&abort).await.is_err() {
                    debug!("abort notification failed; connection is gone");
                }
                return Err(e);
            }
        }
        Ok(())
    }

    /// Closes the session: stops the receiver (unblocking its pending
    /// read), shuts the socket down, and cancels every outstanding wait so
    /// no caller is left hanging. Idempotent.
    pub async fn disconnect(&self) {
        {
            let mut state = self.shared.state.lock().expect("state lock poisoned");
            if *state == SessionState::Disconnected {
                return;
            }
            *state = SessionState::Closing;
        }

        {
            let mut writer = self.shared.writer.lock().await;
            if let Some(mut write_half) = writer.take() {
                let _ = write_half.shutdown().await;
            }
        }

        let task = self
            .receiver
            .lock()
            .expect("receiver lock poisoned")
            .take();
        if let Some(task) = task {
            // Aborting drops the read half, which closes the socket and
            // unblocks the pending read.
            task.abort();
            let _ = task.await;
        }

        self.shared.wait_queue.shutdown();
        self.shared.set_state(SessionState::Disconnected);
        info!("session closed");
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        // Best effort for sessions dropped without an explicit disconnect:
        // stop the receiver and wake blocked callers. The socket closes
        // when the halves are dropped.
        if let Ok(mut receiver) = self.receiver.lock() {
            if let Some(task) = receiver.take() {
                task.abort();
            }
        }
        self.shared.wait_queue.shutdown();
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_items_layout() {
        let mut message = Message::new(msg::PUSH_DATA, 1);
        apply_push_items(
            &mut message,
            &[
                PushItem::new("router-1", "cpu.load", "0.71"),
                PushItem::new("router-2", "uptime", "86400"),
            ],
        );

        assert_eq!(message.get_int32(field::ITEM_COUNT), Some(2));
        assert_eq!(message.get_text(field::PUSH_DATA_BASE), Some("router-1"));
        assert_eq!(message.get_text(field::PUSH_DATA_BASE + 1), Some("cpu.load"));
        assert_eq!(message.get_text(field::PUSH_DATA_BASE + 2), Some("0.71"));
        let second = field::PUSH_DATA_BASE + field::PUSH_ITEM_STRIDE;
        assert_eq!(message.get_text(second), Some("router-2"));
        assert_eq!(message.get_text(second + 2), Some("86400"));
    }

    #[test]
    fn test_device_info_omits_absent_user() {
        let mut message = Message::new(msg::REPORT_DEVICE_INFO, 1);
        apply_device_info(
            &mut message,
            &DeviceInfo {
                vendor: "Acme".into(),
                model: "Edge-100".into(),
                os_name: "linux".into(),
                os_version: "6.8".into(),
                serial_number: "SN-0001".into(),
                user_name: None,
            },
        );
        assert_eq!(message.get_text(field::VENDOR), Some("Acme"));
        assert!(!message.contains(field::USER_NAME));
    }

    #[test]
    fn test_result_code_defaults_to_unknown_when_missing() {
        let message = Message::new(msg::REQUEST_COMPLETED, 1);
        assert_eq!(result_code(&message), ResultCode::Unknown(u32::MAX));
    }
}
