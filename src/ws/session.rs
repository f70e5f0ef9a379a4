//! WebSocket session: handshake, writer task, reader task, closing handshake.
//!
//! # State Machine
//! ```text
//! Connecting ──101 + valid accept──→ Open ──close sent or received──→ Closing
//!                                      │                                 │
//!                                      │                  transport ends │
//!                                      │                 (or grace ends) ▼
//!                                      └──────transport error──→ Broken  Closed
//! ```
//!
//! The writer task drains the outgoing queue whenever it is woken, or at the
//! latest after the idle interval. The reader task is the only owner of the
//! fragment-assembly state and feeds complete messages into two inboxes
//! (text, binary) that the consumer drains with [`WebSocket::poll_inbox`].

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use bytes::{Buf, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use url::Url;

use crate::config::{ReconnectConfig, WebSocketConfig};
use crate::http::headers::HeaderSet;
use crate::http::request::Request;
use crate::http::HttpClient;
use crate::net::{ConnectionId, ConnectionStream};
use crate::observability::metrics;
use crate::resilience::backoff::reconnect_delay;
use crate::ws::error::WebSocketError;
use crate::ws::frame::{build_frame, close_payload, parse_close_payload, parse_frame, CloseCode, OpCode};
use crate::ws::handshake::{generate_key, verify_response};

const READ_CHUNK: usize = 8192;

/// Lifecycle state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    Open,
    Closing,
    Closed,
    Broken,
}

impl SessionState {
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionState::Closed | SessionState::Broken)
    }
}

/// Something the consumer loop should deliver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboxEvent {
    Text(String),
    Binary(Vec<u8>),
    /// The session ended. Reported once, after every queued message.
    Disconnected {
        clean: bool,
        code: Option<CloseCode>,
        reason: String,
    },
}

/// Close frame received from the peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseFrame {
    pub code: Option<CloseCode>,
    pub reason: String,
}

struct Shared {
    connection_id: ConnectionId,
    url: Url,
    config: WebSocketConfig,
    outgoing: Mutex<VecDeque<(OpCode, Vec<u8>)>>,
    incoming_text: Mutex<VecDeque<String>>,
    incoming_binary: Mutex<VecDeque<Vec<u8>>>,
    state: watch::Sender<SessionState>,
    /// Set once a Close frame has been queued; guarantees a single outgoing close.
    close_queued: AtomicBool,
    close_received: Mutex<Option<CloseFrame>>,
    disconnect_reported: AtomicBool,
    writer_wake: Notify,
    inbox_ready: Notify,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl Shared {
    fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    /// Move to `to` unless the session already ended.
    fn transition(&self, to: SessionState) {
        let changed = self.state.send_if_modified(|state| {
            if state.is_terminal() || *state == to {
                false
            } else {
                *state = to;
                true
            }
        });
        if changed {
            tracing::debug!(connection_id = %self.connection_id, state = ?to, "WebSocket state changed");
            if to.is_terminal() {
                self.writer_wake.notify_one();
                self.inbox_ready.notify_waiters();
            }
        }
    }

    fn enqueue(&self, opcode: OpCode, payload: Vec<u8>) {
        lock(&self.outgoing).push_back((opcode, payload));
        self.writer_wake.notify_one();
    }

    /// Queue a Close frame unless one was already queued. Returns whether it was queued.
    fn queue_close(&self, code: Option<CloseCode>, reason: &str) -> bool {
        if self.close_queued.swap(true, Ordering::SeqCst) {
            return false;
        }
        self.enqueue(OpCode::Close, close_payload(code, reason));
        true
    }

    fn deliver(&self, opcode: OpCode, data: Vec<u8>) -> Result<(), WebSocketError> {
        match opcode {
            OpCode::Text => {
                let text = String::from_utf8(data).map_err(|_| WebSocketError::InvalidUtf8)?;
                lock(&self.incoming_text).push_back(text);
            }
            _ => lock(&self.incoming_binary).push_back(data),
        }
        self.inbox_ready.notify_waiters();
        Ok(())
    }
}

/// Aborts the session tasks once the last handle is dropped.
struct TaskGuard {
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
}

impl Drop for TaskGuard {
    fn drop(&mut self) {
        self.reader.abort();
        self.writer.abort();
    }
}

/// A client WebSocket session. Clones share the session.
#[derive(Clone)]
pub struct WebSocket {
    shared: Arc<Shared>,
    protocol: String,
    _tasks: Arc<TaskGuard>,
}

impl std::fmt::Debug for WebSocket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebSocket")
            .field("connection_id", &self.shared.connection_id)
            .field("url", &self.shared.url.as_str())
            .field("state", &self.shared.state())
            .finish()
    }
}

impl WebSocket {
    /// Connect using the client's WebSocket configuration.
    pub async fn connect(client: &HttpClient, url: &str, headers: HeaderSet) -> Result<Self, WebSocketError> {
        let config = client.config().websocket.clone();
        Self::connect_with_config(client, url, config, headers).await
    }

    /// Perform the opening handshake and start the reader and writer tasks.
    ///
    /// `headers` are applied last and override the handshake defaults.
    pub async fn connect_with_config(
        client: &HttpClient,
        url: &str,
        config: WebSocketConfig,
        headers: HeaderSet,
    ) -> Result<Self, WebSocketError> {
        let url = websocket_url(url)?;
        let key = generate_key();

        let mut request = Request::from_url("GET", url.clone()).accept_gzip(false);
        request.headers.set("Upgrade", "websocket");
        request.headers.set("Connection", "Upgrade");
        request.headers.set("Sec-WebSocket-Key", key.clone());
        request.headers.set("Sec-WebSocket-Version", "13");
        request.headers.set("Origin", config.origin.clone());
        if !config.protocols.is_empty() {
            request.headers.set("Sec-WebSocket-Protocol", config.protocols.join(", "));
        }
        for name in headers.keys() {
            *request.headers.get_all_mut(name) = headers.get_all(name).to_vec();
        }
        if let Some(timeout) = config.connect_timeout() {
            request.timeout = Some(timeout);
        }

        let mut response = client.execute(request).await?;
        if let Err(e) = verify_response(&response, &key) {
            tracing::warn!(url = %url, error = %e, "WebSocket handshake rejected");
            return Err(e);
        }
        let conn = response
            .take_upgraded()
            .ok_or_else(|| WebSocketError::HandshakeRejected("connection was not upgraded".to_string()))?;

        let connection_id = conn.id();
        let (source, sink) = tokio::io::split(conn.into_stream());
        let (state, _) = watch::channel(SessionState::Open);

        let shared = Arc::new(Shared {
            connection_id,
            url: url.clone(),
            config,
            outgoing: Mutex::new(VecDeque::new()),
            incoming_text: Mutex::new(VecDeque::new()),
            incoming_binary: Mutex::new(VecDeque::new()),
            state,
            close_queued: AtomicBool::new(false),
            close_received: Mutex::new(None),
            disconnect_reported: AtomicBool::new(false),
            writer_wake: Notify::new(),
            inbox_ready: Notify::new(),
        });

        let writer = tokio::spawn(writer_loop(Arc::clone(&shared), sink));
        let reader = tokio::spawn(reader_loop(Arc::clone(&shared), source));

        tracing::info!(connection_id = %connection_id, url = %url, "WebSocket connected");

        Ok(Self {
            shared,
            protocol: response.headers.get("Sec-WebSocket-Protocol").to_string(),
            _tasks: Arc::new(TaskGuard { reader, writer }),
        })
    }

    /// Connect, retrying with exponential backoff per `reconnect`.
    pub async fn connect_with_retry(
        client: &HttpClient,
        url: &str,
        headers: HeaderSet,
        reconnect: &ReconnectConfig,
    ) -> Result<Self, WebSocketError> {
        let max_attempts = if reconnect.enabled { reconnect.max_attempts.max(1) } else { 1 };
        let mut attempt = 1;
        loop {
            match Self::connect(client, url, headers.clone()).await {
                Ok(ws) => return Ok(ws),
                Err(e @ WebSocketError::InvalidUrl(_)) => return Err(e),
                Err(e) if attempt >= max_attempts => return Err(e),
                Err(e) => {
                    let delay = reconnect_delay(attempt, reconnect);
                    tracing::warn!(
                        url = %url,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "WebSocket connect failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }

    pub fn connection_id(&self) -> ConnectionId {
        self.shared.connection_id
    }

    pub fn url(&self) -> &Url {
        &self.shared.url
    }

    /// Subprotocol selected by the server, or `""`.
    pub fn protocol(&self) -> &str {
        &self.protocol
    }

    pub fn state(&self) -> SessionState {
        self.shared.state()
    }

    pub fn is_open(&self) -> bool {
        self.state() == SessionState::Open
    }

    /// The Close frame received from the peer, if any.
    pub fn close_frame(&self) -> Option<CloseFrame> {
        lock(&self.shared.close_received).clone()
    }

    fn ensure_sendable(&self) -> Result<(), WebSocketError> {
        let state = self.state();
        if state != SessionState::Open || self.shared.close_queued.load(Ordering::SeqCst) {
            return Err(WebSocketError::NotOpen(state));
        }
        Ok(())
    }

    pub fn send_text(&self, text: impl Into<String>) -> Result<(), WebSocketError> {
        self.ensure_sendable()?;
        self.shared.enqueue(OpCode::Text, text.into().into_bytes());
        Ok(())
    }

    pub fn send_binary(&self, data: impl Into<Vec<u8>>) -> Result<(), WebSocketError> {
        self.ensure_sendable()?;
        self.shared.enqueue(OpCode::Binary, data.into());
        Ok(())
    }

    /// Send a Ping. Payloads over 125 bytes are rejected.
    pub fn ping(&self, payload: impl Into<Vec<u8>>) -> Result<(), WebSocketError> {
        self.ensure_sendable()?;
        let payload = payload.into();
        if payload.len() > 125 {
            return Err(WebSocketError::FrameTooLarge {
                size: payload.len() as u64,
                max: 125,
            });
        }
        self.shared.enqueue(OpCode::Ping, payload);
        Ok(())
    }

    /// Start the closing handshake.
    ///
    /// Frames queued before the call are still sent. Returns `false` when a
    /// Close frame was already sent (locally or in reply) or the session is over.
    pub fn close(&self, code: Option<CloseCode>, reason: &str) -> bool {
        let state = self.state();
        if !matches!(state, SessionState::Open | SessionState::Closing) {
            return false;
        }
        if !self.shared.queue_close(code, reason) {
            return false;
        }
        tracing::debug!(connection_id = %self.shared.connection_id, code = ?code, "Closing WebSocket");
        self.shared.transition(SessionState::Closing);
        true
    }

    /// Wait until the session is Closed or Broken.
    pub async fn closed(&self) -> SessionState {
        let mut rx = self.shared.state.subscribe();
        let result = rx.wait_for(|state| state.is_terminal()).await.map(|state| *state);
        result.unwrap_or(SessionState::Broken)
    }

    /// Take the next inbox event without waiting.
    ///
    /// Text messages come before binary ones. Once the session has ended and
    /// both inboxes are empty, a single `Disconnected` event is returned.
    pub fn poll_event(&self) -> Option<InboxEvent> {
        // Read the state first so messages delivered before the end are drained first.
        let state = self.state();

        if let Some(text) = lock(&self.shared.incoming_text).pop_front() {
            return Some(InboxEvent::Text(text));
        }
        if let Some(data) = lock(&self.shared.incoming_binary).pop_front() {
            return Some(InboxEvent::Binary(data));
        }

        if state.is_terminal() && !self.shared.disconnect_reported.swap(true, Ordering::SeqCst) {
            let close = self.close_frame();
            return Some(InboxEvent::Disconnected {
                clean: state == SessionState::Closed,
                code: close.as_ref().and_then(|c| c.code),
                reason: close.map(|c| c.reason).unwrap_or_default(),
            });
        }
        None
    }

    /// Drain every available inbox event.
    pub fn poll_inbox(&self) -> Vec<InboxEvent> {
        std::iter::from_fn(|| self.poll_event()).collect()
    }

    /// Wait for the next inbox event. `None` once the disconnect has been reported.
    pub async fn recv(&self) -> Option<InboxEvent> {
        loop {
            let ready = self.shared.inbox_ready.notified();
            if let Some(event) = self.poll_event() {
                return Some(event);
            }
            if self.shared.disconnect_reported.load(Ordering::SeqCst) {
                return None;
            }
            ready.await;
        }
    }
}

/// Accept `ws`, `wss`, `http` and `https` URLs; the latter map to the former.
fn websocket_url(raw: &str) -> Result<Url, WebSocketError> {
    let mut url = Url::parse(raw).map_err(|e| WebSocketError::InvalidUrl(format!("{}: {}", raw, e)))?;
    let scheme = match url.scheme() {
        "ws" | "http" => "ws",
        "wss" | "https" => "wss",
        other => return Err(WebSocketError::InvalidUrl(format!("unsupported scheme {}", other))),
    };
    if url.scheme() != scheme {
        url.set_scheme(scheme)
            .map_err(|_| WebSocketError::InvalidUrl(format!("cannot use scheme {} for {}", scheme, raw)))?;
    }
    Ok(url)
}

async fn writer_loop(shared: Arc<Shared>, mut sink: WriteHalf<ConnectionStream>) {
    let idle = shared.config.writer_idle().max(Duration::from_millis(1));

    loop {
        let batch: Vec<(OpCode, Vec<u8>)> = lock(&shared.outgoing).drain(..).collect();

        let mut close_sent = false;
        for (opcode, payload) in batch {
            let frame = build_frame(opcode, &payload);
            if let Err(e) = sink.write_all(&frame).await {
                tracing::warn!(connection_id = %shared.connection_id, error = %e, "WebSocket write failed");
                shared.transition(SessionState::Broken);
                return;
            }
            metrics::record_ws_frame("out", opcode.as_str());
            if opcode == OpCode::Close {
                close_sent = true;
                break;
            }
        }

        if let Err(e) = sink.flush().await {
            tracing::warn!(connection_id = %shared.connection_id, error = %e, "WebSocket flush failed");
            shared.transition(SessionState::Broken);
            return;
        }

        if close_sent {
            tracing::trace!(connection_id = %shared.connection_id, "Close frame sent, writer done");
            return;
        }
        if shared.state().is_terminal() {
            return;
        }

        tokio::select! {
            _ = shared.writer_wake.notified() => {}
            _ = tokio::time::sleep(idle) => {}
        }
    }
}

async fn reader_loop(shared: Arc<Shared>, source: ReadHalf<ConnectionStream>) {
    let outcome = read_frames(&shared, source).await;
    let handshake_done = shared.close_queued.load(Ordering::SeqCst);

    let final_state = match outcome {
        Ok(()) if handshake_done => SessionState::Closed,
        Ok(()) => {
            tracing::warn!(connection_id = %shared.connection_id, "WebSocket transport ended without closing handshake");
            SessionState::Broken
        }
        Err(WebSocketError::Io(e)) if handshake_done && lock(&shared.close_received).is_some() => {
            tracing::trace!(connection_id = %shared.connection_id, error = %e, "Transport error after closing handshake");
            SessionState::Closed
        }
        Err(e) => {
            tracing::warn!(connection_id = %shared.connection_id, error = %e, "WebSocket session broken");
            SessionState::Broken
        }
    };
    shared.transition(final_state);
}

async fn read_frames(shared: &Shared, mut source: ReadHalf<ConnectionStream>) -> Result<(), WebSocketError> {
    let max = shared.config.max_message_bytes;
    let mut buf = BytesMut::with_capacity(READ_CHUNK);
    let mut assembly: Option<(OpCode, Vec<u8>)> = None;
    let mut state_rx = shared.state.subscribe();
    let mut deadline: Option<Instant> = None;

    loop {
        while let Some((frame, used)) = parse_frame(&mut buf[..], max)? {
            let payload = buf[frame.payload.clone()].to_vec();
            buf.advance(used);
            metrics::record_ws_frame("in", frame.opcode.as_str());
            handle_frame(shared, frame.opcode, frame.fin, payload, &mut assembly)?;
        }

        let state = shared.state();
        if state.is_terminal() {
            return Ok(());
        }
        if deadline.is_none() && shared.close_queued.load(Ordering::SeqCst) {
            deadline = Some(Instant::now() + shared.config.close_timeout());
        }

        buf.reserve(READ_CHUNK);
        tokio::select! {
            read = source.read_buf(&mut buf) => {
                if read? == 0 {
                    return Ok(());
                }
            }
            changed = state_rx.changed() => {
                if changed.is_err() {
                    return Ok(());
                }
            }
            _ = sleep_until(deadline) => {
                tracing::debug!(connection_id = %shared.connection_id, "Peer did not end the transport after close");
                return Ok(());
            }
        }
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

fn handle_frame(
    shared: &Shared,
    opcode: OpCode,
    fin: bool,
    payload: Vec<u8>,
    assembly: &mut Option<(OpCode, Vec<u8>)>,
) -> Result<(), WebSocketError> {
    let max = shared.config.max_message_bytes;

    match opcode {
        OpCode::Text | OpCode::Binary => {
            if assembly.is_some() {
                return Err(WebSocketError::Protocol(
                    "new data frame while a fragmented message is in progress".to_string(),
                ));
            }
            if fin {
                shared.deliver(opcode, payload)?;
            } else {
                *assembly = Some((opcode, payload));
            }
        }
        OpCode::Continuation => {
            let Some((_, data)) = assembly.as_mut() else {
                return Err(WebSocketError::Protocol(
                    "continuation frame without a fragmented message".to_string(),
                ));
            };
            let size = (data.len() + payload.len()) as u64;
            if size > max {
                return Err(WebSocketError::FrameTooLarge { size, max });
            }
            data.extend_from_slice(&payload);
            if fin {
                if let Some((first, data)) = assembly.take() {
                    shared.deliver(first, data)?;
                }
            }
        }
        OpCode::Ping => {
            if !shared.close_queued.load(Ordering::SeqCst) {
                shared.enqueue(OpCode::Pong, payload);
            }
        }
        OpCode::Pong => {
            tracing::trace!(connection_id = %shared.connection_id, "Pong received");
        }
        OpCode::Close => {
            let (code, reason) = parse_close_payload(&payload);
            tracing::debug!(connection_id = %shared.connection_id, code = ?code, reason = %reason, "Close frame received");
            *lock(&shared.close_received) = Some(CloseFrame { code, reason });
            shared.transition(SessionState::Closing);
            // 1005 must never appear on the wire; reply without a code instead.
            let reply = code.filter(|c| *c != CloseCode::NO_STATUS);
            shared.queue_close(reply, "");
        }
    }
    Ok(())
}
