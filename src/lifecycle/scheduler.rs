//! Cooperative consumer loop.
//!
//! # Responsibilities
//! - Poll spawned requests and run their completion callbacks
//! - Drain every registered socket's inboxes into its listener
//! - Re-establish reconnecting sockets that broke, and swap the new session in
//! - Run quit hooks at shutdown
//!
//! All callbacks run synchronously on the lane that calls [`Scheduler::tick`];
//! a slow callback delays everything behind it.

use std::error::Error;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{broadcast, oneshot};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use uuid::Uuid;

use crate::config::{ReconnectConfig, SchedulerConfig};
use crate::http::headers::HeaderSet;
use crate::http::pending::{PendingRequest, RequestResult};
use crate::http::request::Request;
use crate::http::HttpClient;
use crate::ws::error::WebSocketError;
use crate::ws::frame::CloseCode;
use crate::ws::session::{InboxEvent, WebSocket};

pub type RequestCallback = Box<dyn FnOnce(RequestResult) + Send>;
pub type HookError = Box<dyn Error + Send + Sync>;
pub type QuitHook = Box<dyn FnOnce() -> Result<(), HookError> + Send>;

/// Receives events for one socket.
pub trait SocketListener: Send {
    fn on_text(&mut self, _socket: &WebSocket, _text: String) {}

    fn on_binary(&mut self, _socket: &WebSocket, _data: Vec<u8>) {}

    /// Called once when the session ends.
    fn on_disconnect(&mut self, _socket: &WebSocket, _clean: bool, _code: Option<CloseCode>, _reason: &str) {}

    /// Called when a reconnecting socket has been replaced by a new session.
    fn on_reconnect(&mut self, _socket: &WebSocket) {}
}

type TextHandler = Box<dyn FnMut(&WebSocket, String) + Send>;
type BinaryHandler = Box<dyn FnMut(&WebSocket, Vec<u8>) + Send>;
type DisconnectHandler = Box<dyn FnMut(&WebSocket, bool, Option<CloseCode>, &str) + Send>;
type ReconnectHandler = Box<dyn FnMut(&WebSocket) + Send>;

/// Closure-based [`SocketListener`].
#[derive(Default)]
pub struct SocketCallbacks {
    on_text: Option<TextHandler>,
    on_binary: Option<BinaryHandler>,
    on_disconnect: Option<DisconnectHandler>,
    on_reconnect: Option<ReconnectHandler>,
}

impl SocketCallbacks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn text(mut self, f: impl FnMut(&WebSocket, String) + Send + 'static) -> Self {
        self.on_text = Some(Box::new(f));
        self
    }

    pub fn binary(mut self, f: impl FnMut(&WebSocket, Vec<u8>) + Send + 'static) -> Self {
        self.on_binary = Some(Box::new(f));
        self
    }

    pub fn disconnect(mut self, f: impl FnMut(&WebSocket, bool, Option<CloseCode>, &str) + Send + 'static) -> Self {
        self.on_disconnect = Some(Box::new(f));
        self
    }

    pub fn reconnect(mut self, f: impl FnMut(&WebSocket) + Send + 'static) -> Self {
        self.on_reconnect = Some(Box::new(f));
        self
    }
}

impl SocketListener for SocketCallbacks {
    fn on_text(&mut self, socket: &WebSocket, text: String) {
        if let Some(f) = self.on_text.as_mut() {
            f(socket, text);
        }
    }

    fn on_binary(&mut self, socket: &WebSocket, data: Vec<u8>) {
        if let Some(f) = self.on_binary.as_mut() {
            f(socket, data);
        }
    }

    fn on_disconnect(&mut self, socket: &WebSocket, clean: bool, code: Option<CloseCode>, reason: &str) {
        if let Some(f) = self.on_disconnect.as_mut() {
            f(socket, clean, code, reason);
        }
    }

    fn on_reconnect(&mut self, socket: &WebSocket) {
        if let Some(f) = self.on_reconnect.as_mut() {
            f(socket);
        }
    }
}

type RedialResult = Result<WebSocket, WebSocketError>;

/// Everything needed to dial a broken socket again.
struct Redial {
    client: HttpClient,
    url: String,
    headers: HeaderSet,
    config: ReconnectConfig,
    attempt: Option<oneshot::Receiver<RedialResult>>,
    task: Option<JoinHandle<()>>,
}

impl Redial {
    fn start(&mut self) {
        let (tx, rx) = oneshot::channel();
        let client = self.client.clone();
        let url = self.url.clone();
        let headers = self.headers.clone();
        let config = self.config.clone();
        self.task = Some(tokio::spawn(async move {
            let result = WebSocket::connect_with_retry(&client, &url, headers, &config).await;
            let _ = tx.send(result);
        }));
        self.attempt = Some(rx);
    }

    fn abort(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

struct SocketEntry {
    socket: WebSocket,
    /// The session quit hooks close; follows reconnects.
    current: Arc<Mutex<WebSocket>>,
    listener: Box<dyn SocketListener>,
    redial: Option<Redial>,
}

impl SocketEntry {
    fn swap(&mut self, socket: WebSocket) {
        *self.current.lock().unwrap_or_else(|e| e.into_inner()) = socket.clone();
        self.socket = socket;
    }
}

/// What one tick did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickStats {
    pub completed_requests: usize,
    pub delivered_events: usize,
}

/// The consumer loop.
pub struct Scheduler {
    interval: Duration,
    requests: Vec<(PendingRequest, RequestCallback)>,
    sockets: Vec<SocketEntry>,
    quit_hooks: Vec<(String, QuitHook)>,
    quitting: bool,
}

impl Scheduler {
    pub fn new(config: &SchedulerConfig) -> Self {
        Self {
            interval: Duration::from_millis(config.tick_ms.max(1)),
            requests: Vec::new(),
            sockets: Vec::new(),
            quit_hooks: Vec::new(),
            quitting: false,
        }
    }

    /// Spawn `request` on `client` and call `callback` from the tick that sees it finish.
    pub fn send<F>(&mut self, client: &HttpClient, request: Request, callback: F) -> Uuid
    where
        F: FnOnce(RequestResult) + Send + 'static,
    {
        let pending = client.send(request);
        let id = pending.id();
        self.track(pending, callback);
        id
    }

    /// Watch an already spawned request.
    pub fn track<F>(&mut self, pending: PendingRequest, callback: F)
    where
        F: FnOnce(RequestResult) + Send + 'static,
    {
        self.requests.push((pending, Box::new(callback)));
    }

    /// Deliver `socket` events to `listener` and close the socket at shutdown.
    pub fn add_socket(&mut self, socket: WebSocket, listener: impl SocketListener + 'static) {
        self.register(socket, Box::new(listener), None);
    }

    /// Like [`add_socket`](Self::add_socket), but a session that breaks is dialed
    /// again with `client`'s reconnect policy.
    ///
    /// The listener sees `on_disconnect` for the broken session, then
    /// `on_reconnect` once a new one is up. A clean close, a disabled policy or
    /// running out of attempts ends the entry. Ticks must run inside a tokio runtime.
    pub fn add_reconnecting_socket(
        &mut self,
        client: &HttpClient,
        socket: WebSocket,
        headers: HeaderSet,
        listener: impl SocketListener + 'static,
    ) {
        let config = client.config().reconnect.clone();
        let redial = config.enabled.then(|| Redial {
            client: client.clone(),
            url: socket.url().to_string(),
            headers,
            config,
            attempt: None,
            task: None,
        });
        self.register(socket, Box::new(listener), redial);
    }

    fn register(&mut self, socket: WebSocket, listener: Box<dyn SocketListener>, redial: Option<Redial>) {
        let current = Arc::new(Mutex::new(socket.clone()));
        let on_quit = Arc::clone(&current);
        self.on_quit(format!("close {}", socket.url()), move || {
            let socket = on_quit.lock().unwrap_or_else(|e| e.into_inner()).clone();
            socket.close(Some(CloseCode::GOING_AWAY), "Quit");
            Ok(())
        });
        self.sockets.push(SocketEntry {
            socket,
            current,
            listener,
            redial,
        });
    }

    /// Register a hook for [`shutdown`](Self::shutdown). Hooks run in registration order.
    pub fn on_quit<F>(&mut self, name: impl Into<String>, hook: F)
    where
        F: FnOnce() -> Result<(), HookError> + Send + 'static,
    {
        self.quit_hooks.push((name.into(), Box::new(hook)));
    }

    pub fn pending_requests(&self) -> usize {
        self.requests.len()
    }

    pub fn socket_count(&self) -> usize {
        self.sockets.len()
    }

    /// True when there is nothing left to poll.
    pub fn is_idle(&self) -> bool {
        self.requests.is_empty() && self.sockets.is_empty()
    }

    /// Run one polling pass.
    pub fn tick(&mut self) -> TickStats {
        let mut stats = TickStats::default();

        for (mut pending, callback) in std::mem::take(&mut self.requests) {
            match pending.try_take() {
                Some(result) => {
                    callback(result);
                    stats.completed_requests += 1;
                }
                None => self.requests.push((pending, callback)),
            }
        }

        let quitting = self.quitting;
        self.sockets.retain_mut(|entry| {
            if let Some(redial) = entry.redial.as_mut() {
                if let Some(attempt) = redial.attempt.as_mut() {
                    match attempt.try_recv() {
                        Err(oneshot::error::TryRecvError::Empty) => return true,
                        Ok(Ok(socket)) => {
                            redial.attempt = None;
                            redial.task = None;
                            tracing::info!(connection_id = %socket.connection_id(), url = %socket.url(), "Socket reconnected");
                            if quitting {
                                socket.close(Some(CloseCode::GOING_AWAY), "Quit");
                            }
                            entry.swap(socket);
                            entry.listener.on_reconnect(&entry.socket);
                        }
                        Ok(Err(e)) => {
                            tracing::warn!(url = %redial.url, error = %e, "Giving up on socket");
                            return false;
                        }
                        Err(oneshot::error::TryRecvError::Closed) => return false,
                    }
                }
            }

            let mut alive = true;
            for event in entry.socket.poll_inbox() {
                stats.delivered_events += 1;
                match event {
                    InboxEvent::Text(text) => entry.listener.on_text(&entry.socket, text),
                    InboxEvent::Binary(data) => entry.listener.on_binary(&entry.socket, data),
                    InboxEvent::Disconnected { clean, code, reason } => {
                        tracing::debug!(
                            connection_id = %entry.socket.connection_id(),
                            clean,
                            "Socket disconnected"
                        );
                        entry.listener.on_disconnect(&entry.socket, clean, code, &reason);
                        match entry.redial.as_mut() {
                            Some(redial) if !clean && !quitting => {
                                tracing::info!(url = %redial.url, "Reconnecting socket");
                                redial.start();
                            }
                            _ => alive = false,
                        }
                    }
                }
            }
            alive
        });

        stats
    }

    /// Tick on an interval until `shutdown` fires, then run [`shutdown`](Self::shutdown).
    pub async fn run(&mut self, mut shutdown: broadcast::Receiver<()>) {
        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.tick();
                }
                _ = shutdown.recv() => break,
            }
        }
        self.shutdown();
    }

    /// Run every quit hook once. Failures are logged and counted, never propagated.
    ///
    /// Reconnect attempts in flight are abandoned.
    pub fn shutdown(&mut self) -> usize {
        self.quitting = true;
        for redial in self.sockets.iter_mut().filter_map(|entry| entry.redial.as_mut()) {
            redial.abort();
        }
        let mut failures = 0;
        for (name, hook) in self.quit_hooks.drain(..) {
            if let Err(e) = hook() {
                failures += 1;
                tracing::warn!(hook = %name, error = %e, "Quit hook failed");
            }
        }
        tracing::debug!(failures, "Scheduler shut down");
        failures
    }
}
