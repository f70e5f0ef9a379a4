//! Request/return correlation over a WebSocket session.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use serde_json::Value;
use tokio::sync::oneshot;

use crate::lifecycle::scheduler::SocketListener;
use crate::rpc::error::RpcError;
use crate::rpc::message::Message;
use crate::rpc::registry::{Dispatch, Registry};
use crate::ws::frame::CloseCode;
use crate::ws::session::WebSocket;

type CallResult = Result<Value, RpcError>;
type PendingMap = HashMap<String, oneshot::Sender<CallResult>>;

/// Sends named messages on a socket and matches `return` messages to calls.
///
/// When the socket is registered with [`Scheduler::add_reconnecting_socket`],
/// the channel follows the new session after a reconnect.
///
/// [`Scheduler::add_reconnecting_socket`]: crate::lifecycle::Scheduler::add_reconnecting_socket
#[derive(Clone)]
pub struct RpcChannel {
    socket: Arc<Mutex<WebSocket>>,
    pending: Arc<Mutex<PendingMap>>,
    uid: Arc<Mutex<Option<String>>>,
}

impl RpcChannel {
    pub fn new(socket: WebSocket) -> Self {
        Self {
            socket: Arc::new(Mutex::new(socket)),
            pending: Arc::new(Mutex::new(HashMap::new())),
            uid: Arc::new(Mutex::new(None)),
        }
    }

    /// The session messages currently go out on.
    pub fn socket(&self) -> WebSocket {
        self.socket.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn replace_socket(&self, socket: &WebSocket) {
        *self.socket.lock().unwrap_or_else(|e| e.into_inner()) = socket.clone();
        *self.uid.lock().unwrap_or_else(|e| e.into_inner()) = None;
    }

    /// Session id announced by the peer's `welcome` message.
    pub fn uid(&self) -> Option<String> {
        self.uid.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn pending_calls(&self) -> usize {
        self.pending().len()
    }

    /// Fire-and-forget event.
    pub fn send(&self, name: impl Into<String>, args: Vec<Value>) -> Result<(), RpcError> {
        let msg = Message::event(name, args);
        self.socket().send_text(msg.to_json()?)?;
        Ok(())
    }

    /// Call a remote function. The result arrives once the listener sees the matching `return`.
    pub fn request(&self, name: impl Into<String>, args: Vec<Value>) -> Result<PendingCall, RpcError> {
        let msg = Message::function(name, args);
        let text = msg.to_json()?;

        let (tx, rx) = oneshot::channel();
        self.pending().insert(msg.id.clone(), tx);
        if let Err(e) = self.socket().send_text(text) {
            self.pending().remove(&msg.id);
            return Err(e.into());
        }

        tracing::debug!(name = %msg.name, id = %msg.id, "Remote call sent");
        Ok(PendingCall {
            id: msg.id,
            rx,
            taken: false,
        })
    }

    /// Listener to register with the scheduler for this channel's socket.
    pub fn listener(&self, registry: Registry) -> RpcListener {
        RpcListener {
            channel: self.clone(),
            registry,
        }
    }

    fn pending(&self) -> MutexGuard<'_, PendingMap> {
        self.pending.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn resolve(&self, msg: &Message) {
        let Some(id) = msg.args.get(1).and_then(Value::as_str) else {
            tracing::warn!(args = ?msg.args, "Return message without a call id");
            return;
        };
        let Some(tx) = self.pending().remove(id) else {
            tracing::debug!(id, "Return for unknown call");
            return;
        };

        let success = msg.args.get(2).and_then(Value::as_bool).unwrap_or(false);
        let result = msg.args.get(3).cloned().unwrap_or(Value::Null);
        let outcome = if success {
            Ok(result)
        } else {
            Err(RpcError::Remote(match result {
                Value::String(s) => s,
                other => other.to_string(),
            }))
        };
        let _ = tx.send(outcome);
    }

    fn fail_all(&self) {
        for (_, tx) in self.pending().drain() {
            let _ = tx.send(Err(RpcError::Dropped));
        }
    }
}

/// Result handle for [`RpcChannel::request`].
#[derive(Debug)]
pub struct PendingCall {
    id: String,
    rx: oneshot::Receiver<CallResult>,
    taken: bool,
}

impl PendingCall {
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Non-blocking poll. Yields the result once.
    pub fn try_take(&mut self) -> Option<CallResult> {
        if self.taken {
            return None;
        }
        match self.rx.try_recv() {
            Ok(result) => {
                self.taken = true;
                Some(result)
            }
            Err(oneshot::error::TryRecvError::Empty) => None,
            Err(oneshot::error::TryRecvError::Closed) => {
                self.taken = true;
                Some(Err(RpcError::Dropped))
            }
        }
    }

    pub async fn wait(self) -> CallResult {
        self.rx.await.unwrap_or(Err(RpcError::Dropped))
    }
}

/// [`SocketListener`] that feeds incoming text into an [`RpcChannel`] and a [`Registry`].
pub struct RpcListener {
    channel: RpcChannel,
    registry: Registry,
}

impl RpcListener {
    fn handle(&mut self, socket: &WebSocket, msg: Message) {
        match msg.name.as_str() {
            "return" => self.channel.resolve(&msg),
            "welcome" => match msg.arg::<String>(0) {
                Ok(uid) => {
                    tracing::info!(uid = %uid, "Session welcomed");
                    *self.channel.uid.lock().unwrap_or_else(|e| e.into_inner()) = Some(uid);
                }
                Err(e) => tracing::warn!(error = %e, "Malformed welcome"),
            },
            "exception" => {
                let call = msg.arg::<String>(1).unwrap_or_default();
                let detail = msg.arg::<String>(2).unwrap_or_default();
                tracing::error!(call = %call, detail = %detail, "Remote exception");
            }
            _ => {
                if let Dispatch::Reply(reply) = self.registry.dispatch(&msg) {
                    let sent = reply
                        .to_json()
                        .and_then(|text| socket.send_text(text).map_err(RpcError::from));
                    if let Err(e) = sent {
                        tracing::warn!(name = %msg.name, id = %msg.id, error = %e, "Failed to send return");
                    }
                }
            }
        }
    }
}

impl SocketListener for RpcListener {
    fn on_text(&mut self, socket: &WebSocket, text: String) {
        match Message::from_json(&text) {
            Ok(msg) => self.handle(socket, msg),
            Err(e) => tracing::warn!(error = %e, "Dropping undecodable message"),
        }
    }

    fn on_binary(&mut self, _socket: &WebSocket, data: Vec<u8>) {
        tracing::debug!(len = data.len(), "Ignoring binary message");
    }

    fn on_disconnect(&mut self, _socket: &WebSocket, clean: bool, code: Option<CloseCode>, reason: &str) {
        let pending = self.channel.pending_calls();
        if pending > 0 {
            tracing::warn!(pending, clean, code = ?code, reason, "Failing calls on disconnect");
        }
        self.channel.fail_all();
    }

    fn on_reconnect(&mut self, socket: &WebSocket) {
        tracing::debug!(connection_id = %socket.connection_id(), "RPC channel moved to new session");
        self.channel.replace_socket(socket);
    }
}
