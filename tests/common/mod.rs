//! Shared utilities for integration testing.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::{Buf, BytesMut};
use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};

use wirelink::config::ClientConfig;
use wirelink::http::headers::HeaderSet;
use wirelink::http::inbound::{read_request, write_response, InboundRequest};
use wirelink::ws::frame::{parse_frame, OpCode};
use wirelink::ws::handshake::accept_key;
use wirelink::HttpClient;

/// Canned reply from a mock server.
#[derive(Debug, Clone)]
pub struct Reply {
    status: u16,
    reason: String,
    headers: HeaderSet,
    body: Vec<u8>,
    raw: Option<Vec<u8>>,
    hangup: bool,
    delay: Option<Duration>,
}

impl Reply {
    pub fn status(status: u16, reason: &str) -> Self {
        Self {
            status,
            reason: reason.to_string(),
            headers: HeaderSet::new(),
            body: Vec::new(),
            raw: None,
            hangup: false,
            delay: None,
        }
    }

    pub fn ok(body: impl Into<Vec<u8>>) -> Self {
        Self::status(200, "OK").body(body)
    }

    pub fn redirect(status: u16, location: &str) -> Self {
        Self::status(status, "Redirect").header("Location", location)
    }

    /// Bytes written verbatim instead of a formatted response.
    pub fn raw(bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            raw: Some(bytes.into()),
            ..Self::status(0, "")
        }
    }

    pub fn header(mut self, name: &str, value: &str) -> Self {
        self.headers.add(name, value);
        self
    }

    pub fn body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    /// Announce `Connection: close` and drop the connection.
    pub fn close(self) -> Self {
        self.header("Connection", "close").hangup()
    }

    /// Drop the connection after replying without telling the client.
    pub fn hangup(mut self) -> Self {
        self.hangup = true;
        self
    }

    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}

/// A keep-alive HTTP/1.1 mock server on an ephemeral port.
pub struct MockServer {
    pub addr: SocketAddr,
    requests: Arc<Mutex<Vec<InboundRequest>>>,
    connections: Arc<AtomicUsize>,
}

impl MockServer {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    /// Every request received so far, in arrival order.
    pub fn requests(&self) -> Vec<InboundRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn connection_count(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }
}

/// Start a mock server answering each request with `handler`.
pub async fn start_mock_server<F>(handler: F) -> MockServer
where
    F: Fn(&InboundRequest) -> Reply + Send + Sync + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let requests = Arc::new(Mutex::new(Vec::new()));
    let connections = Arc::new(AtomicUsize::new(0));
    let handler = Arc::new(handler);

    let seen = Arc::clone(&requests);
    let accepted = Arc::clone(&connections);
    tokio::spawn(async move {
        while let Ok((socket, _)) = listener.accept().await {
            accepted.fetch_add(1, Ordering::SeqCst);
            let handler = Arc::clone(&handler);
            let seen = Arc::clone(&seen);
            tokio::spawn(async move {
                let mut stream = BufReader::new(socket);
                while let Ok(request) = read_request(&mut stream).await {
                    seen.lock().unwrap().push(request.clone());
                    let reply = handler(&request);
                    if let Some(delay) = reply.delay {
                        tokio::time::sleep(delay).await;
                    }
                    let written = match &reply.raw {
                        Some(raw) => stream.get_mut().write_all(raw).await.is_ok(),
                        None => write_response(stream.get_mut(), reply.status, &reply.reason, &reply.headers, &reply.body)
                            .await
                            .is_ok(),
                    };
                    if !written || reply.hangup {
                        break;
                    }
                }
            });
        }
    });

    MockServer {
        addr,
        requests,
        connections,
    }
}

/// Client with default settings.
pub fn client() -> HttpClient {
    HttpClient::new(ClientConfig::default()).unwrap()
}

/// Client whose WebSocket sessions give up quickly on a silent peer.
pub fn fast_close_client() -> HttpClient {
    let mut config = ClientConfig::default();
    config.websocket.close_timeout_secs = 1;
    HttpClient::new(config).unwrap()
}

/// WebSocket server backed by tokio-tungstenite.
///
/// Sends `greeting` after the handshake, echoes binary messages and answers
/// every text message with whatever `on_text` returns.
pub async fn start_ws_server<F>(greeting: Vec<String>, on_text: F) -> SocketAddr
where
    F: Fn(&str) -> Vec<String> + Send + Sync + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let on_text = Arc::new(on_text);

    tokio::spawn(async move {
        while let Ok((socket, _)) = listener.accept().await {
            let on_text = Arc::clone(&on_text);
            let greeting = greeting.clone();
            tokio::spawn(async move {
                let Ok(ws) = tokio_tungstenite::accept_async(socket).await else {
                    return;
                };
                let (mut write, mut read) = ws.split();
                for text in greeting {
                    if write.send(tokio_tungstenite::tungstenite::Message::text(text)).await.is_err() {
                        return;
                    }
                }
                while let Some(Ok(msg)) = read.next().await {
                    if msg.is_binary() {
                        if write.send(msg).await.is_err() {
                            return;
                        }
                    } else if msg.is_text() {
                        let text = msg.to_text().unwrap().to_string();
                        for reply in on_text(&text) {
                            if write.send(tokio_tungstenite::tungstenite::Message::text(reply)).await.is_err() {
                                return;
                            }
                        }
                    }
                }
            });
        }
    });

    addr
}

/// Echo server for text and binary messages.
pub async fn start_echo_server() -> SocketAddr {
    start_ws_server(Vec::new(), |text| vec![text.to_string()]).await
}

/// Server side of a hand-driven WebSocket connection.
pub struct RawPeer {
    pub stream: BufReader<TcpStream>,
    pub request: InboundRequest,
    buf: BytesMut,
}

impl RawPeer {
    /// Read the next client frame: opcode, fin flag and unmasked payload.
    /// `None` once the client has closed the transport.
    pub async fn read_frame(&mut self) -> Option<(OpCode, bool, Vec<u8>)> {
        loop {
            if let Some((frame, used)) = parse_frame(&mut self.buf[..], 1 << 20).unwrap() {
                assert!(frame.masked, "client frames must be masked");
                let payload = self.buf[frame.payload.clone()].to_vec();
                self.buf.advance(used);
                return Some((frame.opcode, frame.fin, payload));
            }
            let mut chunk = [0u8; 4096];
            match self.stream.read(&mut chunk).await {
                Ok(0) | Err(_) => return None,
                Ok(n) => self.buf.extend_from_slice(&chunk[..n]),
            }
        }
    }

    pub async fn write(&mut self, bytes: &[u8]) {
        self.stream.get_mut().write_all(bytes).await.unwrap();
    }
}

/// Accept one connection and complete the handshake by hand.
///
/// `accept` overrides the `Sec-WebSocket-Accept` value.
pub async fn accept_raw(listener: &TcpListener, accept: Option<&str>) -> RawPeer {
    let (socket, _) = listener.accept().await.unwrap();
    let mut stream = BufReader::new(socket);
    let request = read_request(&mut stream).await.unwrap();
    let accept = match accept {
        Some(value) => value.to_string(),
        None => accept_key(request.headers.get("Sec-WebSocket-Key")),
    };
    let head = format!(
        "HTTP/1.1 101 Switching Protocols\r\nUpgrade: websocket\r\nConnection: Upgrade\r\nSec-WebSocket-Accept: {}\r\n\r\n",
        accept
    );
    stream.get_mut().write_all(head.as_bytes()).await.unwrap();
    RawPeer {
        stream,
        request,
        buf: BytesMut::new(),
    }
}

/// Unmasked server frame with explicit fin flag.
pub fn server_frame(opcode: OpCode, fin: bool, payload: &[u8]) -> Vec<u8> {
    assert!(payload.len() < 126);
    let mut out = vec![(if fin { 0x80 } else { 0 }) | opcode as u8, payload.len() as u8];
    out.extend_from_slice(payload);
    out
}
