//! Open transports and their identity.
//!
//! # Responsibilities
//! - Open a TCP connection, optionally wrapped in a TLS client stream
//! - Generate unique connection IDs for tracing
//! - Expose a buffered stream that reads and writes through the same transport

use std::io;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, ReadBuf};
use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream;
use tokio_rustls::rustls::pki_types::ServerName;
use tokio_rustls::TlsConnector;

use crate::http::error::HttpError;

/// Global atomic counter for connection IDs.
/// Using relaxed ordering is sufficient since we only need uniqueness, not synchronization.
static CONNECTION_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Generate a new unique connection ID.
    pub fn new() -> Self {
        Self(CONNECTION_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value.
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// A plain or TLS-wrapped TCP stream.
#[derive(Debug)]
pub enum Transport {
    Plain(TcpStream),
    Tls(Box<TlsStream<TcpStream>>),
}

impl AsyncRead for Transport {
    fn poll_read(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &mut ReadBuf<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Transport::Plain(s) => Pin::new(s).poll_read(cx, buf),
            Transport::Tls(s) => Pin::new(s.as_mut()).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for Transport {
    fn poll_write(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            Transport::Plain(s) => Pin::new(s).poll_write(cx, buf),
            Transport::Tls(s) => Pin::new(s.as_mut()).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Transport::Plain(s) => Pin::new(s).poll_flush(cx),
            Transport::Tls(s) => Pin::new(s.as_mut()).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Transport::Plain(s) => Pin::new(s).poll_shutdown(cx),
            Transport::Tls(s) => Pin::new(s.as_mut()).poll_shutdown(cx),
        }
    }
}

/// Buffered transport. Reads go through the buffer, writes pass straight through.
pub type ConnectionStream = BufReader<Transport>;

/// An open connection to `host:port`.
///
/// Owned by exactly one holder at a time: the pool while idle, or the
/// request / WebSocket session using it.
#[derive(Debug)]
pub struct Connection {
    id: ConnectionId,
    host: String,
    port: u16,
    stream: ConnectionStream,
}

impl Connection {
    /// Open a new connection, performing the TLS handshake when `tls` is given.
    pub async fn open(host: &str, port: u16, tls: Option<&TlsConnector>) -> Result<Self, HttpError> {
        let addr = format!("{}:{}", host, port);
        let tcp = TcpStream::connect((host, port))
            .await
            .map_err(|source| HttpError::Connect { addr: addr.clone(), source })?;
        if let Err(e) = tcp.set_nodelay(true) {
            tracing::debug!(error = %e, "Failed to set TCP_NODELAY");
        }

        let transport = match tls {
            Some(connector) => {
                let server_name = ServerName::try_from(host.to_string())
                    .map_err(|e| HttpError::Tls(format!("invalid server name {}: {}", host, e)))?;
                let stream = connector
                    .connect(server_name, tcp)
                    .await
                    .map_err(|e| HttpError::Tls(e.to_string()))?;
                Transport::Tls(Box::new(stream))
            }
            None => Transport::Plain(tcp),
        };

        let id = ConnectionId::new();
        tracing::debug!(connection_id = %id, addr = %addr, tls = tls.is_some(), "Connection opened");

        Ok(Self {
            id,
            host: host.to_string(),
            port,
            stream: BufReader::new(transport),
        })
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Pool key for this connection.
    pub fn key(&self) -> String {
        pool_key(&self.host, self.port)
    }

    pub fn is_tls(&self) -> bool {
        matches!(self.stream.get_ref(), Transport::Tls(_))
    }

    pub fn stream(&mut self) -> &mut ConnectionStream {
        &mut self.stream
    }

    /// Give up the connection identity and keep only the stream.
    ///
    /// Bytes already buffered (for example frames that arrived right behind an
    /// upgrade response) stay in the returned reader.
    pub fn into_stream(self) -> ConnectionStream {
        self.stream
    }

    /// Shut down the write side and drop the transport.
    pub async fn close(mut self) {
        if let Err(e) = self.stream.get_mut().shutdown().await {
            tracing::trace!(connection_id = %self.id, error = %e, "Shutdown on close failed");
        }
        tracing::trace!(connection_id = %self.id, "Connection closed");
    }
}

/// Key used by the pool: `host:port`.
pub fn pool_key(host: &str, port: u16) -> String {
    format!("{}:{}", host, port)
}
