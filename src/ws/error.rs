use std::io;

use crate::http::error::HttpError;
use crate::ws::session::SessionState;

/// Errors produced by WebSocket sessions.
#[derive(Debug, thiserror::Error)]
pub enum WebSocketError {
    /// The handshake request itself failed.
    #[error("handshake request failed: {0}")]
    Http(#[from] HttpError),

    /// The server answered the upgrade request with something other than a valid 101.
    #[error("handshake rejected: {0}")]
    HandshakeRejected(String),

    /// `Sec-WebSocket-Accept` did not match the key that was sent.
    #[error("Sec-WebSocket-Accept mismatch: expected {expected}, got {actual:?}")]
    AcceptMismatch { expected: String, actual: String },

    #[error("invalid websocket url: {0}")]
    InvalidUrl(String),

    /// The session cannot send in its current state.
    #[error("session is {0:?}")]
    NotOpen(SessionState),

    /// A frame or reassembled message exceeded the configured limit.
    #[error("frame of {size} bytes exceeds limit of {max}")]
    FrameTooLarge { size: u64, max: u64 },

    /// The peer violated the framing rules.
    #[error("protocol violation: {0}")]
    Protocol(String),

    /// A text message was not valid UTF-8.
    #[error("text message is not valid UTF-8")]
    InvalidUtf8,

    #[error("io error: {0}")]
    Io(#[from] io::Error),
}
