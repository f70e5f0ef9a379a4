use crate::ws::error::WebSocketError;

/// Errors produced by the RPC layer.
#[derive(Debug, thiserror::Error)]
pub enum RpcError {
    /// The peer answered a call with `success = false`.
    #[error("remote call failed: {0}")]
    Remote(String),

    /// The session ended before the call was answered.
    #[error("session dropped before the call was answered")]
    Dropped,

    #[error("message encoding failed: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("socket error: {0}")]
    Socket(#[from] WebSocketError),

    /// An argument was missing or had the wrong shape.
    #[error("argument {index}: {reason}")]
    BadArgument { index: usize, reason: String },
}
