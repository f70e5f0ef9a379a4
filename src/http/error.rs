use std::io;
use std::time::Duration;

/// Errors produced by the request/response pipeline.
#[derive(Debug, thiserror::Error)]
pub enum HttpError {
    /// The transport ended (or failed) before a complete message was read.
    #[error("stream terminated: {0}")]
    StreamTerminated(String),

    /// The response start-line could not be parsed.
    #[error("bad status line: {0:?}")]
    BadStatusLine(String),

    /// A chunk-size line was not valid hexadecimal.
    #[error("bad chunk size: {0:?}")]
    BadChunkSize(String),

    /// The request did not complete within its timeout.
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    /// The request target or a redirect location is unusable.
    #[error("invalid url: {0}")]
    InvalidUrl(String),

    /// Opening the TCP connection failed.
    #[error("connect to {addr} failed: {source}")]
    Connect {
        addr: String,
        #[source]
        source: io::Error,
    },

    /// TLS setup or handshake failed.
    #[error("tls error: {0}")]
    Tls(String),

    /// I/O error on the connection.
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    /// Writing the body to the caller's sink failed.
    #[error("body sink error: {0}")]
    Sink(#[source] io::Error),

    /// A gzip-encoded body could not be inflated.
    #[error("decompression failed: {0}")]
    Decompress(#[source] io::Error),

    /// Every attempt failed at the transport level.
    #[error("gave up after {attempts} attempts: {last}")]
    RetriesExhausted { attempts: u32, last: Box<HttpError> },

    /// The request was cancelled before it completed.
    #[error("request cancelled")]
    Cancelled,
}

impl HttpError {
    /// True for failures that justify another attempt on a fresh connection.
    pub fn is_retryable(&self) -> bool {
        matches!(self, HttpError::StreamTerminated(_) | HttpError::Io(_))
    }
}
