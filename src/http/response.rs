//! Response parsing.

use std::borrow::Cow;

use serde::de::DeserializeOwned;
use tokio::io::AsyncBufRead;
use url::Url;

use crate::compression;
use crate::http::error::HttpError;
use crate::http::headers::HeaderSet;
use crate::http::protocol::{read_body, read_header_block, read_line, BodyMode, Progress};
use crate::net::Connection;

/// A parsed HTTP response.
#[derive(Debug)]
pub struct Response {
    pub status: u16,
    pub message: String,
    pub protocol: String,
    pub headers: HeaderSet,
    /// Buffered body. Empty once it has been handed to a body sink.
    pub body: Vec<u8>,
    /// URL that produced this response (after redirects).
    pub url: Url,
    pub(crate) upgraded: Option<Connection>,
}

/// Parse a status line: `protocol status-code reason...`.
pub fn parse_status_line(line: &str) -> Result<(String, u16, String), HttpError> {
    let mut parts = line.splitn(3, ' ');
    let protocol = parts.next().unwrap_or("");
    let status = parts
        .next()
        .and_then(|code| code.trim().parse::<u16>().ok())
        .ok_or_else(|| HttpError::BadStatusLine(line.to_string()))?;
    if !protocol.starts_with("HTTP/") {
        return Err(HttpError::BadStatusLine(line.to_string()));
    }
    let message = parts.next().unwrap_or("").trim().to_string();
    Ok((protocol.to_string(), status, message))
}

/// Statuses that never carry a body.
pub fn status_has_body(status: u16) -> bool {
    !matches!(status, 101 | 204 | 304)
}

impl Response {
    /// Read a response from `reader`.
    ///
    /// The body is buffered. With `inflate` set, gzip bodies are decompressed;
    /// otherwise the bytes are kept exactly as they came off the wire.
    pub async fn read<R>(
        reader: &mut R,
        url: Url,
        head_request: bool,
        inflate: bool,
        progress: &Progress,
    ) -> Result<Self, HttpError>
    where
        R: AsyncBufRead + Unpin + ?Sized,
    {
        progress.set(0.0);
        let line = read_line(reader).await?;
        let (protocol, status, message) = parse_status_line(&line)?;

        let mut headers = HeaderSet::new();
        read_header_block(reader, &mut headers).await?;

        let mut response = Self {
            status,
            message,
            protocol,
            headers,
            body: Vec::new(),
            url,
            upgraded: None,
        };

        if head_request || !status_has_body(status) {
            progress.set(1.0);
            return Ok(response);
        }

        let mut buffer = Vec::new();
        read_body(reader, &mut buffer, &mut response.headers, BodyMode::Lenient, progress).await?;
        if inflate && response.headers.get("Content-Encoding").eq_ignore_ascii_case("gzip") {
            buffer = compression::decompress(&buffer).map_err(HttpError::Decompress)?;
        }
        response.body = buffer;

        Ok(response)
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn is_redirect(&self) -> bool {
        matches!(self.status, 301 | 302 | 307)
    }

    /// True unless the server speaks HTTP/1.0 or asked to close.
    pub fn keep_alive(&self) -> bool {
        !self.protocol.eq_ignore_ascii_case("HTTP/1.0")
            && !self.headers.get("Connection").trim().eq_ignore_ascii_case("close")
    }

    pub fn text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.body)
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_slice(&self.body)
    }

    pub fn is_upgraded(&self) -> bool {
        self.upgraded.is_some()
    }

    /// Take the connection of a `101 Switching Protocols` response.
    pub fn take_upgraded(&mut self) -> Option<Connection> {
        self.upgraded.take()
    }
}
