//! Server-role helpers: read a request, write a response.
//!
//! Requests are read in strict mode: without `Content-Length` or chunked
//! framing a request has no body, so a keep-alive peer is never waited on.

use tokio::io::{AsyncBufRead, AsyncWrite, AsyncWriteExt};

use crate::http::error::HttpError;
use crate::http::headers::HeaderSet;
use crate::http::protocol::{read_body, read_header_block, read_line, BodyMode, Progress};

/// A request received from a peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundRequest {
    pub method: String,
    pub target: String,
    pub protocol: String,
    pub headers: HeaderSet,
    pub body: Vec<u8>,
}

impl InboundRequest {
    /// Path part of the target, without the query.
    pub fn path(&self) -> &str {
        self.target.split('?').next().unwrap_or("")
    }
}

/// Read one request. Fails with `BadStatusLine` on a malformed request line.
pub async fn read_request<R>(reader: &mut R) -> Result<InboundRequest, HttpError>
where
    R: AsyncBufRead + Unpin + ?Sized,
{
    let line = read_line(reader).await?;
    let mut parts = line.split_whitespace();
    let (method, target, protocol) = match (parts.next(), parts.next(), parts.next()) {
        (Some(m), Some(t), Some(p)) if p.starts_with("HTTP/") => (m.to_string(), t.to_string(), p.to_string()),
        _ => return Err(HttpError::BadStatusLine(line.clone())),
    };

    let mut headers = HeaderSet::new();
    read_header_block(reader, &mut headers).await?;

    let mut body = Vec::new();
    read_body(reader, &mut body, &mut headers, BodyMode::Strict, &Progress::new()).await?;

    Ok(InboundRequest {
        method,
        target,
        protocol,
        headers,
        body,
    })
}

/// Write a full response. `Content-Length` always reflects `body`.
pub async fn write_response<W>(
    writer: &mut W,
    status: u16,
    reason: &str,
    headers: &HeaderSet,
    body: &[u8],
) -> Result<(), HttpError>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    let mut headers = headers.clone();
    headers.remove("Transfer-Encoding");
    headers.set("Content-Length", body.len().to_string());

    let mut out = format!("HTTP/1.1 {} {}\r\n", status, reason).into_bytes();
    out.extend_from_slice(&headers.to_wire());
    out.extend_from_slice(b"\r\n");
    out.extend_from_slice(body);
    writer.write_all(&out).await?;
    writer.flush().await?;
    Ok(())
}
