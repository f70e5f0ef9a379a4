//! Byte-stream primitives for HTTP/1.1 framing.
//!
//! # Responsibilities
//! - Read CRLF-terminated lines and `Name: Value` header blocks
//! - Decode chunked transfer encoding (with trailers)
//! - Read Content-Length or read-to-EOF bodies
//! - Publish a 0..1 progress value while bodies arrive
//!
//! All readers work on any `AsyncBufRead`, so they run equally over a pooled
//! connection or an in-memory buffer in tests.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::http::error::HttpError;
use crate::http::headers::HeaderSet;

const COPY_BUFFER: usize = 8192;

/// Shared 0..1 progress value.
///
/// Cloning shares the underlying value, so a caller can watch a body being
/// read from another task.
#[derive(Debug, Clone, Default)]
pub struct Progress(Arc<AtomicU32>);

impl Progress {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self) -> f32 {
        f32::from_bits(self.0.load(Ordering::Relaxed))
    }

    pub fn set(&self, value: f32) {
        self.0.store(value.clamp(0.0, 1.0).to_bits(), Ordering::Relaxed);
    }

    fn set_fraction(&self, done: u64, total: u64) {
        if total == 0 {
            self.set(1.0);
        } else {
            self.set(done as f32 / total as f32);
        }
    }
}

/// Whether a missing Content-Length means "read to EOF" or "no body".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyMode {
    /// Client-side responses: without a length, read until the peer closes.
    Lenient,
    /// Server-side requests: without a length, there is no body.
    Strict,
}

/// Read one line terminated by `\n`, trimmed of surrounding whitespace.
pub async fn read_line<R: AsyncBufRead + Unpin + ?Sized>(reader: &mut R) -> Result<String, HttpError> {
    let mut line = Vec::new();
    let read = reader
        .read_until(b'\n', &mut line)
        .await
        .map_err(|e| HttpError::StreamTerminated(format!("Terminated Stream: {}", e)))?;

    if read == 0 || line.last() != Some(&b'\n') {
        return Err(HttpError::StreamTerminated("Unterminated Stream".to_string()));
    }

    Ok(String::from_utf8_lossy(&line).trim().to_string())
}

/// Read `Name: Value` lines into `headers` until an empty line.
///
/// Lines without a colon are skipped. Names and values are trimmed.
pub async fn read_header_block<R: AsyncBufRead + Unpin + ?Sized>(
    reader: &mut R,
    headers: &mut HeaderSet,
) -> Result<(), HttpError> {
    loop {
        let line = read_line(reader).await?;
        if line.is_empty() {
            return Ok(());
        }
        match line.split_once(':') {
            Some((name, value)) => headers.add(name.trim(), value.trim()),
            None => tracing::debug!(line = %line, "Ignoring malformed header line"),
        }
    }
}

/// Decode a chunked body into `output`, stopping at the zero-size chunk.
///
/// Trailers are not consumed here; follow with [`read_header_block`].
pub async fn read_chunked_body<R, W>(
    reader: &mut R,
    output: &mut W,
    progress: &Progress,
) -> Result<u64, HttpError>
where
    R: AsyncBufRead + Unpin + ?Sized,
    W: AsyncWrite + Unpin + ?Sized,
{
    let mut total = 0u64;
    let mut buffer = vec![0u8; COPY_BUFFER];

    loop {
        let size_line = read_line(reader).await?;
        let digits = size_line.split(';').next().unwrap_or("").trim();
        let size = u64::from_str_radix(digits, 16).map_err(|_| HttpError::BadChunkSize(size_line.clone()))?;
        if size == 0 {
            break;
        }

        progress.set(0.0);
        let mut remaining = size;
        while remaining > 0 {
            let want = remaining.min(buffer.len() as u64) as usize;
            let count = reader
                .read(&mut buffer[..want])
                .await
                .map_err(|e| HttpError::StreamTerminated(format!("Terminated Stream: {}", e)))?;
            if count == 0 {
                return Err(HttpError::StreamTerminated("Unterminated Stream".to_string()));
            }
            output.write_all(&buffer[..count]).await?;
            remaining -= count as u64;
            progress.set_fraction(size - remaining, size);
        }
        total += size;

        // Chunk data is followed by CRLF.
        let mut crlf = [0u8; 2];
        reader
            .read_exact(&mut crlf)
            .await
            .map_err(|_| HttpError::StreamTerminated("Unterminated Stream".to_string()))?;
    }

    progress.set(1.0);
    Ok(total)
}

/// Read a body framed by Content-Length, or by EOF in lenient mode.
///
/// Never reads past a declared length, so the connection stays usable for the
/// next message. A body cut short by EOF simply ends.
pub async fn read_length_body<R, W>(
    reader: &mut R,
    output: &mut W,
    headers: &HeaderSet,
    mode: BodyMode,
    progress: &Progress,
) -> Result<u64, HttpError>
where
    R: AsyncBufRead + Unpin + ?Sized,
    W: AsyncWrite + Unpin + ?Sized,
{
    let mut buffer = vec![0u8; COPY_BUFFER];
    let mut total = 0u64;

    match headers.get("Content-Length").trim().parse::<u64>() {
        Ok(length) => {
            let mut remaining = length;
            while remaining > 0 {
                let want = remaining.min(buffer.len() as u64) as usize;
                let count = reader.read(&mut buffer[..want]).await?;
                if count == 0 {
                    tracing::warn!(expected = length, received = total, "Body ended before Content-Length");
                    break;
                }
                output.write_all(&buffer[..count]).await?;
                remaining -= count as u64;
                total += count as u64;
                progress.set_fraction(total, length);
            }
        }
        Err(_) => {
            if mode == BodyMode::Lenient {
                loop {
                    let count = reader.read(&mut buffer).await?;
                    if count == 0 {
                        break;
                    }
                    output.write_all(&buffer[..count]).await?;
                    total += count as u64;
                }
            }
        }
    }

    progress.set(1.0);
    Ok(total)
}

/// Read a message body as framed by `headers`, including chunked trailers.
pub async fn read_body<R, W>(
    reader: &mut R,
    output: &mut W,
    headers: &mut HeaderSet,
    mode: BodyMode,
    progress: &Progress,
) -> Result<u64, HttpError>
where
    R: AsyncBufRead + Unpin + ?Sized,
    W: AsyncWrite + Unpin + ?Sized,
{
    if headers.get("Transfer-Encoding").eq_ignore_ascii_case("chunked") {
        let total = read_chunked_body(reader, output, progress).await?;
        read_header_block(reader, headers).await?;
        Ok(total)
    } else {
        read_length_body(reader, output, headers, mode, progress).await
    }
}
