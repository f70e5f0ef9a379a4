//! Outgoing request model and its wire serialization.

use std::fmt;
use std::time::Duration;

use base64::prelude::*;
use percent_encoding::percent_decode_str;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use url::Url;
use uuid::Uuid;

use crate::http::error::HttpError;
use crate::http::headers::HeaderSet;
use crate::http::protocol::Progress;

const UPLOAD_CHUNK: usize = 8192;

/// Destination for a response body that should not be buffered in memory.
pub type BodySink = Box<dyn AsyncWrite + Send + Unpin>;

/// An HTTP request.
///
/// Option-typed settings left as `None` take the client's configured default.
/// The pipeline owns the request while it runs: redirects rewrite `method`,
/// `url` and `body`, retries leave them untouched.
pub struct Request {
    pub id: Uuid,
    pub method: String,
    pub url: Url,
    pub headers: HeaderSet,
    pub body: Vec<u8>,
    pub max_redirects: Option<u32>,
    pub accept_gzip: Option<bool>,
    pub use_cache: Option<bool>,
    pub enable_cookies: Option<bool>,
    pub timeout: Option<Duration>,
    pub proxy: Option<Url>,
    pub(crate) body_sink: Option<BodySink>,
    pub(crate) progress: Progress,
    pub(crate) upload_progress: Progress,
}

impl Request {
    pub fn new(method: &str, url: &str) -> Result<Self, HttpError> {
        let url = Url::parse(url).map_err(|e| HttpError::InvalidUrl(format!("{}: {}", url, e)))?;
        Ok(Self::from_url(method, url))
    }

    pub fn from_url(method: &str, url: Url) -> Self {
        Self {
            id: Uuid::new_v4(),
            method: method.to_ascii_uppercase(),
            url,
            headers: HeaderSet::new(),
            body: Vec::new(),
            max_redirects: None,
            accept_gzip: None,
            use_cache: None,
            enable_cookies: None,
            timeout: None,
            proxy: None,
            body_sink: None,
            progress: Progress::new(),
            upload_progress: Progress::new(),
        }
    }

    pub fn get(url: &str) -> Result<Self, HttpError> {
        Self::new("GET", url)
    }

    pub fn post(url: &str, body: impl Into<Vec<u8>>) -> Result<Self, HttpError> {
        Ok(Self::new("POST", url)?.body(body))
    }

    pub fn header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.set(name, value);
        self
    }

    pub fn body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    pub fn max_redirects(mut self, max: u32) -> Self {
        self.max_redirects = Some(max);
        self
    }

    pub fn accept_gzip(mut self, enabled: bool) -> Self {
        self.accept_gzip = Some(enabled);
        self
    }

    pub fn use_cache(mut self, enabled: bool) -> Self {
        self.use_cache = Some(enabled);
        self
    }

    pub fn enable_cookies(mut self, enabled: bool) -> Self {
        self.enable_cookies = Some(enabled);
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn proxy(mut self, proxy: Url) -> Self {
        self.proxy = Some(proxy);
        self
    }

    /// Write the final response body into `sink` instead of `Response::body`.
    ///
    /// The body is handed over once the response is complete, so a retried
    /// attempt or a followed redirect never writes to the sink.
    ///
    /// Gzip bodies written to a sink are left compressed.
    pub fn body_sink(mut self, sink: BodySink) -> Self {
        self.body_sink = Some(sink);
        self
    }

    /// Download progress of the current attempt, 0..1.
    pub fn progress(&self) -> Progress {
        self.progress.clone()
    }

    /// Upload progress of the current attempt, 0..1.
    pub fn upload_progress(&self) -> Progress {
        self.upload_progress.clone()
    }

    pub fn is_head(&self) -> bool {
        self.method.eq_ignore_ascii_case("HEAD")
    }

    /// Request target: origin form (`/path?query`) or, through a proxy, absolute form.
    pub fn target(&self, via_proxy: bool) -> String {
        if via_proxy {
            let mut absolute = self.url.clone();
            absolute.set_fragment(None);
            return absolute.into();
        }
        match self.url.query() {
            Some(query) => format!("{}?{}", self.url.path(), query),
            None => self.url.path().to_string(),
        }
    }

    /// Fill in `Accept`, `Authorization` from user-info, and a correct `Content-Length`.
    pub fn prepare_headers(&mut self) {
        if !self.headers.contains("Accept") {
            self.headers.set("Accept", "*/*");
        }

        if !self.url.username().is_empty() && !self.headers.contains("Authorization") {
            let credentials = format!("{}:{}", self.url.username(), self.url.password().unwrap_or(""));
            let decoded: Vec<u8> = percent_decode_str(&credentials).collect();
            self.headers
                .set("Authorization", format!("Basic {}", BASE64_STANDARD.encode(decoded)));
        }

        if self.body.is_empty() {
            self.headers.remove("Content-Length");
        } else {
            self.headers.set("Content-Length", self.body.len().to_string());
        }
    }

    /// Write the request line, headers and body.
    pub async fn write_to<W>(&mut self, writer: &mut W, via_proxy: bool) -> Result<(), HttpError>
    where
        W: AsyncWrite + Unpin + ?Sized,
    {
        self.prepare_headers();
        self.upload_progress.set(0.0);

        let mut head = format!("{} {} HTTP/1.1\r\n", self.method, self.target(via_proxy)).into_bytes();
        head.extend_from_slice(&self.headers.to_wire());
        head.extend_from_slice(b"\r\n");
        writer.write_all(&head).await?;

        let total = self.body.len();
        let mut sent = 0usize;
        for chunk in self.body.chunks(UPLOAD_CHUNK) {
            writer.write_all(chunk).await?;
            sent += chunk.len();
            self.upload_progress.set(sent as f32 / total as f32);
        }
        writer.flush().await?;
        self.upload_progress.set(1.0);
        Ok(())
    }
}

impl fmt::Debug for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Request")
            .field("id", &self.id)
            .field("method", &self.method)
            .field("url", &self.url.as_str())
            .field("headers", &self.headers)
            .field("body_len", &self.body.len())
            .field("has_sink", &self.body_sink.is_some())
            .finish()
    }
}

impl fmt::Display for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.method, self.url)
    }
}
