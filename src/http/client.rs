//! The request/response pipeline.
//!
//! # Responsibilities
//! - Attach standard headers (Host, User-Agent, Accept-Encoding, Cookie, If-None-Match)
//! - Resolve the proxy and check out a pooled connection
//! - Write the request, parse the response
//! - Retry transport failures, follow redirects, within one attempt budget
//! - Settle each connection: pool it, close it, or hand it over on upgrade
//! - Update the cookie jar and the ETag cache

use std::sync::Arc;
use std::time::Instant;

use tokio::io::AsyncWriteExt;
use tokio::sync::oneshot;
use tracing::Instrument;
use url::Url;

use crate::config::ClientConfig;
use crate::http::cache::EtagCache;
use crate::http::cookies::CookieJar;
use crate::http::error::HttpError;
use crate::http::pending::PendingRequest;
use crate::http::proxy;
use crate::http::request::Request;
use crate::http::response::Response;
use crate::net::{build_connector, CertificatePolicy, Connection, ConnectionPool};
use crate::observability::metrics;
use crate::resilience::retries::{should_retry, AttemptBudget};
use crate::resilience::timeouts::with_deadline;

/// Per-request settings after applying client defaults.
#[derive(Debug, Clone)]
struct Settings {
    max_redirects: u32,
    accept_gzip: bool,
    use_cache: bool,
    enable_cookies: bool,
    proxy: Option<Url>,
}

struct ClientInner {
    config: ClientConfig,
    explicit_proxy: Option<Url>,
    pool: ConnectionPool,
    cookies: CookieJar,
    etags: EtagCache,
}

/// HTTP/1.1 client owning a connection pool, a cookie jar and an ETag cache.
///
/// Cheap to clone; clones share all state.
#[derive(Clone)]
pub struct HttpClient {
    inner: Arc<ClientInner>,
}

impl std::fmt::Debug for HttpClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpClient")
            .field("idle_connections", &self.inner.pool.idle_count())
            .field("cookies", &self.inner.cookies.len())
            .field("etags", &self.inner.etags.len())
            .finish()
    }
}

impl HttpClient {
    /// Build a client with the certificate policy named by the config.
    pub fn new(config: ClientConfig) -> Result<Self, HttpError> {
        let policy = CertificatePolicy::from_config(&config.tls);
        Self::with_certificate_policy(config, policy)
    }

    pub fn with_certificate_policy(config: ClientConfig, policy: CertificatePolicy) -> Result<Self, HttpError> {
        let connector = build_connector(&policy)?;

        let explicit_proxy = match config.proxy.url.as_deref() {
            Some(raw) => match Url::parse(raw) {
                Ok(url) => Some(url),
                Err(e) => {
                    tracing::warn!(proxy = %raw, error = %e, "Ignoring unparseable proxy url");
                    None
                }
            },
            None => None,
        };

        Ok(Self {
            inner: Arc::new(ClientInner {
                config,
                explicit_proxy,
                pool: ConnectionPool::new(connector),
                cookies: CookieJar::new(),
                etags: EtagCache::new(),
            }),
        })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    pub fn pool(&self) -> &ConnectionPool {
        &self.inner.pool
    }

    pub fn cookies(&self) -> &CookieJar {
        &self.inner.cookies
    }

    pub fn etags(&self) -> &EtagCache {
        &self.inner.etags
    }

    pub async fn get(&self, url: &str) -> Result<Response, HttpError> {
        self.execute(Request::get(url)?).await
    }

    pub async fn post(&self, url: &str, body: impl Into<Vec<u8>>) -> Result<Response, HttpError> {
        self.execute(Request::post(url, body)?).await
    }

    /// Run a request to completion on the current task.
    pub async fn execute(&self, mut request: Request) -> Result<Response, HttpError> {
        let start = Instant::now();
        let method = request.method.clone();
        let timeout = request.timeout.or_else(|| self.inner.config.http.timeout());
        let span = tracing::debug_span!("request", request_id = %request.id, method = %method);

        let result = with_deadline(timeout, self.run(&mut request)).instrument(span).await;

        match &result {
            Ok(response) => {
                tracing::debug!(
                    request_id = %request.id,
                    status = response.status,
                    url = %response.url,
                    elapsed_ms = start.elapsed().as_millis() as u64,
                    "Request completed"
                );
                metrics::record_request(&method, response.status, start);
            }
            Err(e) => {
                tracing::warn!(request_id = %request.id, url = %request.url, error = %e, "Request failed");
                metrics::record_request_error(&method, start);
            }
        }
        result
    }

    /// Spawn a request onto the runtime and return a handle to it.
    ///
    /// Must be called from within a tokio runtime.
    pub fn send(&self, request: Request) -> PendingRequest {
        let (tx, rx) = oneshot::channel();
        let client = self.clone();
        let id = request.id;
        let progress = request.progress();
        let upload_progress = request.upload_progress();

        let handle = tokio::spawn(async move {
            let result = client.execute(request).await;
            let _ = tx.send(result);
        });

        PendingRequest::new(id, rx, handle, progress, upload_progress)
    }

    /// Drop every idle pooled connection.
    pub fn shutdown(&self) {
        self.inner.pool.clear();
        tracing::debug!("HTTP client shut down");
    }

    fn settings_for(&self, request: &Request) -> Settings {
        let defaults = &self.inner.config.http;
        Settings {
            max_redirects: request.max_redirects.unwrap_or(defaults.max_redirects),
            accept_gzip: request.accept_gzip.unwrap_or(defaults.accept_gzip),
            use_cache: request.use_cache.unwrap_or(defaults.use_cache),
            enable_cookies: request.enable_cookies.unwrap_or(defaults.enable_cookies),
            proxy: request.proxy.clone().or_else(|| self.inner.explicit_proxy.clone()),
        }
    }

    /// The attempt loop. Redirects and transport retries share the budget.
    async fn run(&self, request: &mut Request) -> Result<Response, HttpError> {
        let settings = self.settings_for(request);
        let caller_headers = request.headers.clone();
        let mut budget = AttemptBudget::new(settings.max_redirects);
        let mut superseded: Option<Response> = None;
        let mut last_error: Option<HttpError> = None;

        while let Some(attempt) = budget.next_attempt() {
            request.headers = caller_headers.clone();
            self.attach_standard_headers(request, &settings);

            let proxy = proxy::resolve(
                &request.url,
                settings.proxy.as_ref(),
                self.inner.config.proxy.use_system_proxy,
            );
            let (host, port, use_tls) = endpoint(&request.url, proxy.as_ref())?;
            let (mut conn, reused) = self.inner.pool.acquire(&host, port, use_tls).await?;

            tracing::trace!(
                attempt,
                connection_id = %conn.id(),
                reused,
                host = %host,
                port,
                proxied = proxy.is_some(),
                "Sending request"
            );

            let mut response = match exchange(&mut conn, request, proxy.is_some()).await {
                Ok(response) => response,
                Err(e) => {
                    self.inner.pool.discard(conn).await;
                    if !e.is_retryable() {
                        return Err(e);
                    }
                    superseded = None;
                    if should_retry(&e, &budget) {
                        tracing::debug!(attempt, error = %e, "Transport failure, retrying");
                        metrics::record_retry();
                        last_error = Some(e);
                        continue;
                    }
                    last_error = Some(e);
                    break;
                }
            };
            last_error = None;

            for e in self.inner.cookies.store_response_cookies(&request.url, &response.headers) {
                tracing::warn!(url = %request.url, error = %e, "Ignoring rejected Set-Cookie");
            }

            if response.status == 101 {
                tracing::debug!(connection_id = %conn.id(), "Connection upgraded");
                response.upgraded = Some(conn);
                return Ok(response);
            }

            self.settle(conn, &response).await;

            let location = response.headers.get("Location").trim().to_string();
            let next_url = match response.status {
                301 | 302 | 307 if !location.is_empty() => match request.url.join(&location) {
                    Ok(url) => Some(url),
                    Err(e) => {
                        tracing::warn!(location = %location, error = %e, "Unusable redirect location");
                        None
                    }
                },
                _ => None,
            };

            let Some(next_url) = next_url else {
                if settings.use_cache {
                    let etag = response.headers.get("ETag");
                    if !etag.is_empty() {
                        self.inner.etags.update(&request.url, etag);
                    }
                }
                deliver_body(request, &mut response).await?;
                return Ok(response);
            };

            if response.status != 307 {
                request.method = "GET".to_string();
                request.body.clear();
            }
            tracing::debug!(status = response.status, from = %request.url, to = %next_url, "Following redirect");
            request.url = next_url;
            superseded = Some(response);
        }

        match (last_error, superseded) {
            (Some(last), _) => Err(HttpError::RetriesExhausted {
                attempts: budget.used(),
                last: Box::new(last),
            }),
            (None, Some(mut response)) => {
                tracing::warn!(attempts = budget.used(), url = %response.url, "Redirect limit reached");
                deliver_body(request, &mut response).await?;
                Ok(response)
            }
            (None, None) => Err(HttpError::Cancelled),
        }
    }

    fn attach_standard_headers(&self, request: &mut Request, settings: &Settings) {
        request.headers.set("Host", host_header(&request.url));

        if !request.headers.contains("User-Agent") {
            request.headers.set("User-Agent", self.inner.config.http.user_agent.clone());
        }

        if settings.accept_gzip {
            request.headers.set("Accept-Encoding", "gzip");
        }

        if settings.enable_cookies {
            if let Some(cookie) = self.inner.cookies.cookie_header(&request.url) {
                request.headers.set("Cookie", cookie);
            }
        }

        if settings.use_cache {
            if let Some(etag) = self.inner.etags.get(&request.url) {
                request.headers.set("If-None-Match", etag);
            }
        }
    }

    /// Return a connection to the pool, or close it when the response forbids reuse.
    async fn settle(&self, conn: Connection, response: &Response) {
        if response.keep_alive() {
            self.inner.pool.release(conn);
        } else {
            tracing::trace!(connection_id = %conn.id(), "Closing connection after response");
            self.inner.pool.discard(conn).await;
        }
    }
}

/// Write `request` on `conn` and read the response.
///
/// The body is always buffered here, so a failed attempt leaves nothing behind
/// in the caller's sink.
async fn exchange(conn: &mut Connection, request: &mut Request, via_proxy: bool) -> Result<Response, HttpError> {
    let stream = conn.stream();
    request.write_to(stream, via_proxy).await?;

    let inflate = request.body_sink.is_none();
    Response::read(stream, request.url.clone(), request.is_head(), inflate, &request.progress).await
}

/// Move the final response body into the request's sink, if it has one.
async fn deliver_body(request: &mut Request, response: &mut Response) -> Result<(), HttpError> {
    let Some(sink) = request.body_sink.as_mut() else {
        return Ok(());
    };
    let body = std::mem::take(&mut response.body);
    sink.write_all(&body).await.map_err(HttpError::Sink)?;
    sink.flush().await.map_err(HttpError::Sink)
}

/// `Host` header value: the port is included unless it is 80 or 443.
pub fn host_header(url: &Url) -> String {
    let host = url.host_str().unwrap_or("");
    match url.port_or_known_default() {
        Some(80) | Some(443) | None => host.to_string(),
        Some(port) => format!("{}:{}", host, port),
    }
}

/// Host, port and TLS flag of the socket to open for `target`.
fn endpoint(target: &Url, proxy: Option<&Url>) -> Result<(String, u16, bool), HttpError> {
    let via = proxy.unwrap_or(target);
    let host = via
        .host_str()
        .ok_or_else(|| HttpError::InvalidUrl(format!("{} has no host", via)))?;
    let port = via
        .port_or_known_default()
        .ok_or_else(|| HttpError::InvalidUrl(format!("{} has no port", via)))?;
    let use_tls = proxy.is_none() && matches!(target.scheme(), "https" | "wss");
    let host = host.trim_start_matches('[').trim_end_matches(']').to_string();
    Ok((host, port, use_tls))
}
