//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the client engine.
//! All types derive Serde traits for deserialization from config files.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Root configuration for the client engine.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ClientConfig {
    /// Request/response pipeline settings.
    pub http: HttpConfig,

    /// Proxy resolution settings.
    pub proxy: ProxyConfig,

    /// TLS settings for `https`/`wss` connections.
    pub tls: TlsConfig,

    /// WebSocket session settings.
    pub websocket: WebSocketConfig,

    /// Reconnect policy for WebSocket sessions.
    pub reconnect: ReconnectConfig,

    /// Consumer loop settings.
    pub scheduler: SchedulerConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Defaults applied to every request built by the client.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct HttpConfig {
    /// Upper bound on attempts per request (redirects and retries share it).
    pub max_redirects: u32,

    /// Send `Accept-Encoding: gzip` and inflate gzip bodies.
    pub accept_gzip: bool,

    /// Send `If-None-Match` from the ETag cache and record new ETags.
    pub use_cache: bool,

    /// Attach cookies from the jar. Response cookies are always stored.
    pub enable_cookies: bool,

    /// Whole-request timeout in seconds (0 = no timeout).
    pub timeout_secs: u64,

    /// `User-Agent` sent when the request does not set one.
    pub user_agent: String,
}

impl HttpConfig {
    /// The request timeout, if one is configured.
    pub fn timeout(&self) -> Option<Duration> {
        (self.timeout_secs > 0).then(|| Duration::from_secs(self.timeout_secs))
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            max_redirects: 8,
            accept_gzip: true,
            use_cache: false,
            enable_cookies: true,
            timeout_secs: 0,
            user_agent: concat!("wirelink/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

/// Proxy resolution configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ProxyConfig {
    /// Explicit proxy URL; takes precedence over the system proxy.
    pub url: Option<String>,

    /// Consult `HTTP_PROXY` / `HTTPS_PROXY` / `ALL_PROXY` / `NO_PROXY`.
    pub use_system_proxy: bool,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            url: None,
            use_system_proxy: true,
        }
    }
}

/// TLS configuration.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct TlsConfig {
    /// Verify server certificates against the bundled web PKI roots.
    ///
    /// Defaults to `false`: every certificate is accepted. This is insecure and
    /// is logged as such when a client is built.
    pub verify_certificates: bool,
}

/// WebSocket session configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct WebSocketConfig {
    /// Longest the writer task sleeps before checking the outgoing queue.
    pub writer_idle_ms: u64,

    /// Handshake timeout in seconds (0 = no timeout).
    pub connect_timeout_secs: u64,

    /// How long the reader waits for the peer to end the transport once closing.
    pub close_timeout_secs: u64,

    /// Largest frame payload or reassembled message accepted.
    pub max_message_bytes: u64,

    /// `Origin` header sent with the handshake.
    pub origin: String,

    /// Values for `Sec-WebSocket-Protocol` (omitted when empty).
    pub protocols: Vec<String>,
}

impl WebSocketConfig {
    pub fn writer_idle(&self) -> Duration {
        Duration::from_millis(self.writer_idle_ms)
    }

    pub fn connect_timeout(&self) -> Option<Duration> {
        (self.connect_timeout_secs > 0).then(|| Duration::from_secs(self.connect_timeout_secs))
    }

    pub fn close_timeout(&self) -> Duration {
        Duration::from_secs(self.close_timeout_secs)
    }
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        Self {
            writer_idle_ms: 100,
            connect_timeout_secs: 0,
            close_timeout_secs: 5,
            max_message_bytes: 16 * 1024 * 1024,
            origin: "null".to_string(),
            protocols: Vec::new(),
        }
    }
}

/// Reconnect configuration for WebSocket sessions.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ReconnectConfig {
    /// Enable reconnect attempts.
    pub enabled: bool,

    /// Maximum number of connect attempts.
    pub max_attempts: u32,

    /// Base delay for exponential backoff in milliseconds.
    pub base_delay_ms: u64,

    /// Maximum delay for exponential backoff in milliseconds.
    pub max_delay_ms: u64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_attempts: 5,
            base_delay_ms: 2000,
            max_delay_ms: 30_000,
        }
    }
}

/// Consumer loop configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Interval between ticks when the scheduler drives itself.
    pub tick_ms: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self { tick_ms: 16 }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}
