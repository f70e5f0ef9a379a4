//! HTTP/1.1 client subsystem.
//!
//! # Data Flow
//! ```text
//! Request
//!     → client.rs (attempt loop: standard headers, proxy, pool checkout)
//!     → request.rs (request line, headers, body)
//!     → response.rs (status line, headers)
//!         → protocol.rs (chunked / Content-Length / read-to-EOF body)
//!         → compression (gzip)
//!     → client.rs (cookies, redirect / retry / upgrade, settle connection, ETag)
//!     → Response, or PendingRequest when spawned (pending.rs)
//! ```
//!
//! # Design Decisions
//! - Only transport failures are retried; redirects and retries share one budget
//! - Client state (pool, cookies, ETags) lives in an explicit `HttpClient`
//! - Timeouts cancel the attempt; a cancelled connection is closed, never pooled
//! - `inbound.rs` reads requests strictly for server-role callers

pub mod cache;
pub mod client;
pub mod cookies;
pub mod error;
pub mod headers;
pub mod inbound;
pub mod pending;
pub mod protocol;
pub mod proxy;
pub mod request;
pub mod response;

pub use client::HttpClient;
pub use error::HttpError;
pub use headers::HeaderSet;
pub use pending::PendingRequest;
pub use protocol::Progress;
pub use request::Request;
pub use response::Response;
