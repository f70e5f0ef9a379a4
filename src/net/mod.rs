//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Request pipeline / WebSocket connect
//!     → pool.rs (idle connection for host:port?)
//!         hit  → reuse
//!         miss → connection.rs (TCP connect)
//!                  → tls.rs (optional TLS handshake)
//!     → caller owns the Connection until release / discard / upgrade
//! ```
//!
//! # Design Decisions
//! - At most one idle connection per `host:port`
//! - No liveness probe on checkout; failures surface as retryable read errors
//! - Certificate policy is pluggable; accept-all is the logged default

pub mod connection;
pub mod pool;
pub mod tls;

pub use connection::{Connection, ConnectionId, ConnectionStream, Transport};
pub use pool::ConnectionPool;
pub use tls::{build_connector, CertificatePolicy};
