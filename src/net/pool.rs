//! Idle connection pool.
//!
//! # Responsibilities
//! - Hand out an idle connection for `host:port`, or open a new one
//! - Keep at most one idle connection per key
//! - Close connections the protocol says cannot be reused
//!
//! A connection is removed from the map the moment it is checked out, so it is
//! never held by the pool and a request at the same time. Pooled connections
//! are not probed for liveness; a dead one fails on the next write or read and
//! the request pipeline retries on a fresh connection.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use tokio_rustls::TlsConnector;

use crate::http::error::HttpError;
use crate::net::connection::{pool_key, Connection};
use crate::observability::metrics;

/// Pool of idle connections keyed by `host:port`.
pub struct ConnectionPool {
    idle: Mutex<HashMap<String, Connection>>,
    tls: TlsConnector,
}

impl std::fmt::Debug for ConnectionPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("idle", &self.idle_count())
            .finish_non_exhaustive()
    }
}

impl ConnectionPool {
    pub fn new(tls: TlsConnector) -> Self {
        Self {
            idle: Mutex::new(HashMap::new()),
            tls,
        }
    }

    fn idle(&self) -> MutexGuard<'_, HashMap<String, Connection>> {
        self.idle.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Check out a connection to `host:port`.
    ///
    /// Returns the connection and whether it came from the pool.
    pub async fn acquire(&self, host: &str, port: u16, use_tls: bool) -> Result<(Connection, bool), HttpError> {
        let key = pool_key(host, port);
        let pooled = self.idle().remove(&key);

        if let Some(conn) = pooled {
            metrics::record_pool_checkout(true);
            tracing::trace!(connection_id = %conn.id(), key = %key, "Reusing pooled connection");
            return Ok((conn, true));
        }

        metrics::record_pool_checkout(false);
        let tls = use_tls.then_some(&self.tls);
        let conn = Connection::open(host, port, tls).await?;
        Ok((conn, false))
    }

    /// Return a connection for reuse, replacing any idle entry for its key.
    pub fn release(&self, conn: Connection) {
        let key = conn.key();
        tracing::trace!(connection_id = %conn.id(), key = %key, "Connection returned to pool");
        let replaced = self.idle().insert(key, conn);
        if let Some(old) = replaced {
            tracing::trace!(connection_id = %old.id(), "Replaced idle connection dropped");
        }
    }

    /// Close a connection and forget any idle entry for its key.
    pub async fn discard(&self, conn: Connection) {
        let stale = self.idle().remove(&conn.key());
        drop(stale);
        conn.close().await;
    }

    /// Number of idle connections.
    pub fn idle_count(&self) -> usize {
        self.idle().len()
    }

    pub fn contains(&self, host: &str, port: u16) -> bool {
        self.idle().contains_key(&pool_key(host, port))
    }

    /// Drop every idle connection.
    pub fn clear(&self) {
        let drained: Vec<Connection> = self.idle().drain().map(|(_, conn)| conn).collect();
        if !drained.is_empty() {
            tracing::debug!(count = drained.len(), "Idle connections dropped");
        }
    }
}
