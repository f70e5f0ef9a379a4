//! Timeout enforcement.
//!
//! # Responsibilities
//! - Race a whole operation against an optional deadline
//! - Cancel the operation cleanly on expiry
//!
//! # Design Decisions
//! - Uses Tokio's timeout facilities; the losing future is dropped, which
//!   aborts its in-flight I/O and closes any connection it held
//! - Timeout errors are distinct from other errors

use std::future::Future;
use std::time::Duration;

use crate::http::error::HttpError;

/// Run `operation`, failing with [`HttpError::Timeout`] once `limit` passes.
///
/// `None` waits indefinitely.
pub async fn with_deadline<T, F>(limit: Option<Duration>, operation: F) -> Result<T, HttpError>
where
    F: Future<Output = Result<T, HttpError>>,
{
    match limit {
        Some(limit) => match tokio::time::timeout(limit, operation).await {
            Ok(result) => result,
            Err(_) => Err(HttpError::Timeout(limit)),
        },
        None => operation.await,
    }
}
