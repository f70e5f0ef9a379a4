//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! HTTP request:
//!     → timeouts.rs (deadline over the whole attempt loop)
//!     → On transport failure: retries.rs (retryable? budget left?)
//!
//! WebSocket connect:
//!     → On failure: backoff.rs (exponential delay with jitter, then reconnect)
//! ```
//!
//! # Design Decisions
//! - A timeout cancels the work instead of abandoning it
//! - Redirects and retries draw from the same attempt budget
//! - Reconnect delays are jittered so sessions do not reconnect in lockstep

pub mod backoff;
pub mod retries;
pub mod timeouts;
