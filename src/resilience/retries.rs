//! Retry accounting for the request pipeline.
//!
//! # Responsibilities
//! - Share one attempt budget between redirects and transport retries
//! - Decide whether a failed attempt is worth repeating
//!
//! # Design Decisions
//! - Only transport failures (terminated stream, I/O) are retried
//! - Retries go to a fresh connection; the failed one is discarded
//! - No backoff between attempts: a dead pooled connection is the common cause

use crate::http::error::HttpError;

/// Bounded counter of pipeline attempts.
#[derive(Debug, Clone)]
pub struct AttemptBudget {
    max: u32,
    used: u32,
}

impl AttemptBudget {
    /// A budget of `max` attempts. Zero is treated as one.
    pub fn new(max: u32) -> Self {
        Self { max: max.max(1), used: 0 }
    }

    /// Claim the next attempt, returning its 1-based number.
    pub fn next_attempt(&mut self) -> Option<u32> {
        if self.used >= self.max {
            return None;
        }
        self.used += 1;
        Some(self.used)
    }

    pub fn used(&self) -> u32 {
        self.used
    }

    pub fn remaining(&self) -> u32 {
        self.max - self.used
    }
}

/// Whether `err` should trigger another attempt.
pub fn should_retry(err: &HttpError, budget: &AttemptBudget) -> bool {
    err.is_retryable() && budget.remaining() > 0
}
