//! Metrics collection.
//!
//! # Metrics
//! - `wirelink_requests_total` (counter): completed requests by method, status
//! - `wirelink_request_duration_seconds` (histogram): end-to-end request latency
//! - `wirelink_retries_total` (counter): attempts repeated after a transport failure
//! - `wirelink_pool_checkouts_total` (counter): pool checkouts by outcome (hit, miss)
//! - `wirelink_ws_frames_total` (counter): WebSocket frames by direction, opcode
//!
//! # Design Decisions
//! - Recorded through the `metrics` facade; no exporter is bundled
//! - Without an installed recorder every call is a no-op

use std::time::Instant;

use metrics::{counter, histogram};

/// Record a completed request.
pub fn record_request(method: &str, status: u16, start: Instant) {
    counter!(
        "wirelink_requests_total",
        "method" => method.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
    histogram!("wirelink_request_duration_seconds").record(start.elapsed().as_secs_f64());
}

/// Record a request failing without a response.
pub fn record_request_error(method: &str, start: Instant) {
    counter!(
        "wirelink_requests_total",
        "method" => method.to_string(),
        "status" => "error"
    )
    .increment(1);
    histogram!("wirelink_request_duration_seconds").record(start.elapsed().as_secs_f64());
}

pub fn record_retry() {
    counter!("wirelink_retries_total").increment(1);
}

pub fn record_pool_checkout(hit: bool) {
    let outcome = if hit { "hit" } else { "miss" };
    counter!("wirelink_pool_checkouts_total", "outcome" => outcome).increment(1);
}

/// Record a WebSocket frame. `direction` is `"in"` or `"out"`.
pub fn record_ws_frame(direction: &'static str, opcode: &'static str) {
    counter!("wirelink_ws_frames_total", "direction" => direction, "opcode" => opcode).increment(1);
}
