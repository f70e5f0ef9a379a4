//! Opening handshake: key generation and response verification.

use base64::prelude::*;
use sha1::{Digest, Sha1};

use crate::http::response::Response;
use crate::ws::error::WebSocketError;

/// GUID appended to the key before hashing (RFC 6455 section 1.3).
pub const WEBSOCKET_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// A fresh `Sec-WebSocket-Key`: 16 random bytes, base64-encoded.
pub fn generate_key() -> String {
    BASE64_STANDARD.encode(rand::random::<[u8; 16]>())
}

/// The `Sec-WebSocket-Accept` value a server must return for `key`.
pub fn accept_key(key: &str) -> String {
    let mut sha1 = Sha1::new();
    sha1.update(key.as_bytes());
    sha1.update(WEBSOCKET_GUID.as_bytes());
    BASE64_STANDARD.encode(sha1.finalize())
}

/// Check an upgrade response against the key that was sent.
pub fn verify_response(response: &Response, key: &str) -> Result<(), WebSocketError> {
    if response.status != 101 {
        return Err(WebSocketError::HandshakeRejected(format!(
            "expected status 101, got {} {}",
            response.status, response.message
        )));
    }
    if !response.headers.get("Upgrade").trim().eq_ignore_ascii_case("websocket") {
        return Err(WebSocketError::HandshakeRejected(format!(
            "unexpected Upgrade header {:?}",
            response.headers.get("Upgrade")
        )));
    }
    if !response.headers.has_token("Connection", "upgrade") {
        return Err(WebSocketError::HandshakeRejected(format!(
            "unexpected Connection header {:?}",
            response.headers.get("Connection")
        )));
    }

    let expected = accept_key(key);
    let actual = response.headers.get("Sec-WebSocket-Accept").trim();
    if actual != expected {
        return Err(WebSocketError::AcceptMismatch {
            expected,
            actual: actual.to_string(),
        });
    }
    Ok(())
}
