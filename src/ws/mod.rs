//! WebSocket client subsystem (RFC 6455).
//!
//! # Data Flow
//! ```text
//! connect
//!     → handshake.rs (key, Upgrade request through HttpClient, accept check)
//!     → upgraded Connection split into read / write halves
//!
//! send_text / send_binary / ping / close
//!     → outgoing queue → writer task → frame.rs (build, mask) → transport
//!
//! transport → reader task → frame.rs (parse, unmask)
//!     → fragment assembly, ping → pong, close → echoed close
//!     → text / binary inboxes → poll_inbox (consumer loop)
//! ```
//!
//! # Design Decisions
//! - Outgoing frames are always final and always masked
//! - At most one Close frame is ever sent per session
//! - Protocol violations break the session instead of being skipped

pub mod error;
pub mod frame;
pub mod handshake;
pub mod session;

pub use error::WebSocketError;
pub use frame::{CloseCode, OpCode};
pub use session::{CloseFrame, InboxEvent, SessionState, WebSocket};
