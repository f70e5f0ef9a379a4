//! Named-message RPC over WebSocket sessions.
//!
//! # Data Flow
//! ```text
//! RpcChannel::send / request
//!     → message.rs (JSON envelope) → WebSocket::send_text
//!
//! socket inbox → Scheduler → RpcListener::on_text
//!     → "return"    → matching PendingCall resolved
//!     → "welcome"   → session uid stored
//!     → "exception" → logged
//!     → otherwise   → registry.rs handlers → "return" sent for functions
//! ```
//!
//! # Design Decisions
//! - Handlers are registered explicitly by name
//! - Outstanding calls fail with `Dropped` when the session ends

pub mod channel;
pub mod error;
pub mod message;
pub mod registry;

pub use channel::{PendingCall, RpcChannel, RpcListener};
pub use error::RpcError;
pub use message::{Message, MessageKind};
pub use registry::{Dispatch, Registry};
