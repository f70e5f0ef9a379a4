//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Scheduler (scheduler.rs), once per tick:
//!     pending requests done? → completion callbacks
//!     socket inboxes         → SocketListener (text / binary / disconnect)
//!     broken + reconnecting  → connect_with_retry task → swap session → on_reconnect
//!
//! Shutdown (shutdown.rs):
//!     signal (signals.rs) or caller → trigger → scheduler loop exits → quit hooks
//! ```
//!
//! # Design Decisions
//! - The embedding program drives `tick()`, or hands the loop to `run()`
//! - Callbacks run on the scheduler's lane, never on I/O tasks
//! - Quit hooks run once; a failing hook does not stop the others

pub mod scheduler;
pub mod shutdown;
pub mod signals;

pub use scheduler::{Scheduler, SocketCallbacks, SocketListener, TickStats};
pub use shutdown::Shutdown;
