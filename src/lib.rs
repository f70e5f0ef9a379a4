//! Client-side HTTP/1.1 and WebSocket engine.

pub mod compression;
pub mod config;
pub mod http;
pub mod lifecycle;
pub mod net;
pub mod observability;
pub mod resilience;
pub mod rpc;
pub mod ws;

pub use config::schema::ClientConfig;
pub use http::{HttpClient, HttpError, Request, Response};
pub use lifecycle::{Scheduler, Shutdown};
pub use ws::{WebSocket, WebSocketError};
