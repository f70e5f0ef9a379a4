//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → ClientConfig (validated, immutable)
//!     → handed to HttpClient / WebSocket / Scheduler at construction
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; a new client picks up a new config
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_config, ConfigError};
pub use schema::ClientConfig;
pub use schema::HttpConfig;
pub use schema::ObservabilityConfig;
pub use schema::ProxyConfig;
pub use schema::ReconnectConfig;
pub use schema::SchedulerConfig;
pub use schema::TlsConfig;
pub use schema::WebSocketConfig;
