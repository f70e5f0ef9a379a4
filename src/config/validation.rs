//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (attempt budgets, intervals, sizes)
//! - Check that URLs parse
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ClientConfig → Result<(), Vec<ValidationError>>

use std::fmt;

use crate::config::schema::ClientConfig;

/// A single semantic problem found in a configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Dotted path of the offending field, e.g. `http.max_redirects`.
    pub field: &'static str,
    pub message: String,
}

impl ValidationError {
    fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Check a configuration for values the engine cannot run with.
pub fn validate_config(config: &ClientConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.http.max_redirects == 0 {
        errors.push(ValidationError::new(
            "http.max_redirects",
            "must allow at least one attempt",
        ));
    }

    if let Some(proxy) = &config.proxy.url {
        if let Err(e) = url::Url::parse(proxy) {
            errors.push(ValidationError::new("proxy.url", format!("invalid url '{}': {}", proxy, e)));
        }
    }

    if config.websocket.writer_idle_ms == 0 {
        errors.push(ValidationError::new("websocket.writer_idle_ms", "must be at least 1"));
    }

    // A frame must at least carry a control payload.
    if config.websocket.max_message_bytes < 125 {
        errors.push(ValidationError::new(
            "websocket.max_message_bytes",
            "must be at least 125 bytes",
        ));
    }

    if config.reconnect.base_delay_ms > config.reconnect.max_delay_ms {
        errors.push(ValidationError::new(
            "reconnect.base_delay_ms",
            "must not exceed reconnect.max_delay_ms",
        ));
    }

    if config.scheduler.tick_ms == 0 {
        errors.push(ValidationError::new("scheduler.tick_ms", "must be at least 1"));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(validate_config(&ClientConfig::default()).is_ok());
    }

    #[test]
    fn test_collects_all_errors() {
        let mut config = ClientConfig::default();
        config.http.max_redirects = 0;
        config.proxy.url = Some("not a url".into());
        config.scheduler.tick_ms = 0;

        let errors = validate_config(&config).unwrap_err();
        let fields: Vec<_> = errors.iter().map(|e| e.field).collect();
        assert_eq!(fields, vec!["http.max_redirects", "proxy.url", "scheduler.tick_ms"]);
    }

    #[test]
    fn test_backoff_bounds() {
        let mut config = ClientConfig::default();
        config.reconnect.base_delay_ms = 5000;
        config.reconnect.max_delay_ms = 1000;

        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].to_string().contains("reconnect.base_delay_ms"));
    }
}
