//! # Error Handling
//!
//! Structured error taxonomy for the report performance layer. The cache and
//! monitor never fail during normal operation; every externally visible error
//! originates from the circuit breaker (rejection, timeout) or from the
//! caller-supplied fetch operation itself.

use std::error::Error as StdError;

/// Errors surfaced by report execution through the performance layer.
///
/// Callers are responsible for mapping these onto user-facing responses;
/// `CircuitOpen` and `Timeout` indicate a transient-unavailable condition,
/// while `Fetch` wraps a genuine failure from the data layer.
#[derive(Debug, thiserror::Error)]
pub enum ReportError {
    /// The circuit breaker is open and not yet eligible for a recovery probe.
    #[error("report backend unavailable: circuit '{name}' is open")]
    CircuitOpen { name: String },

    /// The guarded fetch did not settle within the configured call timeout.
    #[error("report query timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    /// The fetch operation itself failed (connectivity, bad query, permissions).
    #[error("report query failed: {source}")]
    Fetch {
        #[source]
        source: Box<dyn StdError + Send + Sync>,
    },

    /// Invalid configuration or an unknown report name.
    #[error("configuration error: {0}")]
    Configuration(String),
}

impl ReportError {
    /// Whether the caller may reasonably retry after a short delay.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ReportError::CircuitOpen { .. } | ReportError::Timeout { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, ReportError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_classification() {
        assert!(ReportError::CircuitOpen {
            name: "db".to_string()
        }
        .is_retryable());
        assert!(ReportError::Timeout { timeout_ms: 60_000 }.is_retryable());
        assert!(!ReportError::Configuration("bad".to_string()).is_retryable());
    }

    #[test]
    fn fetch_error_preserves_source() {
        let source = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");
        let err = ReportError::Fetch {
            source: Box::new(source),
        };
        assert!(err.to_string().contains("refused"));
        assert!(std::error::Error::source(&err).is_some());
    }
}
