//! Error types for the readerpulse pipeline and scorer
//!
//! This module provides the crate-wide error using thiserror for structured
//! error definitions. Strategy failures convert into [`PulseError`]; delivery
//! failures stay on the collector side as [`DeliveryError`].

use crate::recommend::strategies::StrategyError;
use thiserror::Error;

/// Main error type for readerpulse operations
#[derive(Error, Debug)]
pub enum PulseError {
    /// Malformed event, request or feedback record
    #[error("Validation error: {0}")]
    Validation(String),

    /// Every strategy failed or the backing store is unreachable
    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    /// A single strategy failed
    #[error("Strategy error: {0}")]
    Strategy(#[from] StrategyError),

    /// Feedback refers to a recommendation served to someone else
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// Store operation failed
    #[error("Store error: {0}")]
    Store(String),

    /// Catalog file could not be read
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Catalog file is not valid JSON
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Generic error with context
    #[error("{0}")]
    Other(String),
}

/// Failure of a single batch delivery attempt
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DeliveryError {
    /// Collector answered with a non-2xx status
    #[error("collector responded with status {0}")]
    Status(u16),

    /// Connection, DNS or body error
    #[error("transport failure: {0}")]
    Transport(String),

    /// No response within the request timeout
    #[error("delivery timed out after {0}ms")]
    Timeout(u64),
}

impl DeliveryError {
    /// 4xx responses other than 408/429 will fail the same way on retry
    pub fn is_permanent(&self) -> bool {
        matches!(self, DeliveryError::Status(code) if (400..500).contains(code) && *code != 408 && *code != 429)
    }
}

/// Result type alias for readerpulse operations
pub type Result<T> = std::result::Result<T, PulseError>;

/// Convert anyhow::Error to PulseError
impl From<anyhow::Error> for PulseError {
    fn from(err: anyhow::Error) -> Self {
        PulseError::Other(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = PulseError::ServiceUnavailable("all strategies failed".to_string());
        assert_eq!(err.to_string(), "Service unavailable: all strategies failed");
    }

    #[test]
    fn test_strategy_error_conversion() {
        let err: PulseError = StrategyError::MissingSeed.into();
        assert!(matches!(err, PulseError::Strategy(StrategyError::MissingSeed)));
    }

    #[test]
    fn test_permanent_delivery_errors() {
        assert!(DeliveryError::Status(400).is_permanent());
        assert!(!DeliveryError::Status(429).is_permanent());
        assert!(!DeliveryError::Status(503).is_permanent());
        assert!(!DeliveryError::Timeout(100).is_permanent());
    }
}
