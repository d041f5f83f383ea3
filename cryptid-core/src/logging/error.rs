//! Error types for the logging subsystem

use thiserror::Error;

/// Errors that can occur in the logging subsystem
#[derive(Debug, Clone, Error)]
pub enum LoggingError {
    /// Failed to initialize the logging system
    #[error("Failed to initialize logging: {0}")]
    InitializationFailed(String),

    /// Invalid configuration provided
    #[error("Invalid logging configuration: {0}")]
    InvalidConfiguration(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_logging_error_display() {
        let err = LoggingError::InitializationFailed("already set".to_string());
        assert_eq!(
            format!("{}", err),
            "Failed to initialize logging: already set"
        );
    }

    #[test]
    fn test_logging_error_is_error_trait() {
        let err = LoggingError::InvalidConfiguration("bad".to_string());
        let _: &dyn std::error::Error = &err;
    }
}
