//! Error types for configuration handling

use thiserror::Error;

/// Errors that can occur while building or validating configuration
#[derive(Debug, Clone, Error)]
pub enum ConfigError {
    /// An environment variable held a value that could not be parsed
    #[error("Invalid value for {var}: {reason}")]
    InvalidValue { var: String, reason: String },

    /// Validation of the assembled configuration failed
    #[error("Invalid configuration: {0}")]
    ValidationFailed(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_error_display() {
        let err = ConfigError::InvalidValue {
            var: "CRYPTID_KEYCLOAK_SIGNATURE_VALIDITY_SECS".to_string(),
            reason: "not a number".to_string(),
        };
        assert!(err.to_string().contains("CRYPTID_KEYCLOAK_SIGNATURE_VALIDITY_SECS"));
    }
}
