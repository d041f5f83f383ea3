//! Configuration for the identity core
//!
//! Environment-based configuration with defaults and validation. Only
//! the knobs this core actually consults live here; transport, server
//! and UI configuration belong to the embedding application.

use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;
use std::time::Duration;

mod error;

pub use error::ConfigError;

/// Backup payload schema version written by this build
pub const BACKUP_SCHEMA_VERSION: u32 = 1;

/// Engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Directory where identity and group photos are stored
    pub photo_dir: PathBuf,

    /// How long a keycloak signature (signed details, revocations)
    /// remains valid. Also drives revocation-list pruning.
    pub keycloak_signature_validity: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            photo_dir: PathBuf::from("./photos"),
            // Two months, matching the server-side signature lifetime
            keycloak_signature_validity: Duration::from_secs(60 * 60 * 24 * 60),
        }
    }
}

impl EngineConfig {
    /// Build a configuration from the environment, falling back to
    /// defaults for anything unset.
    ///
    /// Recognized variables:
    /// - `CRYPTID_PHOTO_DIR`
    /// - `CRYPTID_KEYCLOAK_SIGNATURE_VALIDITY_SECS`
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = EngineConfig::default();

        if let Ok(dir) = env::var("CRYPTID_PHOTO_DIR") {
            config.photo_dir = PathBuf::from(dir);
        }

        if let Ok(secs) = env::var("CRYPTID_KEYCLOAK_SIGNATURE_VALIDITY_SECS") {
            let secs: u64 = secs.parse().map_err(|_| ConfigError::InvalidValue {
                var: "CRYPTID_KEYCLOAK_SIGNATURE_VALIDITY_SECS".to_string(),
                reason: format!("not a number: {}", secs),
            })?;
            config.keycloak_signature_validity = Duration::from_secs(secs);
        }

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.photo_dir.as_os_str().is_empty() {
            return Err(ConfigError::ValidationFailed(
                "photo_dir must not be empty".to_string(),
            ));
        }
        if self.keycloak_signature_validity.is_zero() {
            return Err(ConfigError::ValidationFailed(
                "keycloak_signature_validity must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}
