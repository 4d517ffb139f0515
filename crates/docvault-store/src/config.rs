use std::path::Path;
use std::time::Duration;

use docvault_crypto::MIN_KDF_ITERATIONS;
use docvault_lock::LockConfig;
use serde::{Deserialize, Serialize};

/// Environment variable the CLI reads the master key from.
pub const MASTER_KEY_ENV: &str = "DOCVAULT_MASTER_KEY";

/// Errors from loading or validating a [`StoreConfig`].
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("cannot parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Tunables for a [`DocumentStore`](crate::DocumentStore).
///
/// ```toml
/// lock_timeout_ms = 30000
/// long_hold_warning_ms = 10000
/// kdf_iterations = 100000
/// require_encryption = true
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Default time a caller waits for any single lock.
    pub lock_timeout_ms: u64,
    /// Holds at least this long log a warning when released.
    pub long_hold_warning_ms: u64,
    /// PBKDF2 rounds per seal/open.
    pub kdf_iterations: u32,
    /// Refuse to open without a master key.
    pub require_encryption: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            lock_timeout_ms: 30_000,
            long_hold_warning_ms: 10_000,
            kdf_iterations: MIN_KDF_ITERATIONS,
            require_encryption: false,
        }
    }
}

impl StoreConfig {
    /// Parse and validate a TOML document. Missing fields take their defaults.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.lock_timeout_ms == 0 {
            return Err(ConfigError::Invalid("lock_timeout_ms must be positive".into()));
        }
        if self.long_hold_warning_ms == 0 {
            return Err(ConfigError::Invalid(
                "long_hold_warning_ms must be positive".into(),
            ));
        }
        if self.kdf_iterations < MIN_KDF_ITERATIONS {
            return Err(ConfigError::Invalid(format!(
                "kdf_iterations {} is below the minimum of {MIN_KDF_ITERATIONS}",
                self.kdf_iterations
            )));
        }
        Ok(())
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }

    pub fn long_hold_warning(&self) -> Duration {
        Duration::from_millis(self.long_hold_warning_ms)
    }

    /// Lock manager settings derived from this config.
    pub fn lock_config(&self) -> LockConfig {
        LockConfig {
            default_timeout: self.lock_timeout(),
            long_hold_warning: self.long_hold_warning(),
        }
    }
}
