use std::time::Duration;

use docvault_crypto::{CipherError, IntegrityError};
use docvault_lock::LockError;
use docvault_types::TypeError;

use crate::config::ConfigError;
use crate::medium::MediumError;

/// Errors surfaced by document store and transaction operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// A lock was not granted in time. Safe to retry.
    #[error("timed out after {timeout:?} waiting for lock on {key}")]
    LockTimeout { key: String, timeout: Duration },

    /// `commit()` was called on a transaction that already committed.
    #[error("transaction already committed")]
    TransactionAlreadyCommitted,

    /// The stored checksum does not match the stored payload.
    #[error("integrity check failed for {key}: {reason}")]
    Integrity { key: String, reason: IntegrityError },

    /// Wrong master key, missing master key, or corrupted ciphertext.
    #[error("decryption failed for {key}: {reason}")]
    DecryptionFailed { key: String, reason: CipherError },

    /// The payload could not be sealed.
    #[error("encryption failed for {key}: {reason}")]
    EncryptionFailed { key: String, reason: CipherError },

    /// Failure from the backing medium.
    #[error("medium error: {0}")]
    Medium(#[from] MediumError),

    /// The document could not be serialized, or the decoded payload does
    /// not have the expected shape.
    #[error("serialization error for {key}: {reason}")]
    Serialization { key: String, reason: String },

    /// The key could not be parsed.
    #[error("invalid key: {0}")]
    InvalidKey(#[from] TypeError),

    /// The store configuration was rejected.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The store was opened without a master key while configured to
    /// require one.
    #[error("encryption is required but no master key was supplied")]
    EncryptionRequired,

    /// A failed commit could not restore every key it had touched.
    #[error("rollback incomplete; keys left in an unknown state: {keys:?}")]
    RollbackIncomplete { keys: Vec<String>, cause: Box<StoreError> },

    /// A queued lock request was dropped without being granted.
    #[error("lock request on {key} was abandoned")]
    LockAbandoned { key: String },

    /// A blocking crypto task ended without a result.
    #[error("background task failed: {0}")]
    Background(String),
}

impl StoreError {
    /// Whether retrying the same operation later may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::LockTimeout { .. })
    }
}

impl From<LockError> for StoreError {
    fn from(err: LockError) -> Self {
        match err {
            LockError::Timeout { key, timeout } => Self::LockTimeout { key, timeout },
            LockError::Abandoned { key } => Self::LockAbandoned { key },
        }
    }
}

/// Result alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;
