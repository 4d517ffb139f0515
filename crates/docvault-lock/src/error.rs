use std::time::Duration;

/// Errors from lock acquisition.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum LockError {
    /// The lock was not granted within the timeout.
    #[error("timed out after {timeout:?} waiting for lock on {key}")]
    Timeout { key: String, timeout: Duration },

    /// The pending request was dropped from the queue without a grant.
    #[error("lock request on {key} was abandoned")]
    Abandoned { key: String },
}

/// Result alias for lock operations.
pub type LockResult<T> = Result<T, LockError>;
