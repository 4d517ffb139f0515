use thiserror::Error;

/// Errors produced by type operations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TypeError {
    #[error("storage key must have at least one segment")]
    EmptyKey,

    #[error("invalid key segment {segment:?}: {reason}")]
    InvalidSegment { segment: String, reason: &'static str },
}
