use async_trait::async_trait;

/// Errors raised by a backing medium.
#[derive(Debug, thiserror::Error)]
pub enum MediumError {
    /// I/O error from the underlying storage.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The canonical key cannot be mapped onto this medium.
    #[error("invalid medium key {key:?}: {reason}")]
    InvalidKey { key: String, reason: &'static str },

    /// The medium refused the operation.
    #[error("medium unavailable: {0}")]
    Unavailable(String),
}

/// Result alias for medium operations.
pub type MediumResult<T> = Result<T, MediumError>;

/// Durable byte storage addressed by canonical key.
///
/// All implementations must satisfy these invariants:
/// - `write` is durable before it returns.
/// - A reader never observes a value that is neither the old nor the new
///   complete value.
/// - The medium never interprets the bytes it stores.
/// - All I/O errors are propagated, never silently ignored.
///
/// The medium does no locking of its own; the document store serializes
/// conflicting access per key.
#[async_trait]
pub trait Medium: Send + Sync {
    /// Read the bytes stored at `key`. Returns `Ok(None)` if absent.
    async fn read(&self, key: &str) -> MediumResult<Option<Vec<u8>>>;

    /// Replace whatever is stored at `key` with `bytes`.
    async fn write(&self, key: &str, bytes: &[u8]) -> MediumResult<()>;

    /// Delete `key`. Returns `true` if something was stored there.
    async fn delete(&self, key: &str) -> MediumResult<bool>;
}
