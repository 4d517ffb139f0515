use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::warn;

use crate::manager::Shared;
use crate::state::LockMode;

/// A held lock. Dropping the guard releases it.
#[must_use = "the lock is released as soon as the guard is dropped"]
pub struct LockGuard {
    shared: Arc<Shared>,
    key: String,
    mode: LockMode,
    acquired_at: Instant,
}

impl LockGuard {
    pub(crate) fn new(shared: Arc<Shared>, key: String, mode: LockMode) -> Self {
        Self {
            shared,
            key,
            mode,
            acquired_at: Instant::now(),
        }
    }

    /// Canonical key this guard holds.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Read or write.
    pub fn mode(&self) -> LockMode {
        self.mode
    }

    /// Time since this guard was granted.
    pub fn held_for(&self) -> Duration {
        self.acquired_at.elapsed()
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        let held = self.held_for();
        if held >= self.shared.config.long_hold_warning {
            warn!(
                key = %self.key,
                mode = %self.mode,
                held_ms = held.as_millis() as u64,
                "lock held longer than expected"
            );
        }
        self.shared.release(&self.key, self.mode);
    }
}

impl std::fmt::Debug for LockGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockGuard")
            .field("key", &self.key)
            .field("mode", &self.mode)
            .field("held_for", &self.held_for())
            .finish()
    }
}
