//! Per-key reader/writer locks for docvault.
//!
//! The [`LockManager`] keeps an in-memory table keyed by canonical storage
//! key. Each entry admits many readers or one writer. Requests that cannot be
//! granted immediately wait in a FIFO queue; once a writer is queued, readers
//! arriving after it wait too, so a steady stream of reads cannot starve
//! writes.
//!
//! # Design Rules
//!
//! 1. Every acquisition is bounded by a timeout. There is no unbounded wait.
//! 2. A [`LockGuard`] releases its hold on drop, on every exit path.
//! 3. A waiter that times out or is cancelled leaves the queue; a grant that
//!    races with the timeout is either kept by the caller or released.
//! 4. The table mutex is held only to flip counters and edit queues, never
//!    across an `.await`.
//! 5. Idle entries are pruned, so the table only tracks keys in use.

pub mod error;
pub mod guard;
pub mod manager;
mod state;

pub use error::{LockError, LockResult};
pub use guard::LockGuard;
pub use manager::{LockConfig, LockInfo, LockManager, DEFAULT_LOCK_TIMEOUT};
pub use state::LockMode;
