use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use tracing::{debug, trace};

use crate::error::{LockError, LockResult};
use crate::guard::LockGuard;
use crate::state::{KeyState, LockMode, Waiter};

/// Timeout applied when a caller does not pick one.
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(30);

/// Configuration for a [`LockManager`].
#[derive(Clone, Debug)]
pub struct LockConfig {
    /// Timeout used by the `*_default` acquire methods.
    pub default_timeout: Duration,
    /// Holds at least this long log a warning on release.
    pub long_hold_warning: Duration,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            default_timeout: DEFAULT_LOCK_TIMEOUT,
            long_hold_warning: Duration::from_secs(10),
        }
    }
}

/// Point-in-time view of one key in the lock table.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockInfo {
    pub key: String,
    /// Readers currently holding the key.
    pub readers: usize,
    /// Whether a writer currently holds the key.
    pub writer: bool,
    pub queued_readers: usize,
    pub queued_writers: usize,
    /// How long the key has been continuously held, if it is held.
    pub held_for: Option<Duration>,
}

impl LockInfo {
    fn from_state(key: &str, state: &KeyState) -> Self {
        Self {
            key: key.to_string(),
            readers: state.readers,
            writer: state.writer,
            queued_readers: state.queued(LockMode::Read),
            queued_writers: state.queued(LockMode::Write),
            held_for: state.held_since.map(|t| t.elapsed()),
        }
    }
}

/// State shared between the manager, its clones, and outstanding guards.
pub(crate) struct Shared {
    table: Mutex<HashMap<String, KeyState>>,
    next_waiter: AtomicU64,
    pub(crate) config: LockConfig,
}

impl Shared {
    fn table(&self) -> MutexGuard<'_, HashMap<String, KeyState>> {
        // Critical sections never panic midway, so a poisoned table is still consistent.
        self.table.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn release(&self, key: &str, mode: LockMode) {
        let mut table = self.table();
        let Some(state) = table.get_mut(key) else {
            return;
        };
        state.release(mode);
        state.dispatch();
        if state.is_idle() {
            table.remove(key);
        }
        trace!(key, %mode, "lock released");
    }

    /// Take a queued request back out. Returns `false` if it was already granted.
    fn withdraw(&self, key: &str, id: u64) -> bool {
        let mut table = self.table();
        let Some(state) = table.get_mut(key) else {
            return false;
        };
        let withdrawn = state.withdraw(id);
        if state.is_idle() {
            table.remove(key);
        }
        withdrawn
    }
}

/// Per-key reader/writer lock table.
///
/// Cloning is cheap and yields a handle to the same table. Independent
/// managers never share state, so several stores can coexist in one process.
#[derive(Clone)]
pub struct LockManager {
    shared: Arc<Shared>,
}

impl LockManager {
    pub fn new(config: LockConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                table: Mutex::new(HashMap::new()),
                next_waiter: AtomicU64::new(0),
                config,
            }),
        }
    }

    pub fn config(&self) -> &LockConfig {
        &self.shared.config
    }

    /// Acquire a shared hold on `key`, waiting at most `timeout`.
    pub async fn acquire_read(&self, key: &str, timeout: Duration) -> LockResult<LockGuard> {
        self.acquire(key, LockMode::Read, timeout).await
    }

    /// Acquire an exclusive hold on `key`, waiting at most `timeout`.
    pub async fn acquire_write(&self, key: &str, timeout: Duration) -> LockResult<LockGuard> {
        self.acquire(key, LockMode::Write, timeout).await
    }

    /// [`acquire_read`](Self::acquire_read) with the configured default timeout.
    pub async fn acquire_read_default(&self, key: &str) -> LockResult<LockGuard> {
        self.acquire(key, LockMode::Read, self.shared.config.default_timeout)
            .await
    }

    /// [`acquire_write`](Self::acquire_write) with the configured default timeout.
    pub async fn acquire_write_default(&self, key: &str) -> LockResult<LockGuard> {
        self.acquire(key, LockMode::Write, self.shared.config.default_timeout)
            .await
    }

    /// Acquire `key` in `mode`.
    ///
    /// Granted immediately when nothing conflicts and nobody is queued;
    /// otherwise the request joins the key's FIFO queue until granted or
    /// until `timeout` elapses.
    pub async fn acquire(&self, key: &str, mode: LockMode, timeout: Duration) -> LockResult<LockGuard> {
        let mut pending = {
            let mut table = self.shared.table();
            let state = table.entry(key.to_string()).or_default();
            if state.can_grant_now(mode) {
                state.grant(mode);
                trace!(key, %mode, "lock granted immediately");
                return Ok(self.guard(key, mode));
            }
            let (grant, rx) = oneshot::channel();
            let id = self.shared.next_waiter.fetch_add(1, Ordering::Relaxed);
            state.queue.push_back(Waiter { id, mode, grant });
            Pending {
                shared: Arc::clone(&self.shared),
                key: key.to_string(),
                id,
                mode,
                rx,
                armed: true,
            }
        };

        match tokio::time::timeout(timeout, &mut pending.rx).await {
            Ok(Ok(())) => {
                pending.armed = false;
                trace!(key, %mode, "lock granted after wait");
                Ok(self.guard(key, mode))
            }
            Ok(Err(_)) => {
                pending.armed = false;
                Err(LockError::Abandoned {
                    key: key.to_string(),
                })
            }
            Err(_) => {
                pending.armed = false;
                if self.shared.withdraw(key, pending.id) {
                    debug!(key, %mode, timeout_ms = timeout.as_millis() as u64, "lock wait timed out");
                    Err(LockError::Timeout {
                        key: key.to_string(),
                        timeout,
                    })
                } else {
                    // Granted between the deadline and the withdrawal.
                    Ok(self.guard(key, mode))
                }
            }
        }
    }

    /// Diagnostics for `key`, or `None` if nothing holds or awaits it.
    pub fn info(&self, key: &str) -> Option<LockInfo> {
        let table = self.shared.table();
        table.get(key).map(|state| LockInfo::from_state(key, state))
    }

    /// Diagnostics for every tracked key, sorted by key.
    pub fn snapshot(&self) -> Vec<LockInfo> {
        let table = self.shared.table();
        let mut infos: Vec<LockInfo> = table
            .iter()
            .map(|(key, state)| LockInfo::from_state(key, state))
            .collect();
        infos.sort_by(|a, b| a.key.cmp(&b.key));
        infos
    }

    /// Number of keys currently held or awaited.
    pub fn tracked_keys(&self) -> usize {
        self.shared.table().len()
    }

    fn guard(&self, key: &str, mode: LockMode) -> LockGuard {
        LockGuard::new(Arc::clone(&self.shared), key.to_string(), mode)
    }
}

impl Default for LockManager {
    fn default() -> Self {
        Self::new(LockConfig::default())
    }
}

impl std::fmt::Debug for LockManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockManager")
            .field("tracked_keys", &self.tracked_keys())
            .finish()
    }
}

/// A queued request. If the acquiring future is dropped while this is
/// armed, the request is withdrawn, and a grant that already landed is
/// handed straight back.
struct Pending {
    shared: Arc<Shared>,
    key: String,
    id: u64,
    mode: LockMode,
    rx: oneshot::Receiver<()>,
    armed: bool,
}

impl Drop for Pending {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        if !self.shared.withdraw(&self.key, self.id) {
            // `rx` is still alive, so the grant was delivered: undo it.
            trace!(key = %self.key, mode = %self.mode, "releasing grant to cancelled waiter");
            self.shared.release(&self.key, self.mode);
        }
    }
}
