use std::collections::VecDeque;
use std::fmt;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;

/// Kind of hold requested on a key.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LockMode {
    /// Shared; any number of readers may hold the key together.
    Read,
    /// Exclusive; excludes every reader and every other writer.
    Write,
}

impl fmt::Display for LockMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Read => write!(f, "read"),
            Self::Write => write!(f, "write"),
        }
    }
}

/// A queued request, woken by sending on `grant`.
pub(crate) struct Waiter {
    pub id: u64,
    pub mode: LockMode,
    pub grant: oneshot::Sender<()>,
}

/// Lock table entry for one canonical key.
#[derive(Default)]
pub(crate) struct KeyState {
    pub readers: usize,
    pub writer: bool,
    /// When the key went from free to held.
    pub held_since: Option<Instant>,
    pub queue: VecDeque<Waiter>,
}

impl KeyState {
    fn compatible(&self, mode: LockMode) -> bool {
        match mode {
            LockMode::Read => !self.writer,
            LockMode::Write => !self.writer && self.readers == 0,
        }
    }

    /// A new request may skip the queue only if nobody is waiting.
    pub fn can_grant_now(&self, mode: LockMode) -> bool {
        self.queue.is_empty() && self.compatible(mode)
    }

    pub fn grant(&mut self, mode: LockMode) {
        match mode {
            LockMode::Read => self.readers += 1,
            LockMode::Write => self.writer = true,
        }
        if self.held_since.is_none() {
            self.held_since = Some(Instant::now());
        }
    }

    pub fn release(&mut self, mode: LockMode) {
        match mode {
            LockMode::Read => self.readers = self.readers.saturating_sub(1),
            LockMode::Write => self.writer = false,
        }
        if self.readers == 0 && !self.writer {
            self.held_since = None;
        }
    }

    /// Grant queued requests from the front for as long as they fit.
    ///
    /// A waiter whose receiver is gone is skipped without being counted.
    pub fn dispatch(&mut self) {
        while self
            .queue
            .front()
            .is_some_and(|front| self.compatible(front.mode))
        {
            let Some(waiter) = self.queue.pop_front() else {
                break;
            };
            if waiter.grant.send(()).is_ok() {
                self.grant(waiter.mode);
            }
        }
    }

    /// Remove a queued request. Returns `false` if it is no longer queued.
    pub fn withdraw(&mut self, id: u64) -> bool {
        match self.queue.iter().position(|w| w.id == id) {
            Some(at) => {
                self.queue.remove(at);
                // The withdrawn request may have been what blocked the rest.
                self.dispatch();
                true
            }
            None => false,
        }
    }

    pub fn is_idle(&self) -> bool {
        self.readers == 0 && !self.writer && self.queue.is_empty()
    }

    pub fn queued(&self, mode: LockMode) -> usize {
        self.queue.iter().filter(|w| w.mode == mode).count()
    }
}
