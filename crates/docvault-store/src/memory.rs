use std::collections::HashMap;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;

use crate::medium::{Medium, MediumResult};

/// In-memory, HashMap-based medium.
///
/// Intended for tests and embedding. Values are held behind a `RwLock` and
/// copied on read/write; every write replaces the whole value at once.
pub struct InMemoryMedium {
    records: RwLock<HashMap<String, Vec<u8>>>,
}

impl InMemoryMedium {
    /// Create a new empty medium.
    pub fn new() -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
        }
    }

    fn records(&self) -> RwLockReadGuard<'_, HashMap<String, Vec<u8>>> {
        self.records.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn records_mut(&self) -> RwLockWriteGuard<'_, HashMap<String, Vec<u8>>> {
        self.records.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Number of keys currently stored.
    pub fn len(&self) -> usize {
        self.records().len()
    }

    /// Returns `true` if nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.records().is_empty()
    }

    /// Total bytes across all stored values.
    pub fn total_bytes(&self) -> u64 {
        self.records().values().map(|v| v.len() as u64).sum()
    }

    /// Remove everything.
    pub fn clear(&self) {
        self.records_mut().clear();
    }

    /// Sorted list of every stored key.
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.records().keys().cloned().collect();
        keys.sort();
        keys
    }
}

impl Default for InMemoryMedium {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Medium for InMemoryMedium {
    async fn read(&self, key: &str) -> MediumResult<Option<Vec<u8>>> {
        Ok(self.records().get(key).cloned())
    }

    async fn write(&self, key: &str, bytes: &[u8]) -> MediumResult<()> {
        self.records_mut().insert(key.to_string(), bytes.to_vec());
        Ok(())
    }

    async fn delete(&self, key: &str) -> MediumResult<bool> {
        Ok(self.records_mut().remove(key).is_some())
    }
}

impl std::fmt::Debug for InMemoryMedium {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryMedium")
            .field("record_count", &self.len())
            .finish()
    }
}
