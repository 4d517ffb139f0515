//! Multi-key atomic commits.
//!
//! Writes and removes are staged in memory. `commit` seals every staged
//! payload, takes a write lock on each touched key in canonical key order,
//! then applies the operations while snapshotting each key's prior record.
//! If any operation fails, the snapshots are written back in reverse order
//! before the locks are released, so durable state for every touched key is
//! exactly what it was before the commit.
//!
//! The apply and restore phases run on a spawned task that owns the locks.
//! Dropping a `commit` future once that task has started does not stop it:
//! the batch still lands completely or is restored completely before any
//! lock is released.

use std::collections::HashMap;

use docvault_types::StorageKey;
use serde::Serialize;
use tracing::{debug, error, warn};

use crate::error::{StoreError, StoreResult};
use crate::medium::MediumError;
use crate::store::{serialize, DocumentStore};

#[derive(Clone, Debug)]
enum StagedOp {
    /// Serialized JSON document.
    Put(String),
    Remove,
}

/// A sealed operation ready to apply. `None` removes the key.
struct Prepared {
    key: String,
    record: Option<String>,
}

/// A key the commit has touched and the record it held before.
struct Applied {
    key: String,
    prior: Option<Vec<u8>>,
}

/// A batch of staged writes and removes, applied all-or-nothing.
///
/// Staging the same key again replaces the earlier operation, so the batch
/// holds at most one operation per key.
pub struct Transaction {
    store: DocumentStore,
    ops: Vec<(StorageKey, StagedOp)>,
    positions: HashMap<StorageKey, usize>,
    committed: bool,
}

impl Transaction {
    pub(crate) fn new(store: DocumentStore) -> Self {
        Self {
            store,
            ops: Vec::new(),
            positions: HashMap::new(),
            committed: false,
        }
    }

    /// Stage a write of `document` at `key`.
    ///
    /// The document is serialized immediately, so a shape error surfaces
    /// here rather than at commit.
    pub fn put<T: Serialize + ?Sized>(&mut self, key: StorageKey, document: &T) -> StoreResult<()> {
        let payload = serialize(key.canonical(), document)?;
        self.stage(key, StagedOp::Put(payload));
        Ok(())
    }

    /// Stage a removal of `key`.
    pub fn remove(&mut self, key: StorageKey) {
        self.stage(key, StagedOp::Remove);
    }

    /// Number of distinct keys staged.
    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Staged keys in staging order.
    pub fn keys(&self) -> impl Iterator<Item = &StorageKey> {
        self.ops.iter().map(|(key, _)| key)
    }

    pub fn is_committed(&self) -> bool {
        self.committed
    }

    /// Discard every staged operation.
    pub fn rollback(self) {
        debug!(ops = self.ops.len(), "transaction rolled back");
    }

    /// Apply every staged operation atomically.
    ///
    /// On failure nothing is persisted and the transaction may be committed
    /// again. After a successful commit, further calls fail with
    /// [`StoreError::TransactionAlreadyCommitted`].
    ///
    /// If this future is dropped after every lock is held, the batch still
    /// finishes in the background, but the transaction is not marked
    /// committed.
    pub async fn commit(&mut self) -> StoreResult<()> {
        if self.committed {
            return Err(StoreError::TransactionAlreadyCommitted);
        }
        if self.ops.is_empty() {
            self.committed = true;
            return Ok(());
        }

        // Seal phase: encrypt and wrap before any lock is held.
        let mut prepared = Vec::with_capacity(self.ops.len());
        for (key, op) in &self.ops {
            let record = match op {
                StagedOp::Put(payload) => Some(
                    self.store
                        .seal_payload(key.canonical(), payload.clone())
                        .await?,
                ),
                StagedOp::Remove => None,
            };
            prepared.push(Prepared {
                key: key.canonical().to_string(),
                record,
            });
        }

        // Lock phase: canonical order. An early return drops the guards
        // taken so far.
        let mut order: Vec<&StorageKey> = self.ops.iter().map(|(key, _)| key).collect();
        order.sort();
        let mut guards = Vec::with_capacity(order.len());
        for key in order {
            guards.push(self.store.locks().acquire_write_default(key.canonical()).await?);
        }

        // Apply phase: detached from the caller, guards released only
        // after every key is either written or restored.
        let store = self.store.clone();
        let ops = prepared.len();
        let batch = tokio::spawn(async move {
            let outcome = apply_batch(&store, &prepared).await;
            drop(guards);
            outcome
        });
        batch
            .await
            .map_err(|e| StoreError::Background(e.to_string()))??;

        self.committed = true;
        debug!(ops, "transaction committed");
        Ok(())
    }

    fn stage(&mut self, key: StorageKey, op: StagedOp) {
        match self.positions.get(&key) {
            Some(&at) => self.ops[at].1 = op,
            None => {
                self.positions.insert(key.clone(), self.ops.len());
                self.ops.push((key, op));
            }
        }
    }
}

/// Apply `prepared` in order, restoring every touched key if any step fails.
async fn apply_batch(store: &DocumentStore, prepared: &[Prepared]) -> StoreResult<()> {
    let mut applied = Vec::with_capacity(prepared.len());
    let Err(cause) = apply(store, prepared, &mut applied).await else {
        return Ok(());
    };
    warn!(error = %cause, touched = applied.len(), "commit failed; restoring prior records");
    let unrestored = compensate(store, &applied).await;
    let cause = StoreError::from(cause);
    if unrestored.is_empty() {
        return Err(cause);
    }
    Err(StoreError::RollbackIncomplete {
        keys: unrestored,
        cause: Box::new(cause),
    })
}

async fn apply(
    store: &DocumentStore,
    prepared: &[Prepared],
    applied: &mut Vec<Applied>,
) -> Result<(), MediumError> {
    for op in prepared {
        let prior = store.raw_read(&op.key).await?;
        applied.push(Applied {
            key: op.key.clone(),
            prior,
        });
        match &op.record {
            Some(record) => store.raw_write(&op.key, record.as_bytes()).await?,
            None => {
                store.raw_delete(&op.key).await?;
            }
        }
    }
    Ok(())
}

/// Restore prior records newest first. Returns the keys that could not be
/// restored.
async fn compensate(store: &DocumentStore, applied: &[Applied]) -> Vec<String> {
    let mut unrestored = Vec::new();
    for entry in applied.iter().rev() {
        let canonical = entry.key.as_str();
        let result = match &entry.prior {
            Some(prior) => store.raw_write(canonical, prior).await,
            None => store.raw_delete(canonical).await.map(|_| ()),
        };
        match result {
            Ok(()) => debug!(key = canonical, "prior record restored"),
            Err(e) => {
                error!(key = canonical, error = %e, "failed to restore prior record");
                unrestored.push(canonical.to_string());
            }
        }
    }
    unrestored
}

impl std::fmt::Debug for Transaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transaction")
            .field("keys", &self.keys().collect::<Vec<_>>())
            .field("committed", &self.committed)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;

    use crate::config::StoreConfig;
    use crate::medium::{Medium, MediumResult};
    use crate::memory::InMemoryMedium;

    /// Medium that fails chosen writes: the write numbered `fail_at`, and
    /// every write numbered `fail_from` or later. Numbering starts at 1.
    struct FlakyMedium {
        inner: InMemoryMedium,
        writes: AtomicUsize,
        fail_at: AtomicUsize,
        fail_from: AtomicUsize,
    }

    impl FlakyMedium {
        fn new() -> Self {
            Self {
                inner: InMemoryMedium::new(),
                writes: AtomicUsize::new(0),
                fail_at: AtomicUsize::new(usize::MAX),
                fail_from: AtomicUsize::new(usize::MAX),
            }
        }

        /// Fail the `n`th write from now, once.
        fn fail_nth_write(&self, n: usize) {
            self.fail_at
                .store(self.writes.load(Ordering::SeqCst) + n, Ordering::SeqCst);
        }

        /// Fail the `n`th write from now and everything after it.
        fn break_from_nth_write(&self, n: usize) {
            self.fail_from
                .store(self.writes.load(Ordering::SeqCst) + n, Ordering::SeqCst);
        }

        fn heal(&self) {
            self.fail_at.store(usize::MAX, Ordering::SeqCst);
            self.fail_from.store(usize::MAX, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl Medium for FlakyMedium {
        async fn read(&self, key: &str) -> MediumResult<Option<Vec<u8>>> {
            self.inner.read(key).await
        }

        async fn write(&self, key: &str, bytes: &[u8]) -> MediumResult<()> {
            let n = self.writes.fetch_add(1, Ordering::SeqCst) + 1;
            if n == self.fail_at.load(Ordering::SeqCst) || n >= self.fail_from.load(Ordering::SeqCst) {
                return Err(MediumError::Unavailable(format!("injected failure on write {n}")));
            }
            self.inner.write(key, bytes).await
        }

        async fn delete(&self, key: &str) -> MediumResult<bool> {
            self.inner.delete(key).await
        }
    }

    /// Medium whose writes to one key stall for a fixed delay.
    struct SlowMedium {
        inner: InMemoryMedium,
        slow_key: &'static str,
        delay: Duration,
    }

    #[async_trait]
    impl Medium for SlowMedium {
        async fn read(&self, key: &str) -> MediumResult<Option<Vec<u8>>> {
            self.inner.read(key).await
        }

        async fn write(&self, key: &str, bytes: &[u8]) -> MediumResult<()> {
            if key == self.slow_key {
                tokio::time::sleep(self.delay).await;
            }
            self.inner.write(key, bytes).await
        }

        async fn delete(&self, key: &str) -> MediumResult<bool> {
            self.inner.delete(key).await
        }
    }

    fn key(canonical: &str) -> StorageKey {
        StorageKey::parse(canonical).unwrap()
    }

    fn store_over(medium: Arc<dyn Medium>, lock_timeout_ms: u64) -> DocumentStore {
        let config = StoreConfig {
            lock_timeout_ms,
            ..StoreConfig::default()
        };
        DocumentStore::open(medium, None, config).unwrap()
    }

    fn store() -> DocumentStore {
        store_over(Arc::new(InMemoryMedium::new()), 30_000)
    }

    async fn value(store: &DocumentStore, canonical: &str) -> Option<u32> {
        store.get(&key(canonical)).await.unwrap()
    }

    // -----------------------------------------------------------------------
    // Staging
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn last_staged_op_per_key_wins() {
        let store = store();
        store.put(&key("b"), &0u32).await.unwrap();

        let mut tx = store.transaction();
        tx.put(key("a"), &1u32).unwrap();
        tx.remove(key("a"));
        tx.remove(key("b"));
        tx.put(key("b"), &2u32).unwrap();
        assert_eq!(tx.len(), 2);

        tx.commit().await.unwrap();
        assert_eq!(value(&store, "a").await, None);
        assert_eq!(value(&store, "b").await, Some(2));
    }

    #[tokio::test]
    async fn keys_follow_staging_order() {
        let store = store();
        let mut tx = store.transaction();
        tx.put(key("z"), &1u32).unwrap();
        tx.put(key("a"), &1u32).unwrap();
        tx.put(key("z"), &2u32).unwrap();
        let keys: Vec<&str> = tx.keys().map(StorageKey::canonical).collect();
        assert_eq!(keys, vec!["z", "a"]);
    }

    #[tokio::test]
    async fn nothing_is_visible_before_commit() {
        let store = store();
        let mut tx = store.transaction();
        tx.put(key("a"), &1u32).unwrap();
        assert_eq!(value(&store, "a").await, None);
        tx.rollback();
        assert_eq!(value(&store, "a").await, None);
    }

    // -----------------------------------------------------------------------
    // Commit lifecycle
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn second_commit_is_rejected() {
        let store = store();
        let mut tx = store.transaction();
        tx.put(key("a"), &1u32).unwrap();
        tx.commit().await.unwrap();
        assert!(tx.is_committed());
        assert!(matches!(
            tx.commit().await,
            Err(StoreError::TransactionAlreadyCommitted)
        ));
    }

    #[tokio::test]
    async fn empty_commit_takes_no_locks() {
        let store = store();
        let held = store
            .locks()
            .acquire_write("a", Duration::from_secs(1))
            .await
            .unwrap();
        let mut tx = store.transaction();
        assert!(tx.is_empty());
        tx.commit().await.unwrap();
        drop(held);
        assert!(matches!(
            tx.commit().await,
            Err(StoreError::TransactionAlreadyCommitted)
        ));
    }

    #[tokio::test]
    async fn commit_writes_every_key() {
        let store = store();
        let mut tx = store.transaction();
        for (i, name) in ["session/s1", "message/s1/m1", "message/s1/m2"].iter().enumerate() {
            tx.put(key(name), &(i as u32)).unwrap();
        }
        tx.commit().await.unwrap();
        assert_eq!(value(&store, "session/s1").await, Some(0));
        assert_eq!(value(&store, "message/s1/m2").await, Some(2));
        assert!(store.lock_snapshot().is_empty());
    }

    // -----------------------------------------------------------------------
    // Atomicity
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn failed_commit_restores_every_key() {
        let medium = Arc::new(FlakyMedium::new());
        let store = store_over(medium.clone(), 30_000);
        for (name, v) in [("a", 1u32), ("b", 2), ("c", 3)] {
            store.put(&key(name), &v).await.unwrap();
        }

        let mut tx = store.transaction();
        tx.remove(key("b"));
        tx.put(key("d"), &40u32).unwrap();
        tx.put(key("a"), &10u32).unwrap();
        tx.put(key("c"), &30u32).unwrap();

        // Writes in staging order: d, a, c.
        medium.fail_nth_write(3);
        let err = tx.commit().await.unwrap_err();
        assert!(matches!(err, StoreError::Medium(MediumError::Unavailable(_))));
        assert!(!tx.is_committed());

        assert_eq!(value(&store, "a").await, Some(1));
        assert_eq!(value(&store, "b").await, Some(2));
        assert_eq!(value(&store, "c").await, Some(3));
        assert_eq!(value(&store, "d").await, None);
        assert!(store.lock_snapshot().is_empty());

        // Durable state was restored, so the same batch may be retried.
        tx.commit().await.unwrap();
        assert_eq!(value(&store, "a").await, Some(10));
        assert_eq!(value(&store, "b").await, None);
        assert_eq!(value(&store, "c").await, Some(30));
        assert_eq!(value(&store, "d").await, Some(40));
    }

    #[tokio::test]
    async fn failed_compensation_is_reported() {
        let medium = Arc::new(FlakyMedium::new());
        let store = store_over(medium.clone(), 30_000);
        store.put(&key("a"), &1u32).await.unwrap();

        let mut tx = store.transaction();
        tx.put(key("a"), &10u32).unwrap();
        tx.put(key("b"), &20u32).unwrap();

        medium.break_from_nth_write(2);
        let err = tx.commit().await.unwrap_err();
        match err {
            StoreError::RollbackIncomplete { keys, cause } => {
                assert_eq!(keys, vec!["a".to_string()]);
                assert!(matches!(*cause, StoreError::Medium(_)));
            }
            other => panic!("expected RollbackIncomplete, got {other:?}"),
        }
        medium.heal();
        assert_eq!(value(&store, "b").await, None);
        assert!(store.lock_snapshot().is_empty());
    }

    #[tokio::test]
    async fn dropped_commit_still_lands_whole() {
        let medium = Arc::new(SlowMedium {
            inner: InMemoryMedium::new(),
            slow_key: "b",
            delay: Duration::from_millis(300),
        });
        let store = store_over(medium, 30_000);
        store.put(&key("a"), &1u32).await.unwrap();

        let mut tx = store.transaction();
        tx.put(key("a"), &10u32).unwrap();
        tx.put(key("b"), &20u32).unwrap();
        let cancelled = tokio::time::timeout(Duration::from_millis(50), tx.commit()).await;
        assert!(cancelled.is_err());

        // The reads queue behind the batch's write locks, then see all of it.
        assert_eq!(value(&store, "a").await, Some(10));
        assert_eq!(value(&store, "b").await, Some(20));
        assert!(!tx.is_committed());
        assert!(store.lock_snapshot().is_empty());
    }

    #[tokio::test]
    async fn dropped_failing_commit_is_still_restored() {
        let medium = Arc::new(FlakyMedium::new());
        let store = store_over(medium.clone(), 30_000);
        store.put(&key("a"), &1u32).await.unwrap();

        let mut tx = store.transaction();
        tx.put(key("a"), &10u32).unwrap();
        tx.put(key("b"), &20u32).unwrap();
        medium.fail_nth_write(2);
        // Dropped on its first suspension after the locks are taken.
        let commit = tx.commit();
        let _ = tokio::time::timeout(Duration::ZERO, commit).await;

        assert_eq!(value(&store, "a").await, Some(1));
        assert_eq!(value(&store, "b").await, None);
    }

    // -----------------------------------------------------------------------
    // Locking
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn lock_timeout_releases_locks_already_taken() {
        let store = store_over(Arc::new(InMemoryMedium::new()), 50);
        let held = store
            .locks()
            .acquire_write("b", Duration::from_secs(5))
            .await
            .unwrap();

        let mut tx = store.transaction();
        tx.put(key("b"), &2u32).unwrap();
        tx.put(key("a"), &1u32).unwrap();
        let err = tx.commit().await.unwrap_err();
        assert!(matches!(err, StoreError::LockTimeout { ref key, .. } if key == "b"));

        assert!(store.locks().info("a").is_none());
        assert_eq!(store.locks().tracked_keys(), 1);
        assert_eq!(value(&store, "a").await, None);

        drop(held);
        tx.commit().await.unwrap();
        assert_eq!(value(&store, "a").await, Some(1));
        assert_eq!(value(&store, "b").await, Some(2));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn opposite_staging_orders_do_not_deadlock() {
        let store = store_over(Arc::new(InMemoryMedium::new()), 5_000);
        let mut tasks = Vec::new();
        for worker in 0..8u32 {
            let store = store.clone();
            tasks.push(tokio::spawn(async move {
                for round in 0..25u32 {
                    let mut names = ["x/1", "x/2", "x/3"];
                    if worker % 2 == 1 {
                        names.reverse();
                    }
                    let mut tx = store.transaction();
                    for name in names {
                        tx.put(key(name), &(worker * 1000 + round)).unwrap();
                    }
                    tx.commit().await.unwrap();
                }
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        // Every commit wrote one value to all three keys under all three
        // locks, so the survivors must agree.
        let first = value(&store, "x/1").await;
        assert!(first.is_some());
        assert_eq!(value(&store, "x/2").await, first);
        assert_eq!(value(&store, "x/3").await, first);
        assert_eq!(store.locks().tracked_keys(), 0);
    }
}
