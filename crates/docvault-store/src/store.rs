use std::sync::Arc;

use docvault_crypto::{EnvelopeMode, MasterKey};
use docvault_lock::{LockInfo, LockManager};
use docvault_types::StorageKey;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, info};

use crate::codec::RecordCodec;
use crate::config::{ConfigError, StoreConfig};
use crate::error::{StoreError, StoreResult};
use crate::medium::{Medium, MediumResult};
use crate::transaction::Transaction;

/// Outcome of [`DocumentStore::reseal`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Reseal {
    /// Nothing is stored at the key.
    Missing,
    /// The record was already in the store's current mode.
    Unchanged(EnvelopeMode),
    /// The record was rewritten.
    Converted { from: EnvelopeMode, to: EnvelopeMode },
}

/// Keyed document store over a [`Medium`].
///
/// Cloning is cheap; clones share the medium, the lock table and the key.
#[derive(Clone)]
pub struct DocumentStore {
    medium: Arc<dyn Medium>,
    locks: LockManager,
    codec: Arc<RecordCodec>,
    config: StoreConfig,
}

impl DocumentStore {
    /// Open a store over `medium`.
    ///
    /// Without a master key, records are written in plaintext mode unless
    /// `config.require_encryption` is set, in which case opening fails.
    pub fn open(
        medium: Arc<dyn Medium>,
        master_key: Option<MasterKey>,
        config: StoreConfig,
    ) -> StoreResult<Self> {
        config.validate()?;
        if master_key.is_none() && config.require_encryption {
            return Err(StoreError::EncryptionRequired);
        }
        let codec = RecordCodec::new(master_key, config.kdf_iterations)
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;
        info!(
            encrypted = codec.is_encrypted(),
            lock_timeout_ms = config.lock_timeout_ms,
            "document store opened"
        );
        Ok(Self {
            medium,
            locks: LockManager::new(config.lock_config()),
            codec: Arc::new(codec),
            config,
        })
    }

    /// Read and decode the document at `key`. Returns `Ok(None)` if absent.
    pub async fn get<T: DeserializeOwned>(&self, key: &StorageKey) -> StoreResult<Option<T>> {
        let Some(raw) = self.read_locked(key).await? else {
            return Ok(None);
        };
        let (payload, _) = self.open_record(key.canonical(), raw).await?;
        deserialize(key.canonical(), &payload).map(Some)
    }

    /// Store `document` at `key`, replacing any previous value.
    pub async fn put<T: Serialize + ?Sized>(&self, key: &StorageKey, document: &T) -> StoreResult<()> {
        let payload = serialize(key.canonical(), document)?;
        let record = self.seal_payload(key.canonical(), payload).await?;
        let _guard = self.locks.acquire_write_default(key.canonical()).await?;
        self.medium.write(key.canonical(), record.as_bytes()).await?;
        debug!(key = %key, bytes = record.len(), "document written");
        Ok(())
    }

    /// Delete the document at `key`. Returns `true` if one was stored.
    pub async fn remove(&self, key: &StorageKey) -> StoreResult<bool> {
        let _guard = self.locks.acquire_write_default(key.canonical()).await?;
        let removed = self.medium.delete(key.canonical()).await?;
        debug!(key = %key, removed, "document removed");
        Ok(removed)
    }

    /// Whether anything is stored at `key`. The record is not verified.
    pub async fn exists(&self, key: &StorageKey) -> StoreResult<bool> {
        Ok(self.read_locked(key).await?.is_some())
    }

    /// Verify the checksum at `key` and report its envelope mode without
    /// decrypting.
    pub async fn envelope_mode(&self, key: &StorageKey) -> StoreResult<Option<EnvelopeMode>> {
        let Some(raw) = self.read_locked(key).await? else {
            return Ok(None);
        };
        self.codec.inspect(key.canonical(), &raw).map(Some)
    }

    /// Rewrite the record at `key` in the store's current mode.
    ///
    /// With a master key configured this encrypts a plaintext record; the
    /// record is fully decoded first, so a corrupt record is reported rather
    /// than re-sealed.
    pub async fn reseal(&self, key: &StorageKey) -> StoreResult<Reseal> {
        let canonical = key.canonical();
        let _guard = self.locks.acquire_write_default(canonical).await?;
        let Some(raw) = self.medium.read(canonical).await? else {
            return Ok(Reseal::Missing);
        };
        let (payload, from) = self.open_record(canonical, raw).await?;
        let to = self.codec.target_mode();
        if from == to {
            return Ok(Reseal::Unchanged(from));
        }
        let record = self.seal_payload(canonical, payload).await?;
        self.medium.write(canonical, record.as_bytes()).await?;
        info!(key = %key, %from, %to, "record resealed");
        Ok(Reseal::Converted { from, to })
    }

    /// Start an empty transaction against this store.
    pub fn transaction(&self) -> Transaction {
        Transaction::new(self.clone())
    }

    /// Diagnostics for every key currently locked or awaited.
    pub fn lock_snapshot(&self) -> Vec<LockInfo> {
        self.locks.snapshot()
    }

    pub fn locks(&self) -> &LockManager {
        &self.locks
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Whether new records are encrypted.
    pub fn is_encrypted(&self) -> bool {
        self.codec.is_encrypted()
    }

    async fn read_locked(&self, key: &StorageKey) -> StoreResult<Option<Vec<u8>>> {
        let _guard = self.locks.acquire_read_default(key.canonical()).await?;
        Ok(self.medium.read(key.canonical()).await?)
    }

    // -----------------------------------------------------------------------
    // Raw primitives. Callers hold the relevant locks.
    // -----------------------------------------------------------------------

    pub(crate) async fn raw_read(&self, key: &str) -> MediumResult<Option<Vec<u8>>> {
        self.medium.read(key).await
    }

    pub(crate) async fn raw_write(&self, key: &str, record: &[u8]) -> MediumResult<()> {
        self.medium.write(key, record).await
    }

    pub(crate) async fn raw_delete(&self, key: &str) -> MediumResult<bool> {
        self.medium.delete(key).await
    }

    /// Seal a serialized payload into a stored record. Key derivation runs
    /// on the blocking pool when encrypting.
    pub(crate) async fn seal_payload(&self, key: &str, payload: String) -> StoreResult<String> {
        if !self.codec.is_encrypted() {
            return self.codec.seal(key, &payload);
        }
        let codec = Arc::clone(&self.codec);
        let key = key.to_string();
        tokio::task::spawn_blocking(move || codec.seal(&key, &payload))
            .await
            .map_err(|e| StoreError::Background(e.to_string()))?
    }

    async fn open_record(&self, key: &str, raw: Vec<u8>) -> StoreResult<(String, EnvelopeMode)> {
        if !self.codec.is_encrypted() {
            return self.codec.open(key, &raw);
        }
        let codec = Arc::clone(&self.codec);
        let key = key.to_string();
        tokio::task::spawn_blocking(move || codec.open(&key, &raw))
            .await
            .map_err(|e| StoreError::Background(e.to_string()))?
    }
}

impl std::fmt::Debug for DocumentStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DocumentStore")
            .field("encrypted", &self.is_encrypted())
            .field("locks", &self.locks)
            .field("config", &self.config)
            .finish()
    }
}

pub(crate) fn serialize<T: Serialize + ?Sized>(key: &str, document: &T) -> StoreResult<String> {
    serde_json::to_string(document).map_err(|e| StoreError::Serialization {
        key: key.to_string(),
        reason: e.to_string(),
    })
}

fn deserialize<T: DeserializeOwned>(key: &str, payload: &str) -> StoreResult<T> {
    serde_json::from_str(payload).map_err(|e| StoreError::Serialization {
        key: key.to_string(),
        reason: e.to_string(),
    })
}
