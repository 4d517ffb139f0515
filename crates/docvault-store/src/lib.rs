//! Transactional, encrypted-at-rest document store.
//!
//! Records are addressed by a [`StorageKey`] and hold any serde-serializable
//! document. On the way to the backing [`Medium`] a document is serialized
//! to JSON, sealed by the encryption codec (or marked plaintext when no
//! master key is configured), and wrapped in a checksum envelope:
//!
//! ```text
//! checksum:salt:iv:tag:ciphertext      (encrypted)
//! checksum:plain:{"title":"x"}         (no master key)
//! ```
//!
//! # Media
//!
//! All backends implement the [`Medium`] trait:
//!
//! - [`InMemoryMedium`] -- `HashMap`-based medium for tests and embedding
//! - [`FileMedium`] -- one file per key, written via temp file and rename
//!
//! # Design Rules
//!
//! 1. Every single-key operation holds the key's lock for the medium I/O.
//! 2. Transactions lock their keys in canonical order, so overlapping
//!    transactions cannot deadlock.
//! 3. A failed commit restores every touched key before the locks drop.
//! 4. Corrupted or undecryptable records are errors, never `None` and never
//!    partially-trusted data.
//! 5. The store never retries on its own; retry policy belongs to callers.

pub mod codec;
pub mod config;
pub mod error;
pub mod file;
pub mod medium;
pub mod memory;
pub mod store;
pub mod transaction;

pub use codec::RecordCodec;
pub use config::{ConfigError, StoreConfig, MASTER_KEY_ENV};
pub use error::{StoreError, StoreResult};
pub use file::FileMedium;
pub use medium::{Medium, MediumError, MediumResult};
pub use memory::InMemoryMedium;
pub use store::{DocumentStore, Reseal};
pub use transaction::Transaction;

pub use docvault_crypto::{EnvelopeMode, MasterKey};
pub use docvault_lock::{LockInfo, LockMode};
pub use docvault_types::StorageKey;
