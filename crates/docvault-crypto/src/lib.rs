//! Cryptographic envelopes for docvault.
//!
//! Two layers sit between a serialized document and the backing medium:
//!
//! - [`integrity`] prefixes a payload with a BLAKE3 checksum and rejects any
//!   payload whose checksum no longer matches.
//! - [`cipher`] seals a payload with AES-256-GCM under a key derived from the
//!   [`MasterKey`] and a per-call salt (PBKDF2-HMAC-SHA256), or marks it as
//!   plaintext when no master key is configured.
//!
//! All crypto operations wrap established libraries; nothing here is custom cryptography.

pub mod cipher;
pub mod integrity;
pub mod key;

pub use cipher::{CipherError, EncryptionCodec, EnvelopeMode, MIN_KDF_ITERATIONS, PLAINTEXT_MARKER};
pub use integrity::{IntegrityError, CHECKSUM_HEX_LEN};
pub use key::MasterKey;
