use docvault_crypto::integrity;
use docvault_crypto::{CipherError, EncryptionCodec, EnvelopeMode, MasterKey};
use tracing::warn;

use crate::error::{StoreError, StoreResult};

/// Turns JSON payloads into stored records and back.
///
/// A record is `checksum:envelope`, where the envelope is the codec's
/// encrypted or plaintext form of the payload. The checksum is always
/// verified before anything is decrypted.
#[derive(Clone, Debug)]
pub struct RecordCodec {
    cipher: EncryptionCodec,
    master_key: Option<MasterKey>,
}

impl RecordCodec {
    pub fn new(master_key: Option<MasterKey>, kdf_iterations: u32) -> Result<Self, CipherError> {
        Ok(Self {
            cipher: EncryptionCodec::new(kdf_iterations)?,
            master_key,
        })
    }

    /// Whether new records are encrypted.
    pub fn is_encrypted(&self) -> bool {
        self.master_key.is_some()
    }

    /// The envelope mode new records are written in.
    pub fn target_mode(&self) -> EnvelopeMode {
        if self.is_encrypted() {
            EnvelopeMode::Encrypted
        } else {
            EnvelopeMode::Plaintext
        }
    }

    /// Encode `payload` for storage under `key`.
    pub fn seal(&self, key: &str, payload: &str) -> StoreResult<String> {
        let envelope = self
            .cipher
            .seal(payload, self.master_key.as_ref())
            .map_err(|reason| StoreError::EncryptionFailed {
                key: key.to_string(),
                reason,
            })?;
        Ok(integrity::wrap(&envelope))
    }

    /// Verify and decode a stored record, returning the payload and the
    /// mode it was stored in.
    pub fn open(&self, key: &str, raw: &[u8]) -> StoreResult<(String, EnvelopeMode)> {
        let (envelope, mode) = self.verify(key, raw)?;
        if mode == EnvelopeMode::Plaintext && self.is_encrypted() {
            warn!(key, "record is stored unencrypted; reseal it to migrate");
        }
        let payload = self
            .cipher
            .open(envelope, self.master_key.as_ref())
            .map_err(|reason| StoreError::DecryptionFailed {
                key: key.to_string(),
                reason,
            })?;
        Ok((payload, mode))
    }

    /// Check the checksum and classify the envelope without decrypting.
    pub fn inspect(&self, key: &str, raw: &[u8]) -> StoreResult<EnvelopeMode> {
        self.verify(key, raw).map(|(_, mode)| mode)
    }

    fn verify<'a>(&self, key: &str, raw: &'a [u8]) -> StoreResult<(&'a str, EnvelopeMode)> {
        let envelope = integrity::unwrap_bytes(raw).map_err(|reason| StoreError::Integrity {
            key: key.to_string(),
            reason,
        })?;
        let mode = EnvelopeMode::detect(envelope).ok_or_else(|| StoreError::DecryptionFailed {
            key: key.to_string(),
            reason: CipherError::DecryptionFailed("unrecognized envelope"),
        })?;
        Ok((envelope, mode))
    }
}
