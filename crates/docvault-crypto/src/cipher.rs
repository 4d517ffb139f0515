//! Authenticated encryption envelope.
//!
//! Wire format (hex fields, colon-separated):
//!
//! ```text
//! salt:iv:tag:ciphertext
//! ```
//!
//! - `salt`: 32 random bytes, fresh per call, fed to PBKDF2-HMAC-SHA256
//! - `iv`: 12 random bytes, fresh per call, the AES-GCM nonce
//! - `tag`: 16-byte GCM authentication tag over the ciphertext
//! - `ciphertext`: AES-256-GCM output, same length as the plaintext
//!
//! Without a master key, payloads are stored as `plain:<payload>`. The marker
//! is not valid hex, so the two modes can never be confused.

use aes_gcm::aead::generic_array::GenericArray;
use aes_gcm::aead::{AeadInPlace, KeyInit};
use aes_gcm::Aes256Gcm;
use rand::RngCore;
use sha2::Sha256;
use zeroize::Zeroizing;

use crate::key::MasterKey;

/// Lowest accepted PBKDF2 round count.
pub const MIN_KDF_ITERATIONS: u32 = 100_000;

/// Prefix marking an unencrypted payload.
pub const PLAINTEXT_MARKER: &str = "plain:";

const SALT_LEN: usize = 32;
const IV_LEN: usize = 12;
const TAG_LEN: usize = 16;
const KEY_LEN: usize = 32;
const FIELD_COUNT: usize = 4;

/// Which envelope a stored payload uses.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EnvelopeMode {
    /// `salt:iv:tag:ciphertext`.
    Encrypted,
    /// `plain:<payload>`, written when no master key was configured.
    Plaintext,
}

impl EnvelopeMode {
    /// Classify an envelope without decrypting it.
    ///
    /// Returns `None` for values that are neither a plaintext marker nor
    /// four hex fields.
    pub fn detect(envelope: &str) -> Option<Self> {
        if envelope.starts_with(PLAINTEXT_MARKER) {
            return Some(Self::Plaintext);
        }
        let fields: Vec<&str> = envelope.split(':').collect();
        let well_formed = fields.len() == FIELD_COUNT
            && !fields[0].is_empty()
            && fields
                .iter()
                .all(|f| f.len() % 2 == 0 && f.bytes().all(|b| b.is_ascii_hexdigit()));
        well_formed.then_some(Self::Encrypted)
    }
}

impl std::fmt::Display for EnvelopeMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Encrypted => write!(f, "encrypted"),
            Self::Plaintext => write!(f, "plaintext"),
        }
    }
}

/// AES-256-GCM codec keyed through PBKDF2.
///
/// The round count is not recorded in the envelope, so every codec reading
/// a given data set must be built with the same count that wrote it.
#[derive(Clone, Debug)]
pub struct EncryptionCodec {
    iterations: u32,
}

impl EncryptionCodec {
    /// Codec using `iterations` PBKDF2 rounds per call.
    pub fn new(iterations: u32) -> Result<Self, CipherError> {
        if iterations < MIN_KDF_ITERATIONS {
            return Err(CipherError::WeakKdf {
                iterations,
                minimum: MIN_KDF_ITERATIONS,
            });
        }
        Ok(Self { iterations })
    }

    /// PBKDF2 rounds per call.
    pub fn iterations(&self) -> u32 {
        self.iterations
    }

    /// Encrypt `plaintext` under a key derived from `master_key` and a fresh salt.
    pub fn encrypt(&self, plaintext: &[u8], master_key: &MasterKey) -> Result<String, CipherError> {
        let mut salt = [0u8; SALT_LEN];
        let mut iv = [0u8; IV_LEN];
        let mut rng = rand::rngs::OsRng;
        rng.fill_bytes(&mut salt);
        rng.fill_bytes(&mut iv);

        let cipher = self.cipher_for(master_key, &salt);
        let mut buffer = plaintext.to_vec();
        let tag = cipher
            .encrypt_in_place_detached(GenericArray::from_slice(&iv), b"", &mut buffer)
            .map_err(|_| CipherError::EncryptionFailed)?;

        Ok(format!(
            "{}:{}:{}:{}",
            hex::encode(salt),
            hex::encode(iv),
            hex::encode(tag),
            hex::encode(&buffer)
        ))
    }

    /// Decrypt an envelope produced by [`encrypt`](Self::encrypt).
    ///
    /// Fails closed: a wrong key, a truncated envelope, or a tag mismatch
    /// all yield [`CipherError::DecryptionFailed`] and no plaintext.
    pub fn decrypt(&self, envelope: &str, master_key: &MasterKey) -> Result<Vec<u8>, CipherError> {
        let mut fields = envelope.split(':');
        let (Some(salt), Some(iv), Some(tag), Some(ciphertext), None) = (
            fields.next(),
            fields.next(),
            fields.next(),
            fields.next(),
            fields.next(),
        ) else {
            return Err(CipherError::DecryptionFailed("envelope must have four fields"));
        };

        let salt = decode_field(salt, Some(SALT_LEN))?;
        let iv = decode_field(iv, Some(IV_LEN))?;
        let tag = decode_field(tag, Some(TAG_LEN))?;
        let mut buffer = decode_field(ciphertext, None)?;

        let cipher = self.cipher_for(master_key, &salt);
        cipher
            .decrypt_in_place_detached(
                GenericArray::from_slice(&iv),
                b"",
                &mut buffer,
                GenericArray::from_slice(&tag),
            )
            .map_err(|_| CipherError::DecryptionFailed("authentication tag mismatch"))?;
        Ok(buffer)
    }

    /// Encode a payload for storage: encrypted when a key is present,
    /// marked plaintext otherwise.
    pub fn seal(&self, payload: &str, master_key: Option<&MasterKey>) -> Result<String, CipherError> {
        match master_key {
            Some(key) => self.encrypt(payload.as_bytes(), key),
            None => Ok(format!("{PLAINTEXT_MARKER}{payload}")),
        }
    }

    /// Reverse of [`seal`](Self::seal).
    ///
    /// Plaintext envelopes are returned verbatim whether or not a key is
    /// configured. Encrypted envelopes require a key.
    pub fn open(&self, envelope: &str, master_key: Option<&MasterKey>) -> Result<String, CipherError> {
        if let Some(payload) = envelope.strip_prefix(PLAINTEXT_MARKER) {
            return Ok(payload.to_string());
        }
        let key = master_key.ok_or(CipherError::DecryptionFailed(
            "record is encrypted but no master key is configured",
        ))?;
        let bytes = self.decrypt(envelope, key)?;
        String::from_utf8(bytes)
            .map_err(|_| CipherError::DecryptionFailed("plaintext is not valid UTF-8"))
    }

    fn cipher_for(&self, master_key: &MasterKey, salt: &[u8]) -> Aes256Gcm {
        let mut derived = Zeroizing::new([0u8; KEY_LEN]);
        pbkdf2::pbkdf2_hmac::<Sha256>(master_key.as_bytes(), salt, self.iterations, &mut derived[..]);
        Aes256Gcm::new(GenericArray::from_slice(&derived[..]))
    }
}

impl Default for EncryptionCodec {
    fn default() -> Self {
        Self {
            iterations: MIN_KDF_ITERATIONS,
        }
    }
}

fn decode_field(field: &str, expected_len: Option<usize>) -> Result<Vec<u8>, CipherError> {
    let bytes = hex::decode(field).map_err(|_| CipherError::DecryptionFailed("field is not hex"))?;
    match expected_len {
        Some(len) if bytes.len() != len => Err(CipherError::DecryptionFailed("truncated envelope field")),
        _ => Ok(bytes),
    }
}

/// Errors from the encryption codec.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum CipherError {
    #[error("decryption failed: {0}")]
    DecryptionFailed(&'static str),

    #[error("encryption failed")]
    EncryptionFailed,

    #[error("kdf iteration count {iterations} is below the minimum of {minimum}")]
    WeakKdf { iterations: u32, minimum: u32 },
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn key(material: &str) -> MasterKey {
        MasterKey::new(material).unwrap()
    }

    #[test]
    fn roundtrip() {
        let codec = EncryptionCodec::default();
        let k = key("correct horse");
        let envelope = codec.encrypt(b"{\"title\":\"x\"}", &k).unwrap();
        assert_eq!(codec.decrypt(&envelope, &k).unwrap(), b"{\"title\":\"x\"}");
    }

    #[test]
    fn envelope_has_four_hex_fields() {
        let codec = EncryptionCodec::default();
        let envelope = codec.encrypt(b"abc", &key("k")).unwrap();
        let fields: Vec<&str> = envelope.split(':').collect();
        assert_eq!(fields.len(), 4);
        assert_eq!(fields[0].len(), SALT_LEN * 2);
        assert_eq!(fields[1].len(), IV_LEN * 2);
        assert_eq!(fields[2].len(), TAG_LEN * 2);
        assert_eq!(fields[3].len(), 3 * 2);
        assert_eq!(EnvelopeMode::detect(&envelope), Some(EnvelopeMode::Encrypted));
    }

    #[test]
    fn wrong_key_fails() {
        let codec = EncryptionCodec::default();
        let envelope = codec.encrypt(b"secret", &key("right")).unwrap();
        let err = codec.decrypt(&envelope, &key("wrong")).unwrap_err();
        assert!(matches!(err, CipherError::DecryptionFailed(_)));
    }

    #[test]
    fn same_plaintext_encrypts_differently() {
        let codec = EncryptionCodec::default();
        let k = key("k");
        let a = codec.encrypt(b"same", &k).unwrap();
        let b = codec.encrypt(b"same", &k).unwrap();
        assert_ne!(a, b);
        assert_eq!(codec.decrypt(&a, &k).unwrap(), b"same");
        assert_eq!(codec.decrypt(&b, &k).unwrap(), b"same");
    }

    #[test]
    fn tampered_ciphertext_fails() {
        let codec = EncryptionCodec::default();
        let k = key("k");
        let envelope = codec.encrypt(b"payload", &k).unwrap();
        let mut fields: Vec<String> = envelope.split(':').map(str::to_string).collect();
        let mut ct = hex::decode(&fields[3]).unwrap();
        ct[0] ^= 0x80;
        fields[3] = hex::encode(ct);
        let err = codec.decrypt(&fields.join(":"), &k).unwrap_err();
        assert_eq!(err, CipherError::DecryptionFailed("authentication tag mismatch"));
    }

    #[test]
    fn tampered_tag_fails() {
        let codec = EncryptionCodec::default();
        let k = key("k");
        let envelope = codec.encrypt(b"payload", &k).unwrap();
        let mut fields: Vec<String> = envelope.split(':').map(str::to_string).collect();
        let mut tag = hex::decode(&fields[2]).unwrap();
        tag[TAG_LEN - 1] ^= 0x01;
        fields[2] = hex::encode(tag);
        assert!(codec.decrypt(&fields.join(":"), &k).is_err());
    }

    #[test]
    fn truncated_envelope_fails() {
        let codec = EncryptionCodec::default();
        let k = key("k");
        let envelope = codec.encrypt(b"payload", &k).unwrap();
        let three_fields = envelope.rsplit_once(':').unwrap().0;
        assert!(matches!(codec.decrypt(three_fields, &k), Err(CipherError::DecryptionFailed(_))));

        let short_salt = &envelope[2..];
        assert!(matches!(codec.decrypt(short_salt, &k), Err(CipherError::DecryptionFailed(_))));
    }

    #[test]
    fn empty_plaintext_roundtrips() {
        let codec = EncryptionCodec::default();
        let k = key("k");
        let envelope = codec.encrypt(b"", &k).unwrap();
        assert!(envelope.ends_with(':'));
        assert_eq!(codec.decrypt(&envelope, &k).unwrap(), b"");
    }

    #[test]
    fn weak_kdf_is_rejected() {
        let err = EncryptionCodec::new(1_000).unwrap_err();
        assert!(matches!(err, CipherError::WeakKdf { iterations: 1_000, .. }));
        assert_eq!(EncryptionCodec::new(200_000).unwrap().iterations(), 200_000);
    }

    #[test]
    fn seal_without_key_is_marked_plaintext() {
        let codec = EncryptionCodec::default();
        let sealed = codec.seal("{\"a\":1}", None).unwrap();
        assert_eq!(sealed, "plain:{\"a\":1}");
        assert_eq!(EnvelopeMode::detect(&sealed), Some(EnvelopeMode::Plaintext));
        assert_eq!(codec.open(&sealed, None).unwrap(), "{\"a\":1}");
    }

    #[test]
    fn plaintext_opens_even_with_key() {
        let codec = EncryptionCodec::default();
        let sealed = codec.seal("legacy", None).unwrap();
        assert_eq!(codec.open(&sealed, Some(&key("k"))).unwrap(), "legacy");
    }

    #[test]
    fn encrypted_without_key_fails() {
        let codec = EncryptionCodec::default();
        let sealed = codec.seal("secret", Some(&key("k"))).unwrap();
        assert!(matches!(codec.open(&sealed, None), Err(CipherError::DecryptionFailed(_))));
        assert_eq!(codec.open(&sealed, Some(&key("k"))).unwrap(), "secret");
    }

    #[test]
    fn detect_rejects_garbage() {
        assert_eq!(EnvelopeMode::detect("not an envelope"), None);
        assert_eq!(EnvelopeMode::detect("aa:bb:cc"), None);
        assert_eq!(EnvelopeMode::detect("aa:bb:cc:zz"), None);
    }

    // Each case pays for two full KDF runs.
    proptest! {
        #![proptest_config(ProptestConfig::with_cases(8))]

        #[test]
        fn any_payload_roundtrips_under_any_key(
            payload in prop::collection::vec(any::<u8>(), 0..256),
            material in prop::collection::vec(any::<u8>(), 1..64),
        ) {
            let codec = EncryptionCodec::default();
            let k = MasterKey::new(material).unwrap();
            let envelope = codec.encrypt(&payload, &k).unwrap();
            prop_assert_eq!(EnvelopeMode::detect(&envelope), Some(EnvelopeMode::Encrypted));
            prop_assert_eq!(codec.decrypt(&envelope, &k).unwrap(), payload);
        }

        #[test]
        fn any_other_key_is_rejected(
            payload in "[ -~]{0,64}",
            material in prop::collection::vec(any::<u8>(), 1..64),
            flip in any::<prop::sample::Index>(),
        ) {
            let codec = EncryptionCodec::default();
            let right = MasterKey::new(material.clone()).unwrap();
            let mut other = material;
            let at = flip.index(other.len());
            other[at] ^= 0x01;
            let wrong = MasterKey::new(other).unwrap();
            let envelope = codec.encrypt(payload.as_bytes(), &right).unwrap();
            prop_assert!(matches!(
                codec.decrypt(&envelope, &wrong),
                Err(CipherError::DecryptionFailed(_))
            ));
        }
    }
}
