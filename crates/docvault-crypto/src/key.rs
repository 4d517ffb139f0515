use rand::RngCore;
use zeroize::Zeroizing;

/// Length of keys produced by [`MasterKey::generate`].
pub const GENERATED_KEY_LEN: usize = 32;

/// Opaque master key material supplied at store-open time.
///
/// The store never derives a cipher key from this directly; every
/// encryption stretches it with a fresh salt first. Bytes are wiped on drop.
#[derive(Clone)]
pub struct MasterKey(Zeroizing<Vec<u8>>);

impl MasterKey {
    /// Wrap caller-supplied key material. Returns `None` for empty input,
    /// which callers treat the same as "no key configured".
    pub fn new(bytes: impl Into<Vec<u8>>) -> Option<Self> {
        let bytes = bytes.into();
        if bytes.is_empty() {
            return None;
        }
        Some(Self(Zeroizing::new(bytes)))
    }

    /// Read key material from an environment variable.
    ///
    /// The raw bytes of the value are used as-is; an unset or empty variable
    /// yields `None`.
    pub fn from_env(var: &str) -> Option<Self> {
        let value = std::env::var_os(var)?;
        Self::new(value.into_encoded_bytes())
    }

    /// Generate fresh random key material.
    ///
    /// The store treats keys as opaque bytes; the hex form from
    /// [`to_hex`](Self::to_hex) is what key-generation tooling prints.
    pub fn generate() -> Self {
        let mut bytes = Zeroizing::new(vec![0u8; GENERATED_KEY_LEN]);
        rand::rngs::OsRng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    /// Raw key bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Hex encoding of the key bytes.
    pub fn to_hex(&self) -> String {
        hex::encode(self.as_bytes())
    }
}

impl std::fmt::Debug for MasterKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "MasterKey(<redacted>)")
    }
}

impl PartialEq for MasterKey {
    fn eq(&self, other: &Self) -> bool {
        self.as_bytes() == other.as_bytes()
    }
}

impl Eq for MasterKey {}
