//! Checksum envelope: `checksum:payload`.
//!
//! The checksum is the BLAKE3 digest of the payload bytes, hex-encoded to
//! [`CHECKSUM_HEX_LEN`] characters. The payload is everything after the
//! separator at position [`CHECKSUM_HEX_LEN`] and may itself contain colons.

/// Length of the hex-encoded 256-bit checksum.
pub const CHECKSUM_HEX_LEN: usize = 64;

const SEPARATOR: char = ':';

/// Hex-encoded BLAKE3 digest of `payload`.
pub fn checksum(payload: &str) -> String {
    blake3::hash(payload.as_bytes()).to_hex().to_string()
}

/// Prefix `payload` with its checksum.
pub fn wrap(payload: &str) -> String {
    let mut wrapped = String::with_capacity(CHECKSUM_HEX_LEN + 1 + payload.len());
    wrapped.push_str(&checksum(payload));
    wrapped.push(SEPARATOR);
    wrapped.push_str(payload);
    wrapped
}

/// Verify a wrapped value and return the payload it carries.
///
/// The stored checksum may use either hex case. Comparison goes through
/// `blake3::Hash`'s constant-time equality.
pub fn unwrap(wrapped: &str) -> Result<&str, IntegrityError> {
    let (stored_hex, rest) = wrapped
        .split_at_checked(CHECKSUM_HEX_LEN)
        .ok_or(IntegrityError::Malformed("value shorter than checksum"))?;
    let payload = rest
        .strip_prefix(SEPARATOR)
        .ok_or(IntegrityError::Malformed("missing separator after checksum"))?;

    let stored = blake3::Hash::from_hex(stored_hex)
        .map_err(|_| IntegrityError::Malformed("checksum is not 64 hex characters"))?;
    let computed = blake3::hash(payload.as_bytes());

    if stored != computed {
        return Err(IntegrityError::ChecksumMismatch);
    }
    Ok(payload)
}

/// [`unwrap`] for raw bytes read from a medium.
pub fn unwrap_bytes(wrapped: &[u8]) -> Result<&str, IntegrityError> {
    let text = std::str::from_utf8(wrapped)
        .map_err(|_| IntegrityError::Malformed("value is not valid UTF-8"))?;
    unwrap(text)
}

/// Errors from checksum verification.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum IntegrityError {
    #[error("malformed integrity envelope: {0}")]
    Malformed(&'static str),

    #[error("checksum does not match payload")]
    ChecksumMismatch,
}
