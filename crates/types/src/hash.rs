//! Content hashes.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};
use std::fmt;
use thiserror::Error;

/// Error parsing a hash from its hex form.
#[derive(Debug, Error)]
pub enum HexError {
    #[error("invalid hex: {0}")]
    InvalidHex(#[from] hex::FromHexError),
    #[error("invalid hash length: expected 32 bytes, got {0}")]
    InvalidLength(usize),
}

/// A 32-byte content hash (SHA-256).
///
/// Serialized as a lowercase hex string on the wire.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Hash([u8; 32]);

impl Hash {
    /// The all-zero hash, used as the absent/sentinel value.
    pub const ZERO: Hash = Hash([0u8; 32]);

    /// Hash arbitrary bytes.
    pub fn digest(bytes: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(bytes);
        Hash(hasher.finalize().into())
    }

    /// Hash a value through its canonical JSON serialization.
    ///
    /// Field order is the struct declaration order, so every node computes
    /// the same digest for the same value.
    pub fn digest_json<T: Serialize>(value: &T) -> Self {
        let raw = serde_json::to_vec(value).expect("serializable value");
        Self::digest(&raw)
    }

    /// Construct from exactly 32 raw bytes.
    pub fn from_raw(bytes: [u8; 32]) -> Self {
        Hash(bytes)
    }

    /// Raw bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Whether this is the zero sentinel.
    pub fn is_zero(&self) -> bool {
        *self == Self::ZERO
    }

    /// Lowercase hex form.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parse from a hex string.
    pub fn from_hex(s: &str) -> Result<Self, HexError> {
        let raw = hex::decode(s)?;
        let arr: [u8; 32] = raw
            .as_slice()
            .try_into()
            .map_err(|_| HexError::InvalidLength(raw.len()))?;
        Ok(Hash(arr))
    }
}

impl fmt::Debug for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", &self.to_hex()[..8])
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl Serialize for Hash {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Hash {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Hash::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn digest_is_deterministic() {
        assert_eq!(Hash::digest(b"abc"), Hash::digest(b"abc"));
        assert_ne!(Hash::digest(b"abc"), Hash::digest(b"abd"));
    }

    #[test]
    fn hex_round_trip() {
        let h = Hash::digest(b"round-trip");
        assert_eq!(Hash::from_hex(&h.to_hex()).unwrap(), h);
    }

    #[test]
    fn serde_as_hex_string() {
        let h = Hash::digest(b"wire");
        let json = serde_json::to_string(&h).unwrap();
        assert_eq!(json, format!("\"{}\"", h.to_hex()));
        let back: Hash = serde_json::from_str(&json).unwrap();
        assert_eq!(back, h);
    }
}
