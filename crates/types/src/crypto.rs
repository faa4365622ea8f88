//! Keys, signatures and addresses.
//!
//! Every signed payload is prefixed with the network id, so a signature
//! produced on one network never verifies on another.

use ed25519_dalek::{Signer, SigningKey, Verifier, VerifyingKey};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use thiserror::Error;

/// Error parsing an address from its hex form.
#[derive(Debug, Error)]
pub enum AddressParseError {
    #[error("invalid hex: {0}")]
    InvalidHex(#[from] hex::FromHexError),
    #[error("invalid address length: expected 32 bytes, got {0}")]
    InvalidLength(usize),
}

/// A validator or account address: the ed25519 public key bytes.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Address([u8; 32]);

impl Address {
    /// The all-zero address (genesis previous-proposer sentinel).
    pub const ZERO: Address = Address([0u8; 32]);

    pub fn from_raw(bytes: [u8; 32]) -> Self {
        Address(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn from_hex(s: &str) -> Result<Self, AddressParseError> {
        let raw = hex::decode(s)?;
        let arr: [u8; 32] = raw
            .as_slice()
            .try_into()
            .map_err(|_| AddressParseError::InvalidLength(raw.len()))?;
        Ok(Address(arr))
    }

    /// The public key this address encodes, if it is a valid curve point.
    pub fn public_key(&self) -> Option<PublicKey> {
        VerifyingKey::from_bytes(&self.0).ok().map(PublicKey)
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", &self.to_hex()[..8])
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl Serialize for Address {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Address::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

/// An ed25519 public key.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct PublicKey(VerifyingKey);

impl PublicKey {
    pub fn address(&self) -> Address {
        Address(self.0.to_bytes())
    }

    /// Verify `signature` over `network_id || message`.
    pub fn verify(&self, network_id: &[u8], message: &[u8], signature: &Signature) -> bool {
        let payload = signing_payload(network_id, message);
        self.0.verify(&payload, &signature.0).is_ok()
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKey({:?})", self.address())
    }
}

/// An ed25519 signature, hex on the wire.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Signature(ed25519_dalek::Signature);

impl Signature {
    /// A structurally valid but never-verifying signature, for tests and
    /// placeholder fields prior to signing.
    pub fn zero() -> Self {
        Signature(ed25519_dalek::Signature::from_bytes(&[0u8; 64]))
    }

    pub fn to_bytes(&self) -> [u8; 64] {
        self.0.to_bytes()
    }

    pub fn from_bytes(bytes: &[u8; 64]) -> Self {
        Signature(ed25519_dalek::Signature::from_bytes(bytes))
    }
}

impl fmt::Debug for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", &hex::encode(self.to_bytes())[..8])
    }
}

impl Serialize for Signature {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(self.to_bytes()))
    }
}

impl<'de> Deserialize<'de> for Signature {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        let raw = hex::decode(&s).map_err(serde::de::Error::custom)?;
        let arr: [u8; 64] = raw
            .as_slice()
            .try_into()
            .map_err(|_| serde::de::Error::custom("invalid signature length"))?;
        Ok(Signature::from_bytes(&arr))
    }
}

/// A signing keypair.
#[derive(Clone)]
pub struct KeyPair {
    signing: SigningKey,
}

impl KeyPair {
    /// Generate a fresh random keypair.
    pub fn generate<R: rand::CryptoRng + rand::RngCore>(rng: &mut R) -> Self {
        KeyPair {
            signing: SigningKey::generate(rng),
        }
    }

    /// Derive a keypair from a 32-byte seed.
    pub fn from_seed(seed: &[u8; 32]) -> Self {
        KeyPair {
            signing: SigningKey::from_bytes(seed),
        }
    }

    pub fn public_key(&self) -> PublicKey {
        PublicKey(self.signing.verifying_key())
    }

    pub fn address(&self) -> Address {
        self.public_key().address()
    }

    /// Sign `network_id || message`.
    pub fn sign(&self, network_id: &[u8], message: &[u8]) -> Signature {
        let payload = signing_payload(network_id, message);
        Signature(self.signing.sign(&payload))
    }
}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "KeyPair({:?})", self.address())
    }
}

fn signing_payload(network_id: &[u8], message: &[u8]) -> Vec<u8> {
    let mut payload = Vec::with_capacity(network_id.len() + message.len());
    payload.extend_from_slice(network_id);
    payload.extend_from_slice(message);
    payload
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keypair() -> KeyPair {
        KeyPair::from_seed(&[42u8; 32])
    }

    #[test]
    fn sign_and_verify() {
        let kp = keypair();
        let sig = kp.sign(b"net-a", b"hello");
        assert!(kp.public_key().verify(b"net-a", b"hello", &sig));
    }

    #[test]
    fn network_id_prevents_cross_network_replay() {
        let kp = keypair();
        let sig = kp.sign(b"net-a", b"hello");
        assert!(!kp.public_key().verify(b"net-b", b"hello", &sig));
    }

    #[test]
    fn generated_keys_are_distinct() {
        use rand::SeedableRng;
        let mut rng = rand_chacha::ChaCha8Rng::seed_from_u64(7);
        let a = KeyPair::generate(&mut rng);
        let b = KeyPair::generate(&mut rng);
        assert_ne!(a.address(), b.address());
    }

    #[test]
    fn address_recovers_public_key() {
        let kp = keypair();
        let pk = kp.address().public_key().unwrap();
        let sig = kp.sign(b"net", b"msg");
        assert!(pk.verify(b"net", b"msg", &sig));
    }
}
