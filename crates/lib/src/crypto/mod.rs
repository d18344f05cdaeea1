//! Cryptographic primitives of the authority layer.
//!
//! This module provides the algorithm-agnostic [`PublicKey`]/[`PrivateKey`] pair,
//! [`SignatureData`], the [`SignatureVersion`] guard and the canonical byte
//! encoding shared by every signed structure.
//!
//! Canonical bytes are produced by serializing a per-structure `Serialize` struct
//! whose fields are declared in the fixed signing order, wrapped in a
//! `{version, body}` envelope. Signing and verification call the same function with
//! the same struct, so any difference in fields, order or version makes
//! verification fail.

use base64ct::{Base64, Encoding};
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;
use zeroize::{ZeroizeOnDrop, Zeroizing};

use crate::Result;
use crate::constants::ED25519_PREFIX;

mod errors;
pub mod secret;

pub use errors::CryptoError;
pub use secret::SecretKeyRing;

/// Size of Ed25519 public keys in bytes
pub const ED25519_PUBLIC_KEY_SIZE: usize = 32;

/// Size of Ed25519 private keys in bytes
pub const ED25519_PRIVATE_KEY_SIZE: usize = 32;

/// Size of Ed25519 signatures in bytes
pub const ED25519_SIGNATURE_SIZE: usize = 64;

// ==================== Signature versions ====================

/// Version of a signed structure's canonical byte layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SignatureVersion(pub u16);

impl SignatureVersion {
    /// The version produced by this implementation.
    pub const CURRENT: SignatureVersion = SignatureVersion(0);

    /// Every version this implementation can produce and verify.
    pub const SUPPORTED: &'static [SignatureVersion] = &[SignatureVersion(0)];

    pub fn is_supported(self) -> bool {
        Self::SUPPORTED.contains(&self)
    }

    /// Fail with `UnsupportedSignatureVersion` unless this version is supported.
    pub fn check(self) -> std::result::Result<(), CryptoError> {
        if self.is_supported() {
            Ok(())
        } else {
            Err(CryptoError::UnsupportedSignatureVersion { version: self.0 })
        }
    }
}

impl Default for SignatureVersion {
    fn default() -> Self {
        Self::CURRENT
    }
}

// ==================== Signature data ====================

/// Raw signature bytes over a structure's canonical encoding.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SignatureData(#[serde(with = "serde_bytes")] Vec<u8>);

impl SignatureData {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Identifier of this signature: the first 16 bytes of its SHA-256 hash.
    ///
    /// Revocation sets refer to signatures by this value.
    pub fn uuid(&self) -> Uuid {
        let digest = Sha256::digest(&self.0);
        let mut bytes = [0u8; 16];
        bytes.copy_from_slice(&digest[..16]);
        Uuid::from_bytes(bytes)
    }
}

// ==================== Canonical encoding ====================

#[derive(Serialize)]
struct Envelope<'a, T: Serialize> {
    version: SignatureVersion,
    body: &'a T,
}

/// Produce the canonical bytes of `body` under `version`.
///
/// Fails with `UnsupportedSignatureVersion` before serializing anything when the
/// version is not supported.
pub fn canonical_bytes<T: Serialize>(version: SignatureVersion, body: &T) -> Result<Vec<u8>> {
    version.check()?;
    Ok(serde_json::to_vec(&Envelope { version, body })?)
}

/// Sign the canonical encoding of `body`.
pub fn sign_canonical<T: Serialize>(
    key: &PrivateKey,
    version: SignatureVersion,
    body: &T,
) -> Result<SignatureData> {
    let bytes = canonical_bytes(version, body)?;
    Ok(SignatureData::new(key.sign(&bytes)))
}

/// Verify `data` against the canonical encoding of `body`.
///
/// `subject` names the verified structure in the error message.
pub fn verify_canonical<T: Serialize>(
    key: &PublicKey,
    version: SignatureVersion,
    data: &SignatureData,
    body: &T,
    subject: impl FnOnce() -> String,
) -> Result<()> {
    let bytes = canonical_bytes(version, body)?;
    if key.verify(&bytes, data.as_bytes()) {
        Ok(())
    } else {
        Err(CryptoError::VerificationFailed { subject: subject() }.into())
    }
}

/// SHA-256 helper used for Merkle digests.
pub fn sha256(parts: &[&[u8]]) -> Vec<u8> {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update((part.len() as u64).to_be_bytes());
        hasher.update(part);
    }
    hasher.finalize().to_vec()
}

// ==================== Algorithm-Agnostic Key Types ====================

/// Algorithm-agnostic public key for signature verification.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PublicKey {
    /// Ed25519 public key (32 bytes)
    Ed25519(VerifyingKey),
}

impl PublicKey {
    /// Verify a signature over the given data.
    ///
    /// Malformed signatures count as a mismatch.
    pub fn verify(&self, data: &[u8], signature: &[u8]) -> bool {
        match self {
            PublicKey::Ed25519(key) => {
                let Ok(sig_array) = <[u8; ED25519_SIGNATURE_SIZE]>::try_from(signature) else {
                    return false;
                };
                key.verify(data, &Signature::from_bytes(&sig_array)).is_ok()
            }
        }
    }

    /// Format the public key as a prefixed string (e.g. `"ed25519:base64..."`).
    pub fn to_prefixed_string(&self) -> String {
        match self {
            PublicKey::Ed25519(key) => {
                let encoded = Base64::encode_string(&key.to_bytes());
                format!("{ED25519_PREFIX}:{encoded}")
            }
        }
    }

    /// Parse a public key from a prefixed string (e.g. `"ed25519:base64..."`).
    pub fn from_prefixed_string(s: &str) -> std::result::Result<Self, CryptoError> {
        let (prefix, key_data) = s
            .split_once(':')
            .ok_or_else(|| CryptoError::InvalidKeyFormat {
                reason: "Expected 'algorithm:key' format".to_string(),
            })?;
        if prefix != ED25519_PREFIX {
            return Err(CryptoError::InvalidKeyFormat {
                reason: format!("Unknown key algorithm prefix: '{prefix}'"),
            });
        }
        let key_bytes = Base64::decode_vec(key_data).map_err(|e| CryptoError::InvalidKeyFormat {
            reason: format!("Invalid base64 for key: {e}"),
        })?;
        let key_array: [u8; ED25519_PUBLIC_KEY_SIZE] =
            key_bytes
                .try_into()
                .map_err(|v: Vec<u8>| CryptoError::InvalidKeyFormat {
                    reason: format!(
                        "Ed25519 public key must be {ED25519_PUBLIC_KEY_SIZE} bytes, got {}",
                        v.len()
                    ),
                })?;
        let verifying_key =
            VerifyingKey::from_bytes(&key_array).map_err(|e| CryptoError::KeyParsingFailed {
                reason: e.to_string(),
            })?;
        Ok(PublicKey::Ed25519(verifying_key))
    }

    pub fn algorithm(&self) -> &'static str {
        match self {
            PublicKey::Ed25519(_) => ED25519_PREFIX,
        }
    }
}

impl std::fmt::Display for PublicKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_prefixed_string())
    }
}

impl Serialize for PublicKey {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_prefixed_string())
    }
}

impl<'de> Deserialize<'de> for PublicKey {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        PublicKey::from_prefixed_string(&s).map_err(serde::de::Error::custom)
    }
}

/// Algorithm-agnostic signing key.
///
/// Secret material is zeroed on drop via the inner key types.
#[non_exhaustive]
#[derive(Clone)]
pub enum PrivateKey {
    /// Ed25519 signing key (32 bytes)
    Ed25519(SigningKey),
}

impl std::fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PrivateKey::Ed25519(_) => f.write_str("PrivateKey::Ed25519([REDACTED])"),
        }
    }
}

impl PrivateKey {
    /// Generate a new key using the default algorithm (Ed25519).
    pub fn generate() -> Self {
        PrivateKey::Ed25519(SigningKey::generate(&mut OsRng))
    }

    /// Sign the given data and return the raw signature bytes.
    pub fn sign(&self, data: &[u8]) -> Vec<u8> {
        match self {
            PrivateKey::Ed25519(key) => {
                let signature: Signature = key.sign(data);
                signature.to_bytes().to_vec()
            }
        }
    }

    /// Derive the corresponding public key.
    pub fn public_key(&self) -> PublicKey {
        match self {
            PrivateKey::Ed25519(key) => PublicKey::Ed25519(key.verifying_key()),
        }
    }

    pub fn algorithm(&self) -> &'static str {
        match self {
            PrivateKey::Ed25519(_) => ED25519_PREFIX,
        }
    }

    /// Export the raw key bytes for encryption or plain storage.
    pub(crate) fn to_bytes(&self) -> Zeroizing<Vec<u8>> {
        match self {
            PrivateKey::Ed25519(key) => Zeroizing::new(key.to_bytes().to_vec()),
        }
    }

    /// Reconstruct a private key from raw bytes and an algorithm identifier.
    pub(crate) fn from_bytes(algorithm: &str, bytes: &[u8]) -> std::result::Result<Self, CryptoError> {
        match algorithm {
            ED25519_PREFIX => {
                let key_array: [u8; ED25519_PRIVATE_KEY_SIZE] =
                    bytes.try_into().map_err(|_| CryptoError::InvalidKeyFormat {
                        reason: format!(
                            "Ed25519 private key must be {ED25519_PRIVATE_KEY_SIZE} bytes, got {}",
                            bytes.len()
                        ),
                    })?;
                Ok(PrivateKey::Ed25519(SigningKey::from_bytes(&key_array)))
            }
            _ => Err(CryptoError::InvalidKeyFormat {
                reason: format!("Unknown key algorithm: {algorithm}"),
            }),
        }
    }

    /// Format the private key as a prefixed string (e.g. `"ed25519:base64..."`).
    pub fn to_prefixed_string(&self) -> Zeroizing<String> {
        let bytes = self.to_bytes();
        let encoded = Base64::encode_string(&bytes);
        Zeroizing::new(format!("{}:{encoded}", self.algorithm()))
    }

    /// Parse a private key from a prefixed string.
    pub fn from_prefixed_string(s: &str) -> std::result::Result<Self, CryptoError> {
        let (prefix, key_data) = s
            .split_once(':')
            .ok_or_else(|| CryptoError::InvalidKeyFormat {
                reason: "Expected 'algorithm:key' format".to_string(),
            })?;
        let key_bytes = Zeroizing::new(Base64::decode_vec(key_data).map_err(|e| {
            CryptoError::InvalidKeyFormat {
                reason: format!("Invalid base64 for key: {e}"),
            }
        })?);
        Self::from_bytes(prefix, &key_bytes)
    }
}

/// **Invariant:** all inner key types must implement [`ZeroizeOnDrop`].
impl ZeroizeOnDrop for PrivateKey {}

impl Serialize for PrivateKey {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_prefixed_string())
    }
}

impl<'de> Deserialize<'de> for PrivateKey {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = Zeroizing::new(String::deserialize(deserializer)?);
        PrivateKey::from_prefixed_string(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Serialize)]
    struct Body<'a> {
        nick: &'a str,
        date: i64,
    }

    #[test]
    fn sign_then_verify_round_trip() {
        let key = PrivateKey::generate();
        let body = Body {
            nick: "alice",
            date: 42,
        };
        let data = sign_canonical(&key, SignatureVersion::CURRENT, &body).unwrap();
        verify_canonical(
            &key.public_key(),
            SignatureVersion::CURRENT,
            &data,
            &body,
            || "body".into(),
        )
        .unwrap();
    }

    #[test]
    fn tampered_bytes_and_foreign_keys_fail() {
        let key = PrivateKey::generate();
        let other = PrivateKey::generate();
        let message = b"statement content".to_vec();
        let signature = key.sign(&message);

        assert!(key.public_key().verify(&message, &signature));
        assert!(!other.public_key().verify(&message, &signature));

        for i in 0..message.len() {
            let mut flipped = message.clone();
            flipped[i] ^= 0x01;
            assert!(!key.public_key().verify(&flipped, &signature));
        }
        assert!(!key.public_key().verify(&message, &signature[..10]));
    }

    #[test]
    fn unsupported_version_fails_before_signing() {
        let key = PrivateKey::generate();
        let body = Body { nick: "x", date: 1 };
        let err = sign_canonical(&key, SignatureVersion(7), &body).unwrap_err();
        assert!(err.is_signature_error());

        let data = sign_canonical(&key, SignatureVersion::CURRENT, &body).unwrap();
        let err = verify_canonical(&key.public_key(), SignatureVersion(7), &data, &body, || {
            "body".into()
        })
        .unwrap_err();
        assert!(matches!(
            err,
            crate::Error::Crypto(CryptoError::UnsupportedSignatureVersion { version: 7 })
        ));
    }

    #[test]
    fn signature_uuid_is_stable() {
        let data = SignatureData::new(vec![1, 2, 3]);
        assert_eq!(data.uuid(), SignatureData::new(vec![1, 2, 3]).uuid());
        assert_ne!(data.uuid(), SignatureData::new(vec![1, 2, 4]).uuid());
    }

    #[test]
    fn keys_round_trip_through_strings() {
        let key = PrivateKey::generate();
        let parsed = PrivateKey::from_prefixed_string(&key.to_prefixed_string()).unwrap();
        assert_eq!(parsed.public_key(), key.public_key());

        let public = key.public_key();
        let text = public.to_prefixed_string();
        assert!(text.starts_with("ed25519:"));
        assert_eq!(PublicKey::from_prefixed_string(&text).unwrap(), public);
        assert!(PublicKey::from_prefixed_string("rsa:AAAA").is_err());
    }
}
