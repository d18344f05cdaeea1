//! Passphrase-protected private key storage.
//!
//! Encrypted signatories store their private key under AES-256-GCM with a key
//! derived by Argon2id from the manager's secret passphrase and a per-signatory
//! salt. The passphrase lives in a [`SecretKeyRing`] owned by the
//! [`PersistenceManager`](crate::PersistenceManager); derived keys are cached per
//! salt so repeated signing does not pay the derivation cost every time.

use std::collections::HashMap;
use std::sync::{Mutex, RwLock};

use aes_gcm::{
    Aes256Gcm, KeyInit, Nonce,
    aead::{Aead, AeadCore, OsRng},
};
use argon2::{
    Argon2,
    password_hash::{SaltString, rand_core},
};
use zeroize::Zeroizing;

use super::{CryptoError, PrivateKey};

/// Salt string length for Argon2 (base64 encoded, 22 chars)
pub const SALT_LENGTH: usize = 22;

/// Nonce length for AES-GCM (12 bytes standard)
pub const NONCE_LENGTH: usize = 12;

/// Derived key length for AES-256 (32 bytes)
pub const KEY_LENGTH: usize = 32;

/// Generate a fresh salt for key derivation.
pub fn generate_salt() -> String {
    SaltString::generate(&mut rand_core::OsRng)
        .as_str()
        .to_string()
}

/// Derive an encryption key from a passphrase and salt using Argon2id.
pub fn derive_encryption_key(
    passphrase: &str,
    salt: &str,
) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
    if salt.len() != SALT_LENGTH {
        return Err(CryptoError::EncryptionFailed {
            reason: format!(
                "Invalid salt length: expected {SALT_LENGTH}, got {}",
                salt.len()
            ),
        });
    }

    let mut key = Zeroizing::new(vec![0u8; KEY_LENGTH]);
    Argon2::default()
        .hash_password_into(passphrase.as_bytes(), salt.as_bytes(), &mut key)
        .map_err(|e| CryptoError::EncryptionFailed {
            reason: format!("Key derivation failed: {e}"),
        })?;
    Ok(key)
}

/// Encrypt a private key, returning `(ciphertext, nonce)`.
pub fn encrypt_private_key(
    private_key: &PrivateKey,
    encryption_key: &[u8],
) -> Result<(Vec<u8>, Vec<u8>), CryptoError> {
    let cipher =
        Aes256Gcm::new_from_slice(encryption_key).map_err(|e| CryptoError::EncryptionFailed {
            reason: format!("Failed to create cipher: {e}"),
        })?;
    let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
    let key_bytes = private_key.to_bytes();
    let ciphertext =
        cipher
            .encrypt(&nonce, key_bytes.as_slice())
            .map_err(|e| CryptoError::EncryptionFailed {
                reason: format!("Encryption failed: {e}"),
            })?;
    Ok((ciphertext, nonce.to_vec()))
}

/// Decrypt a private key of the given algorithm.
pub fn decrypt_private_key(
    algorithm: &str,
    ciphertext: &[u8],
    nonce: &[u8],
    encryption_key: &[u8],
) -> Result<PrivateKey, CryptoError> {
    if nonce.len() != NONCE_LENGTH {
        return Err(CryptoError::DecryptionFailed {
            reason: format!(
                "Invalid nonce length: expected {NONCE_LENGTH}, got {}",
                nonce.len()
            ),
        });
    }
    let cipher =
        Aes256Gcm::new_from_slice(encryption_key).map_err(|e| CryptoError::DecryptionFailed {
            reason: format!("Failed to create cipher: {e}"),
        })?;
    let plaintext = Zeroizing::new(
        cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|e| CryptoError::DecryptionFailed {
                reason: format!("Decryption failed: {e}"),
            })?,
    );
    PrivateKey::from_bytes(algorithm, &plaintext)
}

/// Holder of the secret passphrase used for encrypted signatories.
///
/// There is no process-wide instance: each manager owns one.
#[derive(Default)]
pub struct SecretKeyRing {
    passphrase: RwLock<Option<Zeroizing<String>>>,
    derived: Mutex<HashMap<String, Zeroizing<Vec<u8>>>>,
}

impl std::fmt::Debug for SecretKeyRing {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecretKeyRing")
            .field("unlocked", &self.has_secret())
            .finish()
    }
}

impl SecretKeyRing {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load the secret passphrase, dropping any keys derived from a previous one.
    pub fn set_passphrase(&self, passphrase: impl Into<String>) {
        *self.passphrase.write().unwrap_or_else(|e| e.into_inner()) =
            Some(Zeroizing::new(passphrase.into()));
        self.derived.lock().unwrap_or_else(|e| e.into_inner()).clear();
    }

    /// Forget the passphrase and every derived key.
    pub fn clear(&self) {
        *self.passphrase.write().unwrap_or_else(|e| e.into_inner()) = None;
        self.derived.lock().unwrap_or_else(|e| e.into_inner()).clear();
    }

    pub fn has_secret(&self) -> bool {
        self.passphrase
            .read()
            .map(|p| p.is_some())
            .unwrap_or(false)
    }

    /// Derived encryption key for `salt`, or `None` when no passphrase is loaded.
    pub(crate) fn key_for_salt(
        &self,
        salt: &str,
    ) -> Result<Option<Zeroizing<Vec<u8>>>, CryptoError> {
        let passphrase = self.passphrase.read().unwrap_or_else(|e| e.into_inner());
        let Some(passphrase) = passphrase.as_ref() else {
            return Ok(None);
        };
        let mut derived = self.derived.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(key) = derived.get(salt) {
            return Ok(Some(key.clone()));
        }
        let key = derive_encryption_key(passphrase, salt)?;
        derived.insert(salt.to_string(), key.clone());
        Ok(Some(key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_encryption_round_trip() {
        let key = PrivateKey::generate();
        let salt = generate_salt();
        let encryption_key = derive_encryption_key("passphrase", &salt).unwrap();

        let (ciphertext, nonce) = encrypt_private_key(&key, &encryption_key).unwrap();
        let decrypted = decrypt_private_key("ed25519", &ciphertext, &nonce, &encryption_key).unwrap();
        assert_eq!(decrypted.public_key(), key.public_key());
    }

    #[test]
    fn test_wrong_passphrase_fails() {
        let key = PrivateKey::generate();
        let salt = generate_salt();
        let right = derive_encryption_key("right", &salt).unwrap();
        let wrong = derive_encryption_key("wrong", &salt).unwrap();

        let (ciphertext, nonce) = encrypt_private_key(&key, &right).unwrap();
        let err = decrypt_private_key("ed25519", &ciphertext, &nonce, &wrong).unwrap_err();
        assert!(matches!(err, CryptoError::DecryptionFailed { .. }));
    }

    #[test]
    fn key_ring_without_passphrase_yields_none() {
        let ring = SecretKeyRing::new();
        assert!(!ring.has_secret());
        assert!(ring.key_for_salt(&generate_salt()).unwrap().is_none());

        ring.set_passphrase("secret");
        let salt = generate_salt();
        let a = ring.key_for_salt(&salt).unwrap().unwrap();
        let b = ring.key_for_salt(&salt).unwrap().unwrap();
        assert_eq!(a.as_slice(), b.as_slice());

        ring.clear();
        assert!(ring.key_for_salt(&salt).unwrap().is_none());
    }
}
