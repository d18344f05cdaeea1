//! Signatories: the cryptographic identities behind persons and authorizers.
//!
//! A [`Signatory`] is a UUID bound to a public key and can only verify. A
//! [`PrivateSignatory`] additionally holds a usable private key and can sign.
//! The private key is persisted either as-is ([`KeyStorage::Plain`]) or encrypted
//! under the manager's secret passphrase ([`KeyStorage::Encrypted`]).

use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use crate::backend::{BackendError, BackendTransaction, SignatoryStore};
use crate::crypto::{
    self, CryptoError, PrivateKey, PublicKey, SignatureData, SignatureVersion, secret,
};
use crate::{Result, Transaction};

/// How a private key is persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum KeyStorage {
    /// Stored unencrypted.
    #[default]
    Plain,
    /// Encrypted under the manager's secret passphrase.
    Encrypted,
}

/// Persisted private key material.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum StoredPrivateKey {
    Plain {
        private_key: PrivateKey,
    },
    Encrypted {
        algorithm: String,
        salt: String,
        #[serde(with = "serde_bytes")]
        nonce: Vec<u8>,
        #[serde(with = "serde_bytes")]
        ciphertext: Vec<u8>,
    },
}

impl StoredPrivateKey {
    pub fn storage(&self) -> KeyStorage {
        match self {
            StoredPrivateKey::Plain { .. } => KeyStorage::Plain,
            StoredPrivateKey::Encrypted { .. } => KeyStorage::Encrypted,
        }
    }
}

/// The stored form of a signatory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignatoryRecord {
    pub uuid: Uuid,
    pub public_key: PublicKey,
    pub private_key: Option<StoredPrivateKey>,
}

impl SignatoryRecord {
    pub fn has_private_key(&self) -> bool {
        self.private_key.is_some()
    }
}

/// A public cryptographic identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Signatory {
    pub uuid: Uuid,
    pub public_key: PublicKey,
}

impl Signatory {
    /// Verify raw signature bytes over `bytes`.
    pub fn verify(&self, data: &SignatureData, bytes: &[u8]) -> bool {
        self.public_key.verify(bytes, data.as_bytes())
    }

    /// Verify a signature over the canonical encoding of `body`.
    pub fn verify_canonical<T: Serialize>(
        &self,
        version: SignatureVersion,
        data: &SignatureData,
        body: &T,
        subject: impl FnOnce() -> String,
    ) -> Result<()> {
        crypto::verify_canonical(&self.public_key, version, data, body, subject)
    }

    pub fn get(txn: &dyn BackendTransaction, uuid: Uuid) -> Result<Option<Signatory>> {
        Ok(txn.get_signatory(uuid)?.map(|record| Signatory {
            uuid: record.uuid,
            public_key: record.public_key,
        }))
    }

    /// Load a signatory or fail with `SignatoryNotFound`.
    pub fn load(txn: &dyn BackendTransaction, uuid: Uuid) -> Result<Signatory> {
        Self::get(txn, uuid)?.ok_or_else(|| BackendError::SignatoryNotFound { uuid }.into())
    }

    /// Store a public-only signatory unless one with the same UUID exists.
    ///
    /// Returns whether the signatory was new. A stored signatory with a different
    /// public key fails with `KeyMismatch` and is left untouched.
    pub fn register(txn: &mut dyn BackendTransaction, signatory: &Signatory) -> Result<bool> {
        if let Some(local) = txn.get_signatory(signatory.uuid)? {
            if local.public_key != signatory.public_key {
                return Err(CryptoError::KeyMismatch {
                    signatory: signatory.uuid,
                }
                .into());
            }
            return Ok(false);
        }
        txn.put_signatory_no_overwrite(SignatoryRecord {
            uuid: signatory.uuid,
            public_key: signatory.public_key.clone(),
            private_key: None,
        })
    }

    /// Whether private key material for `uuid` is stored locally.
    pub fn is_private(txn: &dyn BackendTransaction, uuid: Uuid) -> Result<bool> {
        Ok(txn
            .get_signatory(uuid)?
            .is_some_and(|record| record.has_private_key()))
    }
}

/// A signatory with a usable private key.
#[derive(Debug, Clone)]
pub struct PrivateSignatory {
    signatory: Signatory,
    private_key: PrivateKey,
}

impl PrivateSignatory {
    /// Generate a new key pair and persist it with the requested storage.
    pub fn generate(txn: &mut Transaction<'_>, storage: KeyStorage) -> Result<Self> {
        let private_key = PrivateKey::generate();
        let signatory = Signatory {
            uuid: Uuid::new_v4(),
            public_key: private_key.public_key(),
        };
        let private = Self {
            signatory,
            private_key,
        };
        let stored = private.store_key(txn, storage)?;
        txn.put_signatory(SignatoryRecord {
            uuid: private.signatory.uuid,
            public_key: private.signatory.public_key.clone(),
            private_key: Some(stored),
        })?;
        debug!(signatory = %private.uuid(), ?storage, "Generated signatory");
        Ok(private)
    }

    /// Load a private signatory.
    ///
    /// Fails with `NoPrivateKey` when only the public key is stored, with
    /// `NoSecret` when the key is encrypted and no passphrase is loaded, and with
    /// `DecryptionFailed` when the loaded passphrase is wrong.
    pub fn load(txn: &Transaction<'_>, uuid: Uuid) -> Result<Self> {
        let record = txn
            .get_signatory(uuid)?
            .ok_or(BackendError::SignatoryNotFound { uuid })?;
        let Some(stored) = &record.private_key else {
            return Err(CryptoError::NoPrivateKey { signatory: uuid }.into());
        };
        let private_key = match stored {
            StoredPrivateKey::Plain { private_key } => private_key.clone(),
            StoredPrivateKey::Encrypted {
                algorithm,
                salt,
                nonce,
                ciphertext,
            } => {
                let key = txn
                    .manager()
                    .secrets()
                    .key_for_salt(salt)?
                    .ok_or(CryptoError::NoSecret { signatory: uuid })?;
                secret::decrypt_private_key(algorithm, ciphertext, nonce, &key)?
            }
        };
        if private_key.public_key() != record.public_key {
            return Err(CryptoError::InvalidKeyFormat {
                reason: format!("Private key of signatory {uuid} does not match its public key"),
            }
            .into());
        }
        Ok(Self {
            signatory: Signatory {
                uuid,
                public_key: record.public_key,
            },
            private_key,
        })
    }

    /// Load a private signatory if its key is locally usable.
    ///
    /// Missing signatories, public-only signatories and encrypted signatories
    /// without a loaded passphrase yield `None`.
    pub fn try_load(txn: &Transaction<'_>, uuid: Uuid) -> Result<Option<Self>> {
        match Self::load(txn, uuid) {
            Ok(private) => Ok(Some(private)),
            Err(err) if err.is_missing_private_data() || err.is_not_found() => Ok(None),
            Err(err) => Err(err),
        }
    }

    /// Re-persist the private key with a different storage.
    pub fn set_storage(&self, txn: &mut Transaction<'_>, storage: KeyStorage) -> Result<()> {
        let stored = self.store_key(txn, storage)?;
        txn.put_signatory(SignatoryRecord {
            uuid: self.signatory.uuid,
            public_key: self.signatory.public_key.clone(),
            private_key: Some(stored),
        })?;
        debug!(signatory = %self.uuid(), ?storage, "Changed signatory key storage");
        Ok(())
    }

    fn store_key(&self, txn: &Transaction<'_>, storage: KeyStorage) -> Result<StoredPrivateKey> {
        match storage {
            KeyStorage::Plain => Ok(StoredPrivateKey::Plain {
                private_key: self.private_key.clone(),
            }),
            KeyStorage::Encrypted => {
                let salt = secret::generate_salt();
                let key = txn
                    .manager()
                    .secrets()
                    .key_for_salt(&salt)?
                    .ok_or(CryptoError::NoSecret {
                        signatory: self.signatory.uuid,
                    })?;
                let (ciphertext, nonce) = secret::encrypt_private_key(&self.private_key, &key)?;
                Ok(StoredPrivateKey::Encrypted {
                    algorithm: self.private_key.algorithm().to_string(),
                    salt,
                    nonce,
                    ciphertext,
                })
            }
        }
    }

    pub fn uuid(&self) -> Uuid {
        self.signatory.uuid
    }

    pub fn signatory(&self) -> &Signatory {
        &self.signatory
    }

    /// Sign raw bytes.
    pub fn sign(&self, bytes: &[u8]) -> SignatureData {
        SignatureData::new(self.private_key.sign(bytes))
    }

    /// Sign the canonical encoding of `body`.
    pub fn sign_canonical<T: Serialize>(
        &self,
        version: SignatureVersion,
        body: &T,
    ) -> Result<SignatureData> {
        crypto::sign_canonical(&self.private_key, version, body)
    }
}
