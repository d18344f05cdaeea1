//! Cryptographic error types.
//!
//! Signature failures, missing private material and key-format problems are kept
//! apart so callers can react differently: a verification mismatch means the data
//! is wrong, while `NoPrivateKey`/`NoSecret` mean the caller should supply another
//! identity or unlock the key ring.

use thiserror::Error as ThisError;
use uuid::Uuid;

use crate::Error;

/// Errors that can occur while signing, verifying or handling key material.
///
/// # Stability
///
/// - New variants may be added in minor versions (enum is `#[non_exhaustive]`)
/// - Helper methods like `is_*()` provide stable APIs
#[non_exhaustive]
#[derive(Debug, ThisError)]
pub enum CryptoError {
    /// Invalid key format or parsing error.
    #[error("Invalid key format: {reason}")]
    InvalidKeyFormat {
        /// Description of why the key format is invalid
        reason: String,
    },

    /// Key parsing failed due to cryptographic library error.
    #[error("Key parsing failed: {reason}")]
    KeyParsingFailed {
        /// Description of the parsing failure
        reason: String,
    },

    /// Signature bytes do not verify against the canonical data.
    #[error("Signature verification failed for {subject}")]
    VerificationFailed {
        /// What was being verified
        subject: String,
    },

    /// The signature version is not supported by this implementation.
    #[error("Unsupported signature version: {version}")]
    UnsupportedSignatureVersion {
        /// The rejected version
        version: u16,
    },

    /// Signable data is missing fields required to produce or check a signature.
    #[error("Incomplete signable data: {reason}")]
    IncompleteSignable {
        /// What is missing
        reason: String,
    },

    /// A signatory arrived with a public key other than the one stored for its UUID.
    #[error("Public key of signatory {signatory} does not match the stored key")]
    KeyMismatch {
        /// The signatory UUID
        signatory: Uuid,
    },

    /// No private key material is available for the required signer.
    #[error("No private key available for signatory {signatory}")]
    NoPrivateKey {
        /// The signatory whose private key is missing
        signatory: Uuid,
    },

    /// The private key is encrypted and no secret passphrase is loaded.
    #[error("No secret available to decrypt signatory {signatory}")]
    NoSecret {
        /// The encrypted signatory
        signatory: Uuid,
    },

    /// Decrypting key material failed (typically a wrong passphrase).
    #[error("Decryption failed: {reason}")]
    DecryptionFailed {
        /// Description of the failure
        reason: String,
    },

    /// Encrypting key material failed.
    #[error("Encryption failed: {reason}")]
    EncryptionFailed {
        /// Description of the failure
        reason: String,
    },
}

impl CryptoError {
    /// Check if this error is a signature failure.
    pub fn is_signature_error(&self) -> bool {
        matches!(
            self,
            CryptoError::VerificationFailed { .. }
                | CryptoError::UnsupportedSignatureVersion { .. }
                | CryptoError::IncompleteSignable { .. }
                | CryptoError::KeyMismatch { .. }
        )
    }

    /// Check if this error means private key material is unavailable.
    pub fn is_missing_private_data(&self) -> bool {
        matches!(
            self,
            CryptoError::NoPrivateKey { .. } | CryptoError::NoSecret { .. }
        )
    }

    /// Check if this error is about a malformed key.
    pub fn is_key_format_error(&self) -> bool {
        matches!(
            self,
            CryptoError::InvalidKeyFormat { .. } | CryptoError::KeyParsingFailed { .. }
        )
    }
}

impl From<CryptoError> for Error {
    fn from(err: CryptoError) -> Self {
        Error::Crypto(err)
    }
}
