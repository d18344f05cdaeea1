//! Persistence error types.

use thiserror::Error;
use uuid::Uuid;

use crate::{Error, Namespace};

/// Errors raised by the persistence collaborator.
///
/// # Stability
///
/// - New variants may be added in minor versions (enum is `#[non_exhaustive]`)
/// - Helper methods like `is_*()` provide stable APIs
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum BackendError {
    /// Statement not found by UUID.
    #[error("Statement not found: {uuid}")]
    StatementNotFound {
        /// The missing statement
        uuid: Uuid,
    },

    /// Signatory not found by UUID.
    #[error("Signatory not found: {uuid}")]
    SignatoryNotFound {
        /// The missing signatory
        uuid: Uuid,
    },

    /// Delegate tree node not found.
    #[error("Delegate tree node not found: {statement_uuid} '{prefix}'")]
    DelegateNodeNotFound {
        /// Statement owning the tree
        statement_uuid: Uuid,
        /// Node prefix
        prefix: Namespace,
    },

    /// Another transaction committed since this one started.
    #[error("Transaction conflict: store changed since the transaction began")]
    TransactionConflict,

    /// The transaction was already committed or discarded.
    #[error("Transaction is no longer active")]
    TransactionClosed,

    /// File I/O error while persisting the store.
    #[error("File I/O error")]
    FileIo {
        /// The underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// Persisted store could not be decoded.
    #[error("Deserialization failed")]
    DeserializationFailed {
        /// The underlying deserialization error
        #[source]
        source: serde_json::Error,
    },

    /// Persisted store could not be encoded.
    #[error("Serialization failed")]
    SerializationFailed {
        /// The underlying serialization error
        #[source]
        source: serde_json::Error,
    },
}

impl BackendError {
    /// Check if this error indicates an entity was not found.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            BackendError::StatementNotFound { .. }
                | BackendError::SignatoryNotFound { .. }
                | BackendError::DelegateNodeNotFound { .. }
        )
    }

    /// Check if the transaction lost a race against another commit.
    pub fn is_conflict(&self) -> bool {
        matches!(self, BackendError::TransactionConflict)
    }

    /// Check if this error is I/O related.
    pub fn is_io_error(&self) -> bool {
        matches!(self, BackendError::FileIo { .. })
    }
}

impl From<BackendError> for Error {
    fn from(err: BackendError) -> Self {
        Error::Backend(err)
    }
}
