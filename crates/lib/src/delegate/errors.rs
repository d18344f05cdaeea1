//! Delegate tree error types.

use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

use crate::{Error, Namespace};

/// Errors from delegate tree, successor chain and authorizer operations.
///
/// # Stability
///
/// - New variants may be added in minor versions (enum is `#[non_exhaustive]`)
/// - Helper methods like `is_*()` provide stable APIs
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum DelegateError {
    /// A node still has children or authorizers.
    #[error("Delegate tree node {statement_uuid} '{prefix}' is not empty")]
    NodeNotEmpty {
        statement_uuid: Uuid,
        prefix: Namespace,
    },

    #[error("Delegate authorizer not found: {statement_uuid} '{prefix}' {delegate_uuid}")]
    AuthorizerNotFound {
        statement_uuid: Uuid,
        prefix: Namespace,
        delegate_uuid: Uuid,
    },

    /// The successor is already in the chain or is the author.
    #[error("Successor {successor_uuid} already appears in the chain of {statement_uuid}")]
    DuplicateSuccessor {
        statement_uuid: Uuid,
        successor_uuid: Uuid,
    },

    /// The entry date does not strictly follow the previous entry (or the
    /// authority creation date for the first entry).
    #[error("Successor date {date} does not follow previous date {previous}")]
    SuccessorDateNotIncreasing {
        date: DateTime<Utc>,
        previous: DateTime<Utc>,
    },

    #[error("Successor index {index} out of range for chain of length {len}")]
    SuccessorIndexOutOfRange { index: usize, len: usize },
}

impl DelegateError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, DelegateError::AuthorizerNotFound { .. })
    }

    /// Check if this error is a successor chain consistency failure.
    pub fn is_chain_error(&self) -> bool {
        matches!(
            self,
            DelegateError::DuplicateSuccessor { .. }
                | DelegateError::SuccessorDateNotIncreasing { .. }
                | DelegateError::SuccessorIndexOutOfRange { .. }
        )
    }

    pub fn is_deletion_conflict(&self) -> bool {
        matches!(self, DelegateError::NodeNotEmpty { .. })
    }
}

impl From<DelegateError> for Error {
    fn from(err: DelegateError) -> Self {
        Error::Delegate(err)
    }
}
