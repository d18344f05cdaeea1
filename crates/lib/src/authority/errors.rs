//! Statement authority error types.

use thiserror::Error;
use uuid::Uuid;

use crate::Error;

/// Errors from statement authority operations.
///
/// # Stability
///
/// - New variants may be added in minor versions (enum is `#[non_exhaustive]`)
/// - Helper methods like `is_*()` provide stable APIs
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum AuthorityError {
    /// No authority exists for the statement.
    #[error("Statement {uuid} has no authority")]
    AuthorityNotFound { uuid: Uuid },

    /// The statement already has an authority.
    #[error("Statement {uuid} is already authored")]
    StatementAlreadyAuthored { uuid: Uuid },

    /// A statement can only be authored inside an authored context.
    #[error("Context {context} of statement {statement} is not authored")]
    ParentContextUnauthored { statement: Uuid, context: Uuid },

    /// Unpacked signature requests still reference the statement.
    #[error("Statement {uuid} is referenced by {} pending signature request(s)", requests.len())]
    PendingSignatureRequests { uuid: Uuid, requests: Vec<Uuid> },

    /// No signature by the authorizer exists on the statement.
    #[error("No signature by {authorizer} on statement {statement}")]
    SignatureNotFound { statement: Uuid, authorizer: Uuid },
}

impl AuthorityError {
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            AuthorityError::AuthorityNotFound { .. } | AuthorityError::SignatureNotFound { .. }
        )
    }

    /// Check if this error is a creation conflict.
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            AuthorityError::StatementAlreadyAuthored { .. }
                | AuthorityError::ParentContextUnauthored { .. }
        )
    }

    pub fn is_deletion_conflict(&self) -> bool {
        matches!(self, AuthorityError::PendingSignatureRequests { .. })
    }
}

impl From<AuthorityError> for Error {
    fn from(err: AuthorityError) -> Self {
        Error::Authority(err)
    }
}
