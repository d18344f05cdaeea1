//! Signature request error types.

use thiserror::Error;
use uuid::Uuid;

use crate::Error;

/// Errors from building, packing and unpacking signature requests.
///
/// # Stability
///
/// - New variants may be added in minor versions (enum is `#[non_exhaustive]`)
/// - Helper methods like `is_*()` provide stable APIs
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum RequestError {
    #[error("Signature request not found: {uuid}")]
    RequestNotFound { uuid: Uuid },

    /// Packed bytes or the transport envelope could not be decoded.
    #[error("Malformed packed signature request: {reason}")]
    MalformedPackedData { reason: String },

    /// The context path does not resolve to a chain of contexts.
    #[error("Inconsistent context path: {reason}")]
    ContextPathInconsistent { reason: String },

    /// A recorded dependency is not one of the path contexts.
    #[error("Dependency {uuid} does not lie on the context path")]
    DependencyOffPath { uuid: Uuid },

    /// Requested statements must lie inside the request's context.
    #[error("Statement {statement} is not inside context {context}")]
    StatementOutsideContext { statement: Uuid, context: Uuid },
}

impl RequestError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, RequestError::RequestNotFound { .. })
    }

    /// Check if this error is a decoding failure of packed or request data.
    pub fn is_decoding_error(&self) -> bool {
        matches!(
            self,
            RequestError::MalformedPackedData { .. }
                | RequestError::ContextPathInconsistent { .. }
                | RequestError::DependencyOffPath { .. }
        )
    }

    pub(crate) fn malformed(reason: impl Into<String>) -> Self {
        RequestError::MalformedPackedData {
            reason: reason.into(),
        }
    }
}

impl From<RequestError> for Error {
    fn from(err: RequestError) -> Self {
        Error::Request(err)
    }
}
