//!
//! Aletheia authority: the trust layer of the Aletheia proof-assistant document model.
//! This library lets authors sign the statements they own, delegate signing rights over
//! namespaces of a context, and keeps "is this still validly signed" status consistent
//! across the statement dependency graph.
//!
//! ## Core Concepts
//!
//! * **Signatories (`signatory::Signatory`)**: Cryptographic identities. A `PrivateSignatory`
//!   additionally holds a usable private key, stored in the clear or encrypted under the
//!   manager's secret passphrase.
//! * **Persons (`person::Person`)**: Named identities bound 1:1 to a signatory, signed for
//!   integrity and garbage collected once orphaned.
//! * **Authorities (`authority::StatementAuthority`)**: Authorship records of statements,
//!   carrying independent signatures and the derived `valid_signature`,
//!   `signed_dependencies` and `signed_proof` flags.
//! * **Delegate trees (`delegate::DelegateTreeNode`)**: Namespace-prefixed trees describing
//!   who may sign on behalf of a context's author, with a successor chain transferring root
//!   signing authority over time.
//! * **Signature requests (`request`)**: Bundles of the data an offline co-signer needs,
//!   packed into a compressed transport format and rehydrated on the remote end.
//! * **Backends (`backend::Backend`)**: The persistence collaborator. All mutation happens
//!   inside a [`Transaction`] obtained from the [`PersistenceManager`].

pub mod authority;
pub mod backend;
pub mod clock;
pub mod config;
pub mod constants;
pub mod crypto;
pub mod delegate;
pub mod events;
pub mod manager;
pub mod namespace;
pub mod person;
pub mod request;
pub mod signatory;
pub mod statement;

pub use clock::{Clock, FixedClock, SystemClock};
pub use config::AuthorityConfig;
pub use manager::{PersistenceManager, Transaction};
pub use namespace::Namespace;
pub use statement::{Statement, StatementKind};

/// Result type used throughout the library.
pub type Result<T> = std::result::Result<T, Error>;

/// Common error type for the library.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    /// Structured signature and key errors from the crypto module
    #[error(transparent)]
    Crypto(crypto::CryptoError),

    /// Structured persistence errors from the backend module
    #[error(transparent)]
    Backend(backend::BackendError),

    /// Structured person errors from the person module
    #[error(transparent)]
    Person(person::PersonError),

    /// Structured authority errors from the authority module
    #[error(transparent)]
    Authority(authority::AuthorityError),

    /// Structured delegate tree errors from the delegate module
    #[error(transparent)]
    Delegate(delegate::DelegateError),

    /// Structured signature request errors from the request module
    #[error(transparent)]
    Request(request::RequestError),

    /// Invalid configuration values
    #[error(transparent)]
    Config(config::ConfigError),
}

impl Error {
    /// Get the originating module for this error.
    pub fn module(&self) -> &'static str {
        match self {
            Error::Crypto(_) => "crypto",
            Error::Backend(_) => "backend",
            Error::Person(_) => "person",
            Error::Authority(_) => "authority",
            Error::Delegate(_) => "delegate",
            Error::Request(_) => "request",
            Error::Config(_) => "config",
            Error::Io(_) => "io",
            Error::Serialize(_) => "serialize",
        }
    }

    /// Check if this error indicates a resource was not found.
    pub fn is_not_found(&self) -> bool {
        match self {
            Error::Backend(err) => err.is_not_found(),
            Error::Person(err) => err.is_not_found(),
            Error::Authority(err) => err.is_not_found(),
            Error::Delegate(err) => err.is_not_found(),
            Error::Request(err) => err.is_not_found(),
            _ => false,
        }
    }

    /// Check if this error is a signature failure (mismatch, unsupported version, incomplete data).
    pub fn is_signature_error(&self) -> bool {
        match self {
            Error::Crypto(err) => err.is_signature_error(),
            _ => false,
        }
    }

    /// Check if the operation failed because private key material is not available.
    ///
    /// Callers can use this to prompt for a passphrase or a different identity.
    pub fn is_missing_private_data(&self) -> bool {
        match self {
            Error::Crypto(err) => err.is_missing_private_data(),
            _ => false,
        }
    }

    /// Check if this error is a successor chain consistency failure.
    pub fn is_chain_error(&self) -> bool {
        match self {
            Error::Delegate(err) => err.is_chain_error(),
            _ => false,
        }
    }

    /// Check if this error indicates a creation conflict.
    pub fn is_conflict(&self) -> bool {
        match self {
            Error::Person(err) => err.is_conflict(),
            Error::Authority(err) => err.is_conflict(),
            Error::Backend(err) => err.is_conflict(),
            _ => false,
        }
    }

    /// Check if this error indicates a deletion was refused.
    pub fn is_deletion_conflict(&self) -> bool {
        match self {
            Error::Authority(err) => err.is_deletion_conflict(),
            Error::Delegate(err) => err.is_deletion_conflict(),
            Error::Person(err) => err.is_deletion_conflict(),
            _ => false,
        }
    }

    /// Check if this error is a decoding failure of packed or request data.
    pub fn is_decoding_error(&self) -> bool {
        match self {
            Error::Request(err) => err.is_decoding_error(),
            _ => false,
        }
    }

    /// Check if this error is I/O related.
    pub fn is_io_error(&self) -> bool {
        match self {
            Error::Io(_) => true,
            Error::Backend(err) => err.is_io_error(),
            _ => false,
        }
    }
}
