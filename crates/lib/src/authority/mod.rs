//! Statement authorities: authorship records, signatures and derived flags.
//!
//! A [`StatementAuthority`] names the author of a statement and carries any
//! number of [`StatementAuthoritySignature`]s, one per authorizer. Three flags
//! are derived from them:
//!
//! - `valid_signature`: at least one signature verifies and is authorized,
//! - `signed_dependencies`: `valid_signature` holds here and on every dependency,
//! - `signed_proof`: `signed_dependencies` holds, every dependency has a signed
//!   proof and, for contexts, some solver has a signed proof.
//!
//! `signed_proof ⟹ signed_dependencies ⟹ valid_signature` holds after every
//! operation. The flags are maintained incrementally by [`propagation`].

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

use crate::backend::{
    AuthorityStore, BackendTransaction, RequestStore, SignatureStore, StatementStore,
};
use crate::crypto::SignatureVersion;
use crate::delegate;
use crate::events::AuthorityEvent;
use crate::person::Person;
use crate::signatory::PrivateSignatory;
use crate::{Namespace, Result, Statement, Transaction, statement};

mod errors;
pub mod propagation;
mod signature;

pub use errors::AuthorityError;
pub(crate) use signature::AuthoritySignable;
pub use signature::StatementAuthoritySignature;

/// Authorship record of a statement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatementAuthority {
    pub statement_uuid: Uuid,
    pub context_uuid: Option<Uuid>,
    pub author_uuid: Uuid,
    pub creation_date: DateTime<Utc>,
    pub valid_signature: bool,
    pub signed_dependencies: bool,
    pub signed_proof: bool,
}

impl StatementAuthority {
    /// Author a statement.
    ///
    /// The statement projection is stored if the statement layer has not
    /// written it yet. Fails with `StatementAlreadyAuthored` or, when the
    /// enclosing context has no authority, `ParentContextUnauthored`.
    pub fn create(
        txn: &mut Transaction<'_>,
        statement: &Statement,
        author: &Person,
    ) -> Result<StatementAuthority> {
        if txn.get_authority(statement.uuid)?.is_some() {
            return Err(AuthorityError::StatementAlreadyAuthored {
                uuid: statement.uuid,
            }
            .into());
        }
        if let Some(context) = statement.context_uuid {
            if txn.get_authority(context)?.is_none() {
                return Err(AuthorityError::ParentContextUnauthored {
                    statement: statement.uuid,
                    context,
                }
                .into());
            }
        }
        txn.put_statement_no_overwrite(statement.clone())?;

        let authority = StatementAuthority {
            statement_uuid: statement.uuid,
            context_uuid: statement.context_uuid,
            author_uuid: author.uuid,
            creation_date: txn.now(),
            valid_signature: false,
            signed_dependencies: false,
            signed_proof: false,
        };
        txn.put_authority(authority.clone())?;
        debug!(statement = %statement.uuid, author = %author.uuid, "Created statement authority");
        Person::update_orphan_since(txn, author.uuid)?;
        Ok(authority)
    }

    pub fn get(txn: &dyn BackendTransaction, statement_uuid: Uuid) -> Result<Option<Self>> {
        txn.get_authority(statement_uuid)
    }

    /// Load an authority or fail with `AuthorityNotFound`.
    pub fn load(txn: &dyn BackendTransaction, statement_uuid: Uuid) -> Result<Self> {
        txn.get_authority(statement_uuid)?.ok_or_else(|| {
            AuthorityError::AuthorityNotFound {
                uuid: statement_uuid,
            }
            .into()
        })
    }

    /// Refresh this value from the store.
    pub fn reload(&mut self, txn: &dyn BackendTransaction) -> Result<()> {
        *self = Self::load(txn, self.statement_uuid)?;
        Ok(())
    }

    pub fn statement(&self, txn: &dyn BackendTransaction) -> Result<Statement> {
        statement::load(txn, self.statement_uuid)
    }

    /// Sign the statement as `authorizer`, replacing any previous signature by the
    /// same authorizer, then recheck validity.
    pub fn sign(
        &mut self,
        txn: &mut Transaction<'_>,
        authorizer: &PrivateSignatory,
    ) -> Result<StatementAuthoritySignature> {
        self.reload(&**txn)?;
        let statement = self.statement(&**txn)?;
        let signature_date = txn.now();
        let version = SignatureVersion::CURRENT;
        let signable = AuthoritySignable::new(&statement, self, signature_date);
        let signature_data = authorizer.sign_canonical(version, &signable)?;
        let signature = StatementAuthoritySignature {
            statement_uuid: self.statement_uuid,
            context_uuid: self.context_uuid,
            authorizer_uuid: authorizer.uuid(),
            signature_date,
            signature_version: version,
            signature_uuid: signature_data.uuid(),
            signature_data,
            valid: false,
        };
        txn.put_signature(signature.clone())?;
        debug!(
            statement = %self.statement_uuid,
            authorizer = %authorizer.uuid(),
            signature = %signature.signature_uuid,
            "Signed statement authority"
        );
        txn.emit(AuthorityEvent::SignatureAdded {
            statement_uuid: self.statement_uuid,
            authorizer_uuid: authorizer.uuid(),
        });
        check_valid_signature(txn, self.statement_uuid)?;
        self.reload(&**txn)?;
        txn.get_signature(self.statement_uuid, authorizer.uuid())?
            .ok_or_else(|| {
                AuthorityError::SignatureNotFound {
                    statement: self.statement_uuid,
                    authorizer: authorizer.uuid(),
                }
                .into()
            })
    }

    /// Remove the signature of `authorizer_uuid`, then recheck validity.
    pub fn delete_signature(
        &mut self,
        txn: &mut Transaction<'_>,
        authorizer_uuid: Uuid,
    ) -> Result<()> {
        if txn
            .get_signature(self.statement_uuid, authorizer_uuid)?
            .is_none()
        {
            return Err(AuthorityError::SignatureNotFound {
                statement: self.statement_uuid,
                authorizer: authorizer_uuid,
            }
            .into());
        }
        txn.delete_signature(self.statement_uuid, authorizer_uuid)?;
        debug!(statement = %self.statement_uuid, authorizer = %authorizer_uuid, "Deleted signature");
        txn.emit(AuthorityEvent::SignatureRemoved {
            statement_uuid: self.statement_uuid,
            authorizer_uuid,
        });
        check_valid_signature(txn, self.statement_uuid)?;
        self.reload(&**txn)
    }

    pub fn signatures(&self, txn: &dyn BackendTransaction) -> Result<Vec<StatementAuthoritySignature>> {
        txn.signatures_by_statement(self.statement_uuid)
    }

    /// Delete the authority of `statement_uuid`.
    ///
    /// Fails with `PendingSignatureRequests` while an unpacked signature request
    /// lists the statement (or, for contexts, a statement nested in it). Cascades
    /// to the authorities of nested statements, the delegate tree and the
    /// signatures.
    pub fn delete(txn: &mut Transaction<'_>, statement_uuid: Uuid) -> Result<()> {
        let authority = Self::load(&**txn, statement_uuid)?;
        check_no_pending_requests(&**txn, statement_uuid)?;

        for nested in txn.authorities_by_context(statement_uuid)? {
            Self::delete(txn, nested.statement_uuid)?;
        }
        if txn
            .get_delegate_node(statement_uuid, &Namespace::root())?
            .is_some()
        {
            delegate::delete_subtree(txn, statement_uuid, &Namespace::root())?;
        }
        for signature in txn.signatures_by_statement(statement_uuid)? {
            txn.delete_signature(statement_uuid, signature.authorizer_uuid)?;
        }
        txn.delete_authority(statement_uuid)?;
        info!(statement = %statement_uuid, "Deleted statement authority");
        txn.emit(AuthorityEvent::AuthorityDeleted { statement_uuid });
        Person::update_orphan_since(txn, authority.author_uuid)?;

        let statement = statement::load(&**txn, statement_uuid)?;
        propagation::authority_removed(txn, &statement, authority.signed_proof)
    }
}

fn check_no_pending_requests(txn: &dyn BackendTransaction, statement_uuid: Uuid) -> Result<()> {
    let requests = txn.requests_by_statement(statement_uuid)?;
    if !requests.is_empty() {
        return Err(AuthorityError::PendingSignatureRequests {
            uuid: statement_uuid,
            requests,
        }
        .into());
    }
    Ok(())
}

/// Recompute `valid_signature` of a statement from its current signatures.
///
/// Each signature's `valid` field is refreshed. When the flag changes, the
/// dependency flags are propagated. Returns the new flag value.
pub fn check_valid_signature(txn: &mut Transaction<'_>, statement_uuid: Uuid) -> Result<bool> {
    let mut authority = StatementAuthority::load(&**txn, statement_uuid)?;
    let statement = statement::load(&**txn, statement_uuid)?;

    let mut any_valid = false;
    for mut signature in txn.signatures_by_statement(statement_uuid)? {
        let valid = signature.check(&**txn, &statement, &authority)?;
        if signature.valid != valid {
            signature.valid = valid;
            txn.put_signature(signature)?;
        }
        any_valid |= valid;
    }

    if authority.valid_signature != any_valid {
        authority.valid_signature = any_valid;
        txn.put_authority(authority)?;
        debug!(statement = %statement_uuid, valid = any_valid, "Valid signature changed");
        txn.emit(AuthorityEvent::ValidSignatureChanged {
            statement_uuid,
            value: any_valid,
        });
        propagation::refresh(txn, &[statement_uuid])?;
    }
    Ok(any_valid)
}

/// Recheck every authority directly inside `context_uuid`.
pub fn revalidate_context(txn: &mut Transaction<'_>, context_uuid: Uuid) -> Result<()> {
    let statements: BTreeSet<Uuid> = txn
        .authorities_by_context(context_uuid)?
        .into_iter()
        .map(|a| a.statement_uuid)
        .collect();
    debug!(context = %context_uuid, count = statements.len(), "Revalidating context signatures");
    for uuid in statements {
        check_valid_signature(txn, uuid)?;
    }
    Ok(())
}

/// Recheck signatures in `context_uuid` made by any of `authorizers` on statements
/// whose prefix lies within `prefix`.
pub fn revalidate_scoped(
    txn: &mut Transaction<'_>,
    context_uuid: Uuid,
    prefix: &Namespace,
    authorizers: &[Uuid],
) -> Result<()> {
    let mut statements = BTreeSet::new();
    for authorizer in authorizers {
        for signature in txn.signatures_by_context_and_authorizer(context_uuid, *authorizer)? {
            if statements.contains(&signature.statement_uuid) {
                continue;
            }
            let statement = statement::load(&**txn, signature.statement_uuid)?;
            if prefix.is_prefix_of(&statement.prefix()) {
                statements.insert(statement.uuid);
            }
        }
    }
    debug!(
        context = %context_uuid,
        prefix = %prefix,
        count = statements.len(),
        "Revalidating scoped signatures"
    );
    for uuid in statements {
        check_valid_signature(txn, uuid)?;
    }
    Ok(())
}
