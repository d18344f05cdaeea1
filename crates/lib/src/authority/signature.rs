//! Signatures on statement authorities and their authorization rules.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::StatementAuthority;
use crate::backend::{BackendTransaction, DelegateStore};
use crate::crypto::{SignatureData, SignatureVersion};
use crate::delegate::{self, DelegateAuthorizer};
use crate::signatory::Signatory;
use crate::statement::StatementContent;
use crate::{Result, Statement};

/// One signature on a statement authority, keyed by (statement, authorizer).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatementAuthoritySignature {
    pub statement_uuid: Uuid,
    /// Context of the signed statement, `None` for root contexts.
    pub context_uuid: Option<Uuid>,
    pub authorizer_uuid: Uuid,
    pub signature_date: DateTime<Utc>,
    pub signature_version: SignatureVersion,
    pub signature_data: SignatureData,
    /// Hash of `signature_data`; revocation sets refer to it.
    pub signature_uuid: Uuid,
    /// Result of the last validity check.
    pub valid: bool,
}

#[derive(Serialize)]
pub(crate) struct AuthoritySignable<'a> {
    statement: StatementContent<'a>,
    author_uuid: Uuid,
    creation_date: i64,
    signature_date: Option<i64>,
}

impl<'a> AuthoritySignable<'a> {
    pub(crate) fn new(
        statement: &'a Statement,
        authority: &StatementAuthority,
        signature_date: DateTime<Utc>,
    ) -> Self {
        Self {
            statement: statement.content(),
            author_uuid: authority.author_uuid,
            creation_date: authority.creation_date.timestamp_millis(),
            signature_date: Some(signature_date.timestamp_millis()),
        }
    }
}

impl StatementAuthoritySignature {
    /// Whether the signature bytes verify against the authorizer's key and the
    /// current statement content.
    pub fn verifies(
        &self,
        txn: &dyn BackendTransaction,
        statement: &Statement,
        authority: &StatementAuthority,
    ) -> Result<bool> {
        let Some(signatory) = Signatory::get(txn, self.authorizer_uuid)? else {
            return Ok(false);
        };
        let signable = AuthoritySignable::new(statement, authority, self.signature_date);
        match signatory.verify_canonical(
            self.signature_version,
            &self.signature_data,
            &signable,
            || format!("signature by {} on {}", self.authorizer_uuid, self.statement_uuid),
        ) {
            Ok(()) => Ok(true),
            Err(err) if err.is_signature_error() => Ok(false),
            Err(err) => Err(err),
        }
    }

    /// Whether the authorizer may sign the statement.
    ///
    /// Root contexts accept only their author. Any other statement needs a signed
    /// delegate authorizer naming this authorizer at a node of the enclosing
    /// context's delegate tree whose prefix contains the statement's prefix, with
    /// a signed root and without this signature in its revocation set.
    pub fn is_authorized(
        &self,
        txn: &dyn BackendTransaction,
        statement: &Statement,
        authority: &StatementAuthority,
    ) -> Result<bool> {
        let Some(context_uuid) = statement.context_uuid else {
            return Ok(self.authorizer_uuid == authority.author_uuid);
        };
        if !delegate::is_root_signed(txn, context_uuid)? {
            return Ok(false);
        }
        for prefix in statement.prefix().prefixes() {
            let candidates =
                txn.authorizers_by_prefix_and_authorizer(context_uuid, &prefix, self.authorizer_uuid)?;
            for authorizer in candidates {
                if self.passes_through(txn, &authorizer)? {
                    return Ok(true);
                }
            }
        }
        Ok(false)
    }

    fn passes_through(
        &self,
        txn: &dyn BackendTransaction,
        authorizer: &DelegateAuthorizer,
    ) -> Result<bool> {
        if authorizer.revoked_signature_uuids.contains(&self.signature_uuid) {
            return Ok(false);
        }
        authorizer.is_signed(txn)
    }

    /// Full validity: cryptographically sound and authorized.
    pub fn check(
        &self,
        txn: &dyn BackendTransaction,
        statement: &Statement,
        authority: &StatementAuthority,
    ) -> Result<bool> {
        Ok(self.verifies(txn, statement, authority)?
            && self.is_authorized(txn, statement, authority)?)
    }
}
