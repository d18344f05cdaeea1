//! Delegate authorizers: who may sign for a delegate under a namespace prefix.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use super::DelegateError;
use super::node;
use crate::authority;
use crate::backend::{BackendTransaction, DelegateStore};
use crate::crypto::{SignatureData, SignatureVersion};
use crate::events::AuthorityEvent;
use crate::manager::EntityKey;
use crate::person::Person;
use crate::signatory::{PrivateSignatory, Signatory};
use crate::{Namespace, Result, Transaction};

/// Grants `authorizer_uuid` the right to sign, on behalf of `delegate_uuid`,
/// statements of the owning context whose prefix lies within `prefix`.
///
/// The grant is signed by the delegate. Signatures listed in
/// `revoked_signature_uuids` no longer pass through it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DelegateAuthorizer {
    pub statement_uuid: Uuid,
    pub prefix: Namespace,
    pub delegate_uuid: Uuid,
    pub authorizer_uuid: Option<Uuid>,
    pub revoked_signature_uuids: BTreeSet<Uuid>,
    pub signature_date: Option<DateTime<Utc>>,
    pub signature_version: SignatureVersion,
    pub signature_data: Option<SignatureData>,
}

#[derive(Serialize)]
struct AuthorizerSignable<'a> {
    statement_uuid: Uuid,
    prefix: String,
    delegate_uuid: Uuid,
    authorizer_uuid: Option<Uuid>,
    revoked_signature_uuids: Vec<&'a Uuid>,
    signature_date: Option<i64>,
}

impl DelegateAuthorizer {
    fn signable(&self, signature_date: DateTime<Utc>) -> AuthorizerSignable<'_> {
        AuthorizerSignable {
            statement_uuid: self.statement_uuid,
            prefix: self.prefix.to_string(),
            delegate_uuid: self.delegate_uuid,
            authorizer_uuid: self.authorizer_uuid,
            revoked_signature_uuids: self.revoked_signature_uuids.iter().collect(),
            signature_date: Some(signature_date.timestamp_millis()),
        }
    }

    pub fn get(
        txn: &dyn BackendTransaction,
        statement_uuid: Uuid,
        prefix: &Namespace,
        delegate_uuid: Uuid,
    ) -> Result<Option<Self>> {
        txn.get_delegate_authorizer(statement_uuid, prefix, delegate_uuid)
    }

    /// Load an authorizer or fail with `AuthorizerNotFound`.
    pub fn load(
        txn: &dyn BackendTransaction,
        statement_uuid: Uuid,
        prefix: &Namespace,
        delegate_uuid: Uuid,
    ) -> Result<Self> {
        Self::get(txn, statement_uuid, prefix, delegate_uuid)?.ok_or_else(|| {
            DelegateError::AuthorizerNotFound {
                statement_uuid,
                prefix: prefix.clone(),
                delegate_uuid,
            }
            .into()
        })
    }

    fn lock_key(&self) -> EntityKey {
        EntityKey::DelegateAuthorizer(self.statement_uuid, self.prefix.clone(), self.delegate_uuid)
    }

    /// Whether the delegate's signature over the current fields verifies.
    pub fn is_signed(&self, txn: &dyn BackendTransaction) -> Result<bool> {
        let (Some(signature_date), Some(signature_data)) = (self.signature_date, &self.signature_data)
        else {
            return Ok(false);
        };
        let Some(delegate) = Signatory::get(txn, self.delegate_uuid)? else {
            return Ok(false);
        };
        match delegate.verify_canonical(
            self.signature_version,
            signature_data,
            &self.signable(signature_date),
            || {
                format!(
                    "authorizer of {} at '{}' for {}",
                    self.statement_uuid, self.prefix, self.delegate_uuid
                )
            },
        ) {
            Ok(()) => Ok(true),
            Err(err) if err.is_signature_error() => Ok(false),
            Err(err) => Err(err),
        }
    }

    fn sign_with(&mut self, delegate: &PrivateSignatory, signature_date: DateTime<Utc>) -> Result<()> {
        let version = SignatureVersion::CURRENT;
        let signature_data = delegate.sign_canonical(version, &self.signable(signature_date))?;
        self.signature_date = Some(signature_date);
        self.signature_version = version;
        self.signature_data = Some(signature_data);
        Ok(())
    }

    fn clear_signature(&mut self) {
        self.signature_date = None;
        self.signature_data = None;
    }

    /// Sign as the delegate.
    ///
    /// Fails with `NoPrivateKey` or `NoSecret` when the delegate's key is not
    /// usable here.
    pub fn sign(&mut self, txn: &mut Transaction<'_>) -> Result<()> {
        {
            let lock = txn.manager().entity_lock(self.lock_key());
            let _guard = lock.lock().unwrap_or_else(|e| e.into_inner());
            let mut current =
                Self::load(&**txn, self.statement_uuid, &self.prefix, self.delegate_uuid)?;
            let delegate = PrivateSignatory::load(txn, current.delegate_uuid)?;
            current.sign_with(&delegate, txn.now())?;
            txn.put_delegate_authorizer(current.clone())?;
            *self = current;
        }
        debug!(
            statement = %self.statement_uuid,
            prefix = %self.prefix,
            delegate = %self.delegate_uuid,
            "Signed delegate authorizer"
        );
        txn.emit(AuthorityEvent::DelegateTreeChanged {
            statement_uuid: self.statement_uuid,
        });
        let authorizers: Vec<Uuid> = self.authorizer_uuid.into_iter().collect();
        authority::revalidate_scoped(txn, self.statement_uuid, &self.prefix, &authorizers)
    }

    /// Change who may sign through this grant.
    pub fn set_authorizer(
        &mut self,
        txn: &mut Transaction<'_>,
        authorizer: Option<&Signatory>,
    ) -> Result<()> {
        if let Some(signatory) = authorizer {
            Signatory::register(&mut **txn, signatory)?;
        }
        let authorizer_uuid = authorizer.map(|signatory| signatory.uuid);
        self.mutate(txn, |record| {
            record.authorizer_uuid = authorizer_uuid;
        })
    }

    /// Revoke one signature made through this grant.
    ///
    /// Returns whether the UUID was newly added.
    pub fn add_revoked_signature_uuid(
        &mut self,
        txn: &mut Transaction<'_>,
        signature_uuid: Uuid,
    ) -> Result<bool> {
        self.mutate(txn, |record| record.revoked_signature_uuids.insert(signature_uuid))
    }

    /// Lift a revocation. Returns whether the UUID was present.
    pub fn remove_revoked_signature_uuid(
        &mut self,
        txn: &mut Transaction<'_>,
        signature_uuid: Uuid,
    ) -> Result<bool> {
        self.mutate(txn, |record| record.revoked_signature_uuids.remove(&signature_uuid))
    }

    /// Apply `change` to the stored record under its lock.
    ///
    /// The record's signature is cleared and, when the delegate is private,
    /// renewed. Signatures made by the previous or the new authorizer under the
    /// prefix are then rechecked.
    fn mutate<R>(
        &mut self,
        txn: &mut Transaction<'_>,
        change: impl FnOnce(&mut DelegateAuthorizer) -> R,
    ) -> Result<R> {
        let (result, previous) = {
            let lock = txn.manager().entity_lock(self.lock_key());
            let _guard = lock.lock().unwrap_or_else(|e| e.into_inner());
            let mut current =
                Self::load(&**txn, self.statement_uuid, &self.prefix, self.delegate_uuid)?;
            let previous = current.authorizer_uuid;
            let result = change(&mut current);
            current.clear_signature();
            if let Some(delegate) = PrivateSignatory::try_load(txn, current.delegate_uuid)? {
                current.sign_with(&delegate, txn.now())?;
            }
            txn.put_delegate_authorizer(current.clone())?;
            *self = current;
            (result, previous)
        };
        debug!(
            statement = %self.statement_uuid,
            prefix = %self.prefix,
            delegate = %self.delegate_uuid,
            signed = self.signature_data.is_some(),
            "Updated delegate authorizer"
        );
        txn.emit(AuthorityEvent::DelegateTreeChanged {
            statement_uuid: self.statement_uuid,
        });
        let mut authorizers: Vec<Uuid> = previous.into_iter().chain(self.authorizer_uuid).collect();
        authorizers.dedup();
        authority::revalidate_scoped(txn, self.statement_uuid, &self.prefix, &authorizers)?;
        Ok(result)
    }
}

/// Grant `delegate` an authorizer at `prefix` of the statement's delegate tree.
///
/// Missing nodes are created. If the delegate already has an authorizer at the
/// node, its authorizing signatory is replaced instead. The grant is signed
/// right away when the delegate's key is usable here.
pub fn create_authorizer(
    txn: &mut Transaction<'_>,
    statement_uuid: Uuid,
    prefix: &Namespace,
    delegate: &Person,
    authorizer: Option<&Signatory>,
) -> Result<DelegateAuthorizer> {
    Person::load(&**txn, delegate.uuid)?;
    if let Some(mut existing) =
        DelegateAuthorizer::get(&**txn, statement_uuid, prefix, delegate.uuid)?
    {
        existing.set_authorizer(txn, authorizer)?;
        return Ok(existing);
    }
    node::get_or_create_sub_node(txn, statement_uuid, prefix)?;
    if let Some(signatory) = authorizer {
        Signatory::register(&mut **txn, signatory)?;
    }

    let mut record = DelegateAuthorizer {
        statement_uuid,
        prefix: prefix.clone(),
        delegate_uuid: delegate.uuid,
        authorizer_uuid: authorizer.map(|signatory| signatory.uuid),
        revoked_signature_uuids: BTreeSet::new(),
        signature_date: None,
        signature_version: SignatureVersion::CURRENT,
        signature_data: None,
    };
    {
        let lock = txn.manager().entity_lock(record.lock_key());
        let _guard = lock.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(private) = PrivateSignatory::try_load(txn, delegate.uuid)? {
            record.sign_with(&private, txn.now())?;
        }
        txn.put_delegate_authorizer(record.clone())?;
    }
    debug!(
        statement = %statement_uuid,
        prefix = %prefix,
        delegate = %delegate.uuid,
        signed = record.signature_data.is_some(),
        "Created delegate authorizer"
    );

    node::update_upward(txn, statement_uuid, prefix)?;
    Person::update_orphan_since(txn, delegate.uuid)?;
    let authorizers: Vec<Uuid> = record.authorizer_uuid.into_iter().collect();
    authority::revalidate_scoped(txn, statement_uuid, prefix, &authorizers)?;
    Ok(record)
}

/// Remove the delegate's authorizer at `prefix`.
pub fn delete_authorizer(
    txn: &mut Transaction<'_>,
    statement_uuid: Uuid,
    prefix: &Namespace,
    delegate_uuid: Uuid,
) -> Result<()> {
    let record = DelegateAuthorizer::load(&**txn, statement_uuid, prefix, delegate_uuid)?;
    {
        let lock = txn.manager().entity_lock(record.lock_key());
        let _guard = lock.lock().unwrap_or_else(|e| e.into_inner());
        txn.delete_delegate_authorizer(statement_uuid, prefix, delegate_uuid)?;
    }
    debug!(
        statement = %statement_uuid,
        prefix = %prefix,
        delegate = %delegate_uuid,
        "Deleted delegate authorizer"
    );

    node::update_upward(txn, statement_uuid, prefix)?;
    Person::update_orphan_since(txn, delegate_uuid)?;
    let authorizers: Vec<Uuid> = record.authorizer_uuid.into_iter().collect();
    authority::revalidate_scoped(txn, statement_uuid, prefix, &authorizers)
}
