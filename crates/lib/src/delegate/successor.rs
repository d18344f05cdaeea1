//! Root signatures and the successor chain.
//!
//! The root of a delegate tree is signed by the current holder of the chain:
//! the author of the statement, or the successor at `successor_index`. Each
//! entry of the chain is signed by the holder before it, so the chain can be
//! verified from the author onwards without trusting the store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use super::DelegateError;
use super::node::{self, DelegateTreeNode, RootNodeData};
use crate::authority::{self, StatementAuthority};
use crate::backend::{AuthorityStore, BackendError, BackendTransaction, DelegateStore};
use crate::crypto::{CryptoError, SignatureData, SignatureVersion};
use crate::events::AuthorityEvent;
use crate::manager::EntityKey;
use crate::person::Person;
use crate::signatory::{PrivateSignatory, Signatory};
use crate::{Namespace, Result, Transaction};

/// One handover of root signing authority.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SuccessorEntry {
    pub successor_uuid: Uuid,
    pub signature_date: DateTime<Utc>,
    pub signature_version: SignatureVersion,
    /// Signature of the previous holder.
    pub signature_data: SignatureData,
}

#[derive(Serialize)]
struct RootSignable {
    statement_uuid: Uuid,
    signature_date: i64,
    message_digest: String,
}

impl RootSignable {
    fn new(node: &DelegateTreeNode, signature_date: DateTime<Utc>) -> Self {
        Self {
            statement_uuid: node.statement_uuid,
            signature_date: signature_date.timestamp_millis(),
            message_digest: hex::encode(&node.message_digest),
        }
    }
}

#[derive(Serialize)]
struct SuccessorSignable {
    successor_uuid: Uuid,
    signature_date: i64,
}

impl SuccessorSignable {
    fn new(successor_uuid: Uuid, signature_date: DateTime<Utc>) -> Self {
        Self {
            successor_uuid,
            signature_date: signature_date.timestamp_millis(),
        }
    }
}

/// Which end of the chain `sign` starts searching from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Search {
    Latest,
    Earliest,
}

fn root_data_of(node: &mut DelegateTreeNode) -> Result<&mut RootNodeData> {
    let statement_uuid = node.statement_uuid;
    node.root_data_mut().ok_or_else(|| {
        BackendError::DelegateNodeNotFound {
            statement_uuid,
            prefix: Namespace::root(),
        }
        .into()
    })
}

/// Map a signature failure to `false`, keep other errors.
fn verified(result: Result<()>) -> Result<bool> {
    match result {
        Ok(()) => Ok(true),
        Err(err) if err.is_signature_error() => Ok(false),
        Err(err) => Err(err),
    }
}

/// Whether the root of the statement's delegate tree carries a valid signature.
///
/// The successor chain is verified up to `successor_index`, then the root
/// signature against that holder's key and the tree's digests against the
/// stored nodes. A missing root, authority or signatory yields `false`.
pub fn is_root_signed(txn: &dyn BackendTransaction, statement_uuid: Uuid) -> Result<bool> {
    let Some(node) = txn.get_delegate_node(statement_uuid, &Namespace::root())? else {
        return Ok(false);
    };
    let Some(authority) = txn.get_authority(statement_uuid)? else {
        return Ok(false);
    };
    if !root_chain_verifies(&node, authority.author_uuid, |uuid| Signatory::get(txn, uuid))? {
        return Ok(false);
    }
    node::digests_consistent(txn, statement_uuid)
}

/// Verify the successor chain of `node` up to `successor_index`, then the root
/// signature against that holder's key.
///
/// Keys are resolved through `signatory_of`. An unsigned root or an unknown
/// holder yields `false`. Digests are not checked.
pub(crate) fn root_chain_verifies(
    node: &DelegateTreeNode,
    author_uuid: Uuid,
    signatory_of: impl Fn(Uuid) -> Result<Option<Signatory>>,
) -> Result<bool> {
    let statement_uuid = node.statement_uuid;
    let Some(root) = node.root_data() else {
        return Ok(false);
    };
    let (Some(signature_date), Some(signature_data)) = (root.signature_date, &root.signature_data)
    else {
        return Ok(false);
    };

    let mut holder = author_uuid;
    if let Some(index) = root.successor_index {
        let Some(entries) = root.successor_entries.get(..=index) else {
            return Ok(false);
        };
        for entry in entries {
            let Some(signatory) = signatory_of(holder)? else {
                return Ok(false);
            };
            let signable = SuccessorSignable::new(entry.successor_uuid, entry.signature_date);
            let ok = verified(signatory.verify_canonical(
                entry.signature_version,
                &entry.signature_data,
                &signable,
                || format!("successor entry {} of {statement_uuid}", entry.successor_uuid),
            ))?;
            if !ok {
                return Ok(false);
            }
            holder = entry.successor_uuid;
        }
    }

    let Some(signatory) = signatory_of(holder)? else {
        return Ok(false);
    };
    let signable = RootSignable::new(node, signature_date);
    verified(signatory.verify_canonical(
        root.signature_version,
        signature_data,
        &signable,
        || format!("delegate tree root of {statement_uuid}"),
    ))
}

/// Sign the root as the most recent locally private holder.
///
/// Later entries of the chain are discarded. Fails with `NoPrivateKey` when no
/// holder of the chain is private.
pub fn sign_root(txn: &mut Transaction<'_>, statement_uuid: Uuid) -> Result<DelegateTreeNode> {
    sign_root_with(txn, statement_uuid, Search::Latest)
}

/// Sign the root as the earliest locally private holder, discarding every
/// entry after it.
pub fn sign_root_from_earliest(
    txn: &mut Transaction<'_>,
    statement_uuid: Uuid,
) -> Result<DelegateTreeNode> {
    sign_root_with(txn, statement_uuid, Search::Earliest)
}

fn sign_root_with(
    txn: &mut Transaction<'_>,
    statement_uuid: Uuid,
    search: Search,
) -> Result<DelegateTreeNode> {
    node::get_or_create_root(txn, statement_uuid)?;
    let was_signed = is_root_signed(&**txn, statement_uuid)?;
    let truncated = {
        let lock = txn
            .manager()
            .entity_lock(EntityKey::DelegateRoot(statement_uuid));
        let _guard = lock.lock().unwrap_or_else(|e| e.into_inner());
        sign_locked(txn, statement_uuid, search)?
    };
    chain_changed(txn, statement_uuid, &truncated, was_signed)?;
    node::load_node(&**txn, statement_uuid, &Namespace::root())
}

/// Re-sign the root after a local change, or clear its signature when no
/// holder is private. The caller holds the root lock.
pub(crate) fn resign_or_clear(txn: &mut Transaction<'_>, statement_uuid: Uuid) -> Result<()> {
    match sign_locked(txn, statement_uuid, Search::Latest) {
        Ok(truncated) => {
            for successor in truncated {
                Person::update_orphan_since(txn, successor)?;
            }
            Ok(())
        }
        Err(err) if err.is_missing_private_data() => {
            let mut node = node::load_node(&**txn, statement_uuid, &Namespace::root())?;
            let root = root_data_of(&mut node)?;
            if root.signature_data.is_some() {
                root.clear_signature();
                txn.put_delegate_node(node)?;
                debug!(statement = %statement_uuid, "No private chain holder, root signature cleared");
            }
            Ok(())
        }
        Err(err) => Err(err),
    }
}

/// Returns the successors of the discarded entries.
fn sign_locked(txn: &mut Transaction<'_>, statement_uuid: Uuid, search: Search) -> Result<Vec<Uuid>> {
    let authority = StatementAuthority::load(&**txn, statement_uuid)?;
    let mut node = node::load_node(&**txn, statement_uuid, &Namespace::root())?;
    let mut candidates = vec![authority.author_uuid];
    candidates.extend(
        root_data_of(&mut node)?
            .successor_entries
            .iter()
            .map(|entry| entry.successor_uuid),
    );

    let order: Vec<usize> = match search {
        Search::Latest => (0..candidates.len()).rev().collect(),
        Search::Earliest => (0..candidates.len()).collect(),
    };
    let mut chosen = None;
    for position in order {
        if let Some(signer) = PrivateSignatory::try_load(txn, candidates[position])? {
            chosen = Some((position, signer));
            break;
        }
    }
    let Some((position, signer)) = chosen else {
        return Err(CryptoError::NoPrivateKey {
            signatory: candidates[candidates.len() - 1],
        }
        .into());
    };

    let signature_date = txn.now();
    let version = SignatureVersion::CURRENT;
    let signature_data = signer.sign_canonical(version, &RootSignable::new(&node, signature_date))?;
    let root = root_data_of(&mut node)?;
    let truncated: Vec<Uuid> = root
        .successor_entries
        .split_off(position)
        .into_iter()
        .map(|entry| entry.successor_uuid)
        .collect();
    root.successor_index = position.checked_sub(1);
    root.signature_date = Some(signature_date);
    root.signature_version = version;
    root.signature_data = Some(signature_data);
    txn.put_delegate_node(node)?;
    debug!(
        statement = %statement_uuid,
        signer = %signer.uuid(),
        discarded = truncated.len(),
        "Signed delegate tree root"
    );
    Ok(truncated)
}

/// Append a successor to the chain, signed by the current last holder.
///
/// The root is not re-signed; the new successor takes over once it signs.
pub fn add_successor_entry(
    txn: &mut Transaction<'_>,
    statement_uuid: Uuid,
    successor: &Person,
    signature_date: DateTime<Utc>,
) -> Result<SuccessorEntry> {
    node::get_or_create_root(txn, statement_uuid)?;
    Person::load(&**txn, successor.uuid)?;
    let entry = {
        let lock = txn
            .manager()
            .entity_lock(EntityKey::DelegateRoot(statement_uuid));
        let _guard = lock.lock().unwrap_or_else(|e| e.into_inner());

        let authority = StatementAuthority::load(&**txn, statement_uuid)?;
        let mut node = node::load_node(&**txn, statement_uuid, &Namespace::root())?;
        let root = root_data_of(&mut node)?;
        if successor.uuid == authority.author_uuid
            || root
                .successor_entries
                .iter()
                .any(|entry| entry.successor_uuid == successor.uuid)
        {
            return Err(DelegateError::DuplicateSuccessor {
                statement_uuid,
                successor_uuid: successor.uuid,
            }
            .into());
        }
        let (previous_date, previous_holder) = match root.successor_entries.last() {
            Some(last) => (last.signature_date, last.successor_uuid),
            None => (authority.creation_date, authority.author_uuid),
        };
        if signature_date <= previous_date {
            return Err(DelegateError::SuccessorDateNotIncreasing {
                date: signature_date,
                previous: previous_date,
            }
            .into());
        }

        let signer = PrivateSignatory::load(txn, previous_holder)?;
        let version = SignatureVersion::CURRENT;
        let signature_data =
            signer.sign_canonical(version, &SuccessorSignable::new(successor.uuid, signature_date))?;
        let entry = SuccessorEntry {
            successor_uuid: successor.uuid,
            signature_date,
            signature_version: version,
            signature_data,
        };
        root_data_of(&mut node)?.successor_entries.push(entry.clone());
        txn.put_delegate_node(node)?;
        entry
    };
    debug!(
        statement = %statement_uuid,
        successor = %successor.uuid,
        "Added successor entry"
    );
    Person::update_orphan_since(txn, successor.uuid)?;
    txn.emit(AuthorityEvent::DelegateTreeChanged { statement_uuid });
    Ok(entry)
}

/// Remove the entries at `index` and after.
///
/// If the root was signed by a removed successor, it is re-signed by the most
/// recent remaining private holder, or left unsigned.
pub fn delete_successor_entries_from(
    txn: &mut Transaction<'_>,
    statement_uuid: Uuid,
    index: usize,
) -> Result<()> {
    let was_signed = is_root_signed(&**txn, statement_uuid)?;
    let removed = {
        let lock = txn
            .manager()
            .entity_lock(EntityKey::DelegateRoot(statement_uuid));
        let _guard = lock.lock().unwrap_or_else(|e| e.into_inner());

        let mut node = node::load_node(&**txn, statement_uuid, &Namespace::root())?;
        let root = root_data_of(&mut node)?;
        let len = root.successor_entries.len();
        if index >= len {
            return Err(DelegateError::SuccessorIndexOutOfRange { index, len }.into());
        }
        let mut removed: Vec<Uuid> = root
            .successor_entries
            .split_off(index)
            .into_iter()
            .map(|entry| entry.successor_uuid)
            .collect();
        let holder_removed = root.successor_index.is_some_and(|current| current >= index);
        if holder_removed {
            root.successor_index = index.checked_sub(1);
            root.clear_signature();
        }
        txn.put_delegate_node(node)?;

        if holder_removed {
            match sign_locked(txn, statement_uuid, Search::Latest) {
                Ok(truncated) => removed.extend(truncated),
                Err(err) if err.is_missing_private_data() => {}
                Err(err) => return Err(err),
            }
        }
        removed
    };
    debug!(statement = %statement_uuid, index, "Deleted successor entries");
    chain_changed(txn, statement_uuid, &removed, was_signed)
}

fn chain_changed(
    txn: &mut Transaction<'_>,
    statement_uuid: Uuid,
    dropped: &[Uuid],
    was_signed: bool,
) -> Result<()> {
    for successor in dropped {
        Person::update_orphan_since(txn, *successor)?;
    }
    txn.emit(AuthorityEvent::DelegateTreeChanged { statement_uuid });
    if was_signed != is_root_signed(&**txn, statement_uuid)? {
        authority::revalidate_context(txn, statement_uuid)?;
    }
    Ok(())
}
