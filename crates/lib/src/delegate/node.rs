//! Delegate tree nodes and their digests.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use super::DelegateError;
use super::successor::{self, SuccessorEntry};
use crate::authority::{self, AuthorityError};
use crate::backend::{AuthorityStore, BackendError, BackendTransaction, DelegateStore};
use crate::crypto::{self, SignatureData, SignatureVersion};
use crate::events::AuthorityEvent;
use crate::manager::EntityKey;
use crate::person::Person;
use crate::{Namespace, Result, Transaction};

/// A node of a statement's delegate tree, keyed by (statement, prefix).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DelegateTreeNode {
    pub statement_uuid: Uuid,
    pub prefix: Namespace,
    /// Hash over the node's delegates and its children's names and digests.
    #[serde(with = "serde_bytes")]
    pub message_digest: Vec<u8>,
    pub kind: DelegateNodeKind,
}

/// Root or sub node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DelegateNodeKind {
    Root(RootNodeData),
    Sub { parent: Namespace },
}

/// Root-only state: the root signature and the successor chain.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RootNodeData {
    pub signature_date: Option<DateTime<Utc>>,
    pub signature_version: SignatureVersion,
    pub signature_data: Option<SignatureData>,
    pub successor_entries: Vec<SuccessorEntry>,
    /// Entry whose successor signed the root; `None` means the author did.
    pub successor_index: Option<usize>,
}

impl RootNodeData {
    /// The signatory currently entitled to sign the root.
    pub fn holder(&self, author_uuid: Uuid) -> Uuid {
        self.successor_index
            .and_then(|index| self.successor_entries.get(index))
            .map_or(author_uuid, |entry| entry.successor_uuid)
    }

    pub(crate) fn clear_signature(&mut self) {
        self.signature_date = None;
        self.signature_data = None;
    }
}

impl DelegateTreeNode {
    pub fn is_root(&self) -> bool {
        matches!(self.kind, DelegateNodeKind::Root(_))
    }

    pub fn root_data(&self) -> Option<&RootNodeData> {
        match &self.kind {
            DelegateNodeKind::Root(root) => Some(root),
            DelegateNodeKind::Sub { .. } => None,
        }
    }

    pub fn root_data_mut(&mut self) -> Option<&mut RootNodeData> {
        match &mut self.kind {
            DelegateNodeKind::Root(root) => Some(root),
            DelegateNodeKind::Sub { .. } => None,
        }
    }

    pub fn parent(&self) -> Option<&Namespace> {
        match &self.kind {
            DelegateNodeKind::Root(_) => None,
            DelegateNodeKind::Sub { parent } => Some(parent),
        }
    }
}

/// Load a node or fail with `DelegateNodeNotFound`.
pub fn load_node(
    txn: &dyn BackendTransaction,
    statement_uuid: Uuid,
    prefix: &Namespace,
) -> Result<DelegateTreeNode> {
    txn.get_delegate_node(statement_uuid, prefix)?.ok_or_else(|| {
        BackendError::DelegateNodeNotFound {
            statement_uuid,
            prefix: prefix.clone(),
        }
        .into()
    })
}

/// Digest of a node from the current store contents.
pub fn compute_digest(
    txn: &dyn BackendTransaction,
    statement_uuid: Uuid,
    prefix: &Namespace,
) -> Result<Vec<u8>> {
    let delegates: Vec<Uuid> = txn
        .authorizers_by_node(statement_uuid, prefix)?
        .into_iter()
        .map(|a| a.delegate_uuid)
        .collect();
    let children = txn.delegate_children(statement_uuid, prefix)?;
    Ok(digest_of(delegates, children.iter().collect()))
}

fn digest_of(mut delegates: Vec<Uuid>, mut children: Vec<&DelegateTreeNode>) -> Vec<u8> {
    delegates.sort();
    children.sort_by(|a, b| a.prefix.cmp(&b.prefix));

    let mut parts: Vec<Vec<u8>> = Vec::with_capacity(2 + delegates.len() + 2 * children.len());
    parts.push((delegates.len() as u64).to_be_bytes().to_vec());
    parts.extend(delegates.iter().map(|uuid| uuid.as_bytes().to_vec()));
    parts.push((children.len() as u64).to_be_bytes().to_vec());
    for child in children {
        parts.push(child.prefix.name().unwrap_or_default().as_bytes().to_vec());
        parts.push(child.message_digest.clone());
    }
    let parts: Vec<&[u8]> = parts.iter().map(Vec::as_slice).collect();
    crypto::sha256(&parts)
}

/// Whether nodes that are not stored yet form a single tree with consistent digests.
///
/// Each node is paired with the delegate UUIDs of its authorizers. Every prefix
/// must be unique, the only root must sit at the root namespace, and every sub
/// node's parent must be present.
pub(crate) fn detached_tree_consistent(nodes: &[(DelegateTreeNode, Vec<Uuid>)]) -> bool {
    let prefixes: BTreeSet<&Namespace> = nodes.iter().map(|(node, _)| &node.prefix).collect();
    if prefixes.len() != nodes.len() {
        return false;
    }
    nodes.iter().all(|(node, delegates)| {
        let placed = match &node.kind {
            DelegateNodeKind::Root(_) => node.prefix.is_root(),
            DelegateNodeKind::Sub { parent } => {
                node.prefix.parent().as_ref() == Some(parent) && prefixes.contains(parent)
            }
        };
        let children: Vec<&DelegateTreeNode> = nodes
            .iter()
            .map(|(child, _)| child)
            .filter(|child| child.parent() == Some(&node.prefix))
            .collect();
        placed && digest_of(delegates.clone(), children) == node.message_digest
    })
}

/// Whether every stored digest of the tree matches its recomputed value.
///
/// Checking each node against its children's stored digests is enough: by
/// induction the root digest then covers the whole tree.
pub fn digests_consistent(txn: &dyn BackendTransaction, statement_uuid: Uuid) -> Result<bool> {
    for node in txn.delegate_nodes_by_statement(statement_uuid)? {
        if compute_digest(txn, statement_uuid, &node.prefix)? != node.message_digest {
            return Ok(false);
        }
    }
    Ok(true)
}

/// Create the node (and missing ancestors) without touching digests.
///
/// Returns whether anything was created.
fn ensure_node(txn: &mut Transaction<'_>, statement_uuid: Uuid, prefix: &Namespace) -> Result<bool> {
    if txn.get_delegate_node(statement_uuid, prefix)?.is_some() {
        return Ok(false);
    }
    let kind = match prefix.parent() {
        None => {
            if txn.get_authority(statement_uuid)?.is_none() {
                return Err(AuthorityError::AuthorityNotFound {
                    uuid: statement_uuid,
                }
                .into());
            }
            DelegateNodeKind::Root(RootNodeData::default())
        }
        Some(parent) => {
            ensure_node(txn, statement_uuid, &parent)?;
            DelegateNodeKind::Sub { parent }
        }
    };
    txn.put_delegate_node(DelegateTreeNode {
        statement_uuid,
        prefix: prefix.clone(),
        message_digest: Vec::new(),
        kind,
    })?;
    debug!(statement = %statement_uuid, prefix = %prefix, "Created delegate tree node");
    Ok(true)
}

/// The root node of the statement's delegate tree, created if missing.
pub fn get_or_create_root(txn: &mut Transaction<'_>, statement_uuid: Uuid) -> Result<DelegateTreeNode> {
    get_or_create_sub_node(txn, statement_uuid, &Namespace::root())
}

/// The node at `prefix`, created with any missing ancestors.
pub fn get_or_create_sub_node(
    txn: &mut Transaction<'_>,
    statement_uuid: Uuid,
    prefix: &Namespace,
) -> Result<DelegateTreeNode> {
    if ensure_node(txn, statement_uuid, prefix)? {
        update_upward(txn, statement_uuid, prefix)?;
    }
    load_node(&**txn, statement_uuid, prefix)
}

/// Recompute digests from `prefix` up to the root, then re-sign the root.
///
/// The root is signed by the most recent locally private chain holder; when
/// there is none it is left unsigned. If that flips whether the root is
/// signed, every signature under the context is revalidated.
pub fn update_upward(txn: &mut Transaction<'_>, statement_uuid: Uuid, prefix: &Namespace) -> Result<()> {
    let was_signed = successor::is_root_signed(&**txn, statement_uuid)?;

    let mut current = Some(prefix.clone());
    while let Some(p) = current {
        let mut node = load_node(&**txn, statement_uuid, &p)?;
        node.message_digest = compute_digest(&**txn, statement_uuid, &p)?;
        current = node.parent().cloned();
        txn.put_delegate_node(node)?;
    }

    {
        let lock = txn
            .manager()
            .entity_lock(EntityKey::DelegateRoot(statement_uuid));
        let _guard = lock.lock().unwrap_or_else(|e| e.into_inner());
        successor::resign_or_clear(txn, statement_uuid)?;
    }
    txn.emit(AuthorityEvent::DelegateTreeChanged { statement_uuid });

    if was_signed != successor::is_root_signed(&**txn, statement_uuid)? {
        authority::revalidate_context(txn, statement_uuid)?;
    }
    Ok(())
}

/// Delete an empty node.
///
/// Fails with `NodeNotEmpty` while the node has children or authorizers.
pub fn delete_node(txn: &mut Transaction<'_>, statement_uuid: Uuid, prefix: &Namespace) -> Result<()> {
    let node = load_node(&**txn, statement_uuid, prefix)?;
    if !txn.delegate_children(statement_uuid, prefix)?.is_empty()
        || !txn.authorizers_by_node(statement_uuid, prefix)?.is_empty()
    {
        return Err(DelegateError::NodeNotEmpty {
            statement_uuid,
            prefix: prefix.clone(),
        }
        .into());
    }
    txn.delete_delegate_node(statement_uuid, prefix)?;
    debug!(statement = %statement_uuid, prefix = %prefix, "Deleted delegate tree node");
    match node.kind {
        DelegateNodeKind::Sub { parent } => update_upward(txn, statement_uuid, &parent),
        DelegateNodeKind::Root(root) => root_removed(txn, statement_uuid, &root),
    }
}

/// Delete the node at `prefix` and everything below it, bottom-up.
pub fn delete_subtree(txn: &mut Transaction<'_>, statement_uuid: Uuid, prefix: &Namespace) -> Result<()> {
    let top = load_node(&**txn, statement_uuid, prefix)?;
    let mut nodes: Vec<DelegateTreeNode> = txn
        .delegate_nodes_by_statement(statement_uuid)?
        .into_iter()
        .filter(|node| prefix.is_prefix_of(&node.prefix))
        .collect();
    nodes.sort_by_key(|node| std::cmp::Reverse(node.prefix.depth()));

    let mut delegates = Vec::new();
    for node in &nodes {
        for authorizer in txn.authorizers_by_node(statement_uuid, &node.prefix)? {
            txn.delete_delegate_authorizer(statement_uuid, &node.prefix, authorizer.delegate_uuid)?;
            delegates.push(authorizer.delegate_uuid);
        }
        txn.delete_delegate_node(statement_uuid, &node.prefix)?;
    }
    debug!(
        statement = %statement_uuid,
        prefix = %prefix,
        nodes = nodes.len(),
        "Deleted delegate subtree"
    );
    for delegate in delegates {
        Person::update_orphan_since(txn, delegate)?;
    }
    match top.kind {
        DelegateNodeKind::Sub { parent } => {
            update_upward(txn, statement_uuid, &parent)?;
            authority::revalidate_context(txn, statement_uuid)
        }
        DelegateNodeKind::Root(root) => root_removed(txn, statement_uuid, &root),
    }
}

fn root_removed(txn: &mut Transaction<'_>, statement_uuid: Uuid, root: &RootNodeData) -> Result<()> {
    for entry in &root.successor_entries {
        Person::update_orphan_since(txn, entry.successor_uuid)?;
    }
    txn.emit(AuthorityEvent::DelegateTreeChanged { statement_uuid });
    if txn.get_authority(statement_uuid)?.is_some() {
        authority::revalidate_context(txn, statement_uuid)?;
    }
    Ok(())
}
