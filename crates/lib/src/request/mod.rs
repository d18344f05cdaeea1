//! Signature requests: collecting what an offline co-signer needs.
//!
//! An [`UnpackedSignatureRequest`] names a context (by its path from the root
//! context) and the statements inside it that should be signed, together with
//! every dependency that is not yet signed. Packing it produces a
//! [`PackedSignatureRequest`] holding the statements, authorities, persons and
//! delegate trees in a compact transport format. On the remote end the packed
//! request is replayed into the local store and becomes an unpacked request
//! again.
//!
//! While an unpacked request lists a statement, its authority cannot be deleted.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

use crate::backend::{AuthorityStore, BackendTransaction, RequestStore, StatementStore};
use crate::{Result, Statement, Transaction, statement};

mod errors;
mod packed;
pub mod wire;

pub use errors::RequestError;
pub use packed::PackedSignatureRequest;
pub use wire::PackedRecord;

/// A stored signature request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SignatureRequest {
    Unpacked(UnpackedSignatureRequest),
    Packed(PackedSignatureRequest),
}

impl SignatureRequest {
    pub fn uuid(&self) -> Uuid {
        match self {
            SignatureRequest::Unpacked(request) => request.uuid,
            SignatureRequest::Packed(request) => request.uuid,
        }
    }

    pub fn creation_date(&self) -> DateTime<Utc> {
        match self {
            SignatureRequest::Unpacked(request) => request.creation_date,
            SignatureRequest::Packed(request) => request.creation_date,
        }
    }

    pub fn context_uuid_path(&self) -> &[Uuid] {
        match self {
            SignatureRequest::Unpacked(request) => &request.context_uuid_path,
            SignatureRequest::Packed(request) => &request.context_uuid_path,
        }
    }

    /// The innermost context of the path.
    pub fn context_uuid(&self) -> Option<Uuid> {
        self.context_uuid_path().last().copied()
    }
}

/// A request being assembled, or one rehydrated from a packed request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnpackedSignatureRequest {
    pub uuid: Uuid,
    pub creation_date: DateTime<Utc>,
    /// Contexts from the root context down to the request's context.
    pub context_uuid_path: Vec<Uuid>,
    pub statement_uuids: BTreeSet<Uuid>,
}

/// Check that `path` resolves to a chain of contexts starting at a root context.
pub(crate) fn check_context_path(txn: &dyn BackendTransaction, path: &[Uuid]) -> Result<()> {
    let inconsistent = |reason: String| RequestError::ContextPathInconsistent { reason };
    if path.is_empty() {
        return Err(inconsistent("empty context path".to_string()).into());
    }
    let mut parent = None;
    for uuid in path {
        let Some(context) = txn.get_statement(*uuid)? else {
            return Err(inconsistent(format!("context {uuid} does not exist")).into());
        };
        if !context.is_context() {
            return Err(inconsistent(format!("statement {uuid} is not a context")).into());
        }
        if context.context_uuid != parent {
            return Err(inconsistent(format!("context {uuid} is not nested in its predecessor")).into());
        }
        parent = Some(*uuid);
    }
    Ok(())
}

impl UnpackedSignatureRequest {
    /// Start a request for statements inside `context_uuid`.
    pub fn create(txn: &mut Transaction<'_>, context_uuid: Uuid) -> Result<Self> {
        let path: Vec<Uuid> = statement::context_path(&**txn, context_uuid)?
            .iter()
            .map(|context| context.uuid)
            .collect();
        check_context_path(&**txn, &path)?;
        let request = UnpackedSignatureRequest {
            uuid: Uuid::new_v4(),
            creation_date: txn.now(),
            context_uuid_path: path,
            statement_uuids: BTreeSet::new(),
        };
        txn.put_signature_request(SignatureRequest::Unpacked(request.clone()))?;
        info!(request = %request.uuid, context = %context_uuid, "Created signature request");
        Ok(request)
    }

    /// Load an unpacked request or fail with `RequestNotFound`.
    pub fn load(txn: &dyn BackendTransaction, uuid: Uuid) -> Result<Self> {
        match txn.get_signature_request(uuid)? {
            Some(SignatureRequest::Unpacked(request)) => Ok(request),
            _ => Err(RequestError::RequestNotFound { uuid }.into()),
        }
    }

    /// Delete a stored request of either kind.
    pub fn delete(txn: &mut Transaction<'_>, uuid: Uuid) -> Result<()> {
        if txn.get_signature_request(uuid)?.is_none() {
            return Err(RequestError::RequestNotFound { uuid }.into());
        }
        txn.delete_signature_request(uuid)?;
        info!(request = %uuid, "Deleted signature request");
        Ok(())
    }

    pub fn context_uuid(&self) -> Uuid {
        // The path is never empty once created.
        self.context_uuid_path.last().copied().unwrap_or_default()
    }

    fn save(&self, txn: &mut Transaction<'_>) -> Result<()> {
        txn.put_signature_request(SignatureRequest::Unpacked(self.clone()))
    }

    /// Add a statement and the not yet signed part of its dependency closure.
    ///
    /// Dependencies whose authority already has `signed_dependencies` are not
    /// added, and neither is anything reachable only through them. Unauthored
    /// dependencies are added. Dependencies outside the request's context are
    /// not requested; packing still carries them as data. Returns the newly
    /// added UUIDs.
    pub fn add_statement(
        &mut self,
        txn: &mut Transaction<'_>,
        statement_uuid: Uuid,
    ) -> Result<BTreeSet<Uuid>> {
        statement::load(&**txn, statement_uuid)?;
        let context = self.context_uuid();
        if statement_uuid == context || !statement::is_inside(&**txn, statement_uuid, context)? {
            return Err(RequestError::StatementOutsideContext {
                statement: statement_uuid,
                context,
            }
            .into());
        }

        let mut added = BTreeSet::new();
        let mut stack = vec![statement_uuid];
        let mut first = true;
        while let Some(uuid) = stack.pop() {
            let is_target = std::mem::take(&mut first);
            if self.statement_uuids.contains(&uuid) || self.context_uuid_path.contains(&uuid) {
                continue;
            }
            if !is_target {
                let signed = txn
                    .get_authority(uuid)?
                    .is_some_and(|authority| authority.signed_dependencies);
                if signed || !statement::is_inside(&**txn, uuid, context)? {
                    continue;
                }
            }
            let statement = statement::load(&**txn, uuid)?;
            self.statement_uuids.insert(uuid);
            added.insert(uuid);
            stack.extend(statement.dependencies.iter().copied());
        }
        self.save(txn)?;
        debug!(request = %self.uuid, added = added.len(), "Added statements to signature request");
        Ok(added)
    }

    /// Remove a statement. Returns whether it was listed.
    pub fn remove_statement(&mut self, txn: &mut Transaction<'_>, statement_uuid: Uuid) -> Result<bool> {
        let removed = self.statement_uuids.remove(&statement_uuid);
        if removed {
            self.save(txn)?;
            debug!(request = %self.uuid, statement = %statement_uuid, "Removed statement from signature request");
        }
        Ok(removed)
    }

    /// Add what a co-signer needs to establish `signed_proof` for the listed
    /// statements.
    ///
    /// Walks dependencies and, for contexts without a solver that already has
    /// `signed_proof`, one proved solver. Proved statements lacking
    /// `signed_proof` are added unless an enclosing context is already listed.
    /// Returns the newly added UUIDs.
    pub fn complete_missing_for_signed_proof_request(
        &mut self,
        txn: &mut Transaction<'_>,
    ) -> Result<BTreeSet<Uuid>> {
        let mut added = BTreeSet::new();
        let mut visited = BTreeSet::new();
        let mut stack: Vec<Uuid> = self.statement_uuids.iter().copied().collect();
        while let Some(uuid) = stack.pop() {
            if !visited.insert(uuid) || self.context_uuid_path.contains(&uuid) {
                continue;
            }
            if has_signed_proof(&**txn, uuid)? {
                continue;
            }
            let statement = statement::load(&**txn, uuid)?;
            if statement.proved
                && !self.statement_uuids.contains(&uuid)
                && !self.inside_listed_context(&**txn, &statement)?
            {
                self.statement_uuids.insert(uuid);
                added.insert(uuid);
            }
            stack.extend(statement.dependencies.iter().copied());
            if statement.is_context() {
                if let Some(solver) = missing_solver(&**txn, &statement)? {
                    stack.push(solver);
                }
            }
        }
        if !added.is_empty() {
            self.save(txn)?;
        }
        debug!(request = %self.uuid, added = added.len(), "Completed signature request for signed proof");
        Ok(added)
    }

    fn inside_listed_context(&self, txn: &dyn BackendTransaction, statement: &Statement) -> Result<bool> {
        let mut current = statement.context_uuid;
        while let Some(uuid) = current {
            if self.statement_uuids.contains(&uuid) {
                return Ok(true);
            }
            current = match txn.get_statement(uuid)? {
                Some(context) => context.context_uuid,
                None => None,
            };
        }
        Ok(false)
    }
}

fn has_signed_proof(txn: &dyn BackendTransaction, uuid: Uuid) -> Result<bool> {
    Ok(txn
        .get_authority(uuid)?
        .is_some_and(|authority| authority.signed_proof))
}

/// A proved solver to request when no solver of `context` has a signed proof.
fn missing_solver(txn: &dyn BackendTransaction, context: &Statement) -> Result<Option<Uuid>> {
    let solvers = statement::solvers(txn, context)?;
    for solver in &solvers {
        if has_signed_proof(txn, solver.uuid)? {
            return Ok(None);
        }
    }
    Ok(solvers
        .into_iter()
        .find(|solver| solver.proved)
        .map(|solver| solver.uuid))
}
