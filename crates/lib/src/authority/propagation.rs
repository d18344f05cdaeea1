//! Incremental maintenance of `signed_dependencies` and `signed_proof`.
//!
//! Both flags are recomputed locally from a statement's dependencies (and, for
//! proof, its solvers) by deduplicated worklists seeded with the statements
//! whose inputs changed. A statement is only re-enqueued when it is not already
//! pending, so a pass touches the statements whose flag actually changes plus
//! their direct upward neighbours.
//!
//! Losing `signed_proof` is handled in two phases. [`reset_signed_proof`] first
//! clears the flag eagerly upward (through dependents and through the
//! contexts whose consequent is the statement's term), then
//! [`update_signed_proof`] re-establishes every flag that is still justified.
//! Clearing first keeps mutually supporting statements from justifying each
//! other.

use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};

use tracing::{debug, trace};
use uuid::Uuid;

use crate::backend::{AuthorityStore, BackendTransaction, StatementStore};
use crate::events::AuthorityEvent;
use crate::{Result, Statement, Transaction, statement};

/// Outcome of a `signed_dependencies` pass.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DependencyChanges {
    pub gained: BTreeSet<Uuid>,
    pub lost: BTreeSet<Uuid>,
}

/// Worklist that never holds the same statement twice.
#[derive(Default)]
struct Worklist {
    queue: VecDeque<Uuid>,
    pending: HashSet<Uuid>,
}

impl Worklist {
    fn push(&mut self, uuid: Uuid) {
        if self.pending.insert(uuid) {
            self.queue.push_back(uuid);
        }
    }

    fn extend(&mut self, uuids: impl IntoIterator<Item = Uuid>) {
        for uuid in uuids {
            self.push(uuid);
        }
    }

    fn pop(&mut self) -> Option<Uuid> {
        let uuid = self.queue.pop_front()?;
        self.pending.remove(&uuid);
        Some(uuid)
    }
}

/// Propagate a change of `valid_signature` on `changed`.
pub fn refresh(txn: &mut Transaction<'_>, changed: &[Uuid]) -> Result<()> {
    let changes = update_signed_dependencies(txn, changed.iter().copied())?;
    let origins: Vec<Uuid> = changes.lost.iter().copied().collect();
    let cleared = reset_signed_proof(txn, &origins)?;
    update_signed_proof(txn, changes.gained.into_iter().chain(cleared))
}

/// Propagate the removal of `statement`'s authority.
pub fn authority_removed(
    txn: &mut Transaction<'_>,
    statement: &Statement,
    had_signed_proof: bool,
) -> Result<()> {
    let dependents = txn.dependents(statement.uuid)?;
    let changes = update_signed_dependencies(txn, dependents)?;
    let mut origins: Vec<Uuid> = changes.lost.iter().copied().collect();
    if had_signed_proof {
        origins.push(statement.uuid);
    }
    let cleared = reset_signed_proof(txn, &origins)?;
    update_signed_proof(txn, changes.gained.into_iter().chain(cleared))
}

fn has_signed_dependencies(txn: &dyn BackendTransaction, uuid: Uuid) -> Result<bool> {
    Ok(txn
        .get_authority(uuid)?
        .is_some_and(|a| a.signed_dependencies))
}

fn has_signed_proof(txn: &dyn BackendTransaction, uuid: Uuid) -> Result<bool> {
    Ok(txn.get_authority(uuid)?.is_some_and(|a| a.signed_proof))
}

/// Recompute `signed_dependencies` starting from `seeds`.
pub fn update_signed_dependencies(
    txn: &mut Transaction<'_>,
    seeds: impl IntoIterator<Item = Uuid>,
) -> Result<DependencyChanges> {
    let mut worklist = Worklist::default();
    worklist.extend(seeds);
    let mut original: HashMap<Uuid, bool> = HashMap::new();

    while let Some(uuid) = worklist.pop() {
        let Some(mut authority) = txn.get_authority(uuid)? else {
            continue;
        };
        let Some(statement) = txn.get_statement(uuid)? else {
            continue;
        };
        let mut value = authority.valid_signature;
        if value {
            for dep in &statement.dependencies {
                if !has_signed_dependencies(&**txn, *dep)? {
                    value = false;
                    break;
                }
            }
        }
        if value == authority.signed_dependencies {
            continue;
        }
        original
            .entry(uuid)
            .or_insert(authority.signed_dependencies);
        authority.signed_dependencies = value;
        txn.put_authority(authority)?;
        trace!(statement = %uuid, value, "signed_dependencies changed");
        txn.emit(AuthorityEvent::SignedDependenciesChanged {
            statement_uuid: uuid,
            value,
        });
        worklist.extend(txn.dependents(uuid)?);
    }

    let mut changes = DependencyChanges::default();
    for (uuid, before) in original {
        let now = has_signed_dependencies(&**txn, uuid)?;
        match (before, now) {
            (false, true) => {
                changes.gained.insert(uuid);
            }
            (true, false) => {
                changes.lost.insert(uuid);
            }
            _ => {}
        }
    }
    debug!(
        gained = changes.gained.len(),
        lost = changes.lost.len(),
        "signed_dependencies pass finished"
    );
    Ok(changes)
}

/// Recompute `signed_proof` starting from `seeds`.
pub fn update_signed_proof(
    txn: &mut Transaction<'_>,
    seeds: impl IntoIterator<Item = Uuid>,
) -> Result<()> {
    let mut worklist = Worklist::default();
    worklist.extend(seeds);
    let mut changed = 0usize;

    while let Some(uuid) = worklist.pop() {
        let Some(mut authority) = txn.get_authority(uuid)? else {
            continue;
        };
        let Some(statement) = txn.get_statement(uuid)? else {
            continue;
        };
        let value = compute_signed_proof(&**txn, &statement, authority.signed_dependencies)?;
        if value == authority.signed_proof {
            continue;
        }
        authority.signed_proof = value;
        txn.put_authority(authority)?;
        changed += 1;
        trace!(statement = %uuid, value, "signed_proof changed");
        txn.emit(AuthorityEvent::SignedProofChanged {
            statement_uuid: uuid,
            value,
        });
        worklist.extend(upward_neighbours(&**txn, &statement)?);
    }
    debug!(changed, "signed_proof pass finished");
    Ok(())
}

fn compute_signed_proof(
    txn: &dyn BackendTransaction,
    statement: &Statement,
    signed_dependencies: bool,
) -> Result<bool> {
    if !signed_dependencies {
        return Ok(false);
    }
    for dep in &statement.dependencies {
        if !has_signed_proof(txn, *dep)? {
            return Ok(false);
        }
    }
    if !statement.is_context() {
        return Ok(true);
    }
    for solver in statement::solvers(txn, statement)? {
        if has_signed_proof(txn, solver.uuid)? {
            return Ok(true);
        }
    }
    Ok(false)
}

/// Dependents plus the contexts the statement can solve.
fn upward_neighbours(txn: &dyn BackendTransaction, statement: &Statement) -> Result<Vec<Uuid>> {
    let mut neighbours = txn.dependents(statement.uuid)?;
    if let Some(context) = statement.context_uuid {
        neighbours.extend(solvable_contexts(txn, context, &statement.term)?);
    }
    Ok(neighbours)
}

/// `context` itself when its consequent is `term`, and the contexts nested in
/// it with that consequent.
fn solvable_contexts(txn: &dyn BackendTransaction, context: Uuid, term: &str) -> Result<Vec<Uuid>> {
    let mut contexts = Vec::new();
    if let Some(statement) = txn.get_statement(context)? {
        if statement.consequent.as_deref() == Some(term) {
            contexts.push(context);
        }
    }
    contexts.extend(txn.descendant_contexts_by_consequent(context, term)?);
    Ok(contexts)
}

/// Clear `signed_proof` upward from `origins`.
///
/// Origins are always expanded; other statements are expanded only if they
/// had a signed proof. Before clearing at least
/// `descendant_context_reset_threshold` solvable contexts of one statement,
/// a safe alternative with the same term visible from its context is searched
/// for; if one exists those contexts keep a signed solver and are skipped.
///
/// Returns the statements whose flag was cleared.
pub fn reset_signed_proof(txn: &mut Transaction<'_>, origins: &[Uuid]) -> Result<BTreeSet<Uuid>> {
    let threshold = txn.manager().config().descendant_context_reset_threshold;
    let mut queue: VecDeque<(Uuid, bool)> = origins.iter().map(|uuid| (*uuid, true)).collect();
    let mut visited = HashSet::new();
    let mut cleared = BTreeSet::new();

    while let Some((uuid, force)) = queue.pop_front() {
        if !visited.insert(uuid) {
            continue;
        }
        let mut had_proof = false;
        if let Some(mut authority) = txn.get_authority(uuid)? {
            if authority.signed_proof {
                had_proof = true;
                authority.signed_proof = false;
                txn.put_authority(authority)?;
                cleared.insert(uuid);
                txn.emit(AuthorityEvent::SignedProofChanged {
                    statement_uuid: uuid,
                    value: false,
                });
            }
        }
        if !(had_proof || force) {
            continue;
        }
        let Some(statement) = txn.get_statement(uuid)? else {
            continue;
        };

        for dependent in txn.dependents(uuid)? {
            queue.push_back((dependent, false));
        }
        let Some(context) = statement.context_uuid else {
            continue;
        };
        let contexts = solvable_contexts(&**txn, context, &statement.term)?;
        if contexts.len() >= threshold
            && SafetyCheck::new(&statement, context).has_safe_alternative(&**txn)?
        {
            debug!(
                statement = %uuid,
                skipped = contexts.len(),
                "Safe alternative found; skipping descendant context reset"
            );
            continue;
        }
        for ctx in contexts {
            queue.push_back((ctx, false));
        }
    }
    debug!(cleared = cleared.len(), "signed_proof reset finished");
    Ok(cleared)
}

/// Search for a statement that keeps a signed proof regardless of a reset.
struct SafetyCheck<'a> {
    origin: &'a Statement,
    origin_context: Uuid,
    memo: HashMap<Uuid, bool>,
}

impl<'a> SafetyCheck<'a> {
    fn new(origin: &'a Statement, origin_context: Uuid) -> Self {
        Self {
            origin,
            origin_context,
            memo: HashMap::new(),
        }
    }

    /// A statement other than the origin with the origin's term, in the origin's
    /// context or one of its ancestors, that is safe.
    fn has_safe_alternative(&mut self, txn: &dyn BackendTransaction) -> Result<bool> {
        let mut current = Some(self.origin_context);
        while let Some(context) = current {
            for candidate in txn.statements_by_term(context, &self.origin.term)? {
                if candidate != self.origin.uuid && self.is_safe(txn, candidate)? {
                    return Ok(true);
                }
            }
            current = statement::load(txn, context)?.context_uuid;
        }
        Ok(false)
    }

    /// Safe: signed proof, outside the origin, all dependencies safe and, for
    /// contexts, one safe solver outside the origin or its context.
    fn is_safe(&mut self, txn: &dyn BackendTransaction, uuid: Uuid) -> Result<bool> {
        if let Some(known) = self.memo.get(&uuid) {
            return Ok(*known);
        }
        // Cycles resolve to unsafe.
        self.memo.insert(uuid, false);

        let safe = self.compute_safe(txn, uuid)?;
        self.memo.insert(uuid, safe);
        Ok(safe)
    }

    fn compute_safe(&mut self, txn: &dyn BackendTransaction, uuid: Uuid) -> Result<bool> {
        if uuid == self.origin.uuid || statement::is_inside(txn, uuid, self.origin.uuid)? {
            return Ok(false);
        }
        if !has_signed_proof(txn, uuid)? {
            return Ok(false);
        }
        let Some(statement) = txn.get_statement(uuid)? else {
            return Ok(false);
        };
        for dep in &statement.dependencies {
            if !self.is_safe(txn, *dep)? {
                return Ok(false);
            }
        }
        if !statement.is_context() {
            return Ok(true);
        }
        for solver in statement::solvers(txn, &statement)? {
            let outside = !statement::is_inside(txn, solver.uuid, self.origin.uuid)?
                || !statement::is_inside(txn, solver.uuid, self.origin_context)?;
            if outside && self.is_safe(txn, solver.uuid)? {
                return Ok(true);
            }
        }
        Ok(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn worklist_deduplicates_pending_entries() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let mut worklist = Worklist::default();
        worklist.extend([a, b, a]);
        assert_eq!(worklist.pop(), Some(a));
        worklist.push(b);
        worklist.push(a);
        assert_eq!(worklist.pop(), Some(b));
        assert_eq!(worklist.pop(), Some(a));
        assert_eq!(worklist.pop(), None);
    }
}
