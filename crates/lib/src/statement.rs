//! Statements as seen by the authority layer.
//!
//! The statement language (terms, parsing, proof checking) lives outside this
//! crate. The authority core only needs a statement's place in the context
//! hierarchy, its identifier, its rendered term, its dependencies and whether the
//! statement layer considers it proved. [`Statement`] is that projection; the
//! statement layer writes it through [`StatementStore`](crate::backend::StatementStore).

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::Namespace;
use crate::backend::BackendTransaction;
use crate::{Result, backend::BackendError};

/// The kind of a statement node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StatementKind {
    /// Any non-context statement (assumption, declaration, specialization, ...).
    Statement,
    /// A nested context that can contain statements.
    Context,
    /// A top-level, authorship-bearing context.
    RootContext,
}

/// The authority layer's view of a statement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Statement {
    pub uuid: Uuid,
    /// Enclosing context, `None` only for root contexts.
    pub context_uuid: Option<Uuid>,
    pub kind: StatementKind,
    /// Local identifier inside the enclosing context.
    pub identifier: Option<Namespace>,
    /// Canonical rendering of the statement's term.
    pub term: String,
    /// Canonical rendering of the consequent (contexts only).
    pub consequent: Option<String>,
    pub dependencies: BTreeSet<Uuid>,
    /// Whether the statement layer considers this statement proved.
    pub proved: bool,
}

/// Fields of a statement that its authority signatures cover.
#[derive(Serialize)]
pub(crate) struct StatementContent<'a> {
    uuid: &'a Uuid,
    context_uuid: &'a Option<Uuid>,
    kind: StatementKind,
    identifier: Option<String>,
    term: &'a str,
    consequent: &'a Option<String>,
    dependencies: &'a BTreeSet<Uuid>,
}

impl Statement {
    /// A new top-level context.
    pub fn root_context(term: impl Into<String>, consequent: impl Into<String>) -> Self {
        Self {
            uuid: Uuid::new_v4(),
            context_uuid: None,
            kind: StatementKind::RootContext,
            identifier: None,
            term: term.into(),
            consequent: Some(consequent.into()),
            dependencies: BTreeSet::new(),
            proved: false,
        }
    }

    /// A new context nested in `parent`.
    pub fn context(
        parent: &Statement,
        term: impl Into<String>,
        consequent: impl Into<String>,
    ) -> Self {
        Self {
            uuid: Uuid::new_v4(),
            context_uuid: Some(parent.uuid),
            kind: StatementKind::Context,
            identifier: None,
            term: term.into(),
            consequent: Some(consequent.into()),
            dependencies: BTreeSet::new(),
            proved: false,
        }
    }

    /// A new non-context statement inside `context`.
    pub fn new(context: &Statement, term: impl Into<String>) -> Self {
        Self {
            uuid: Uuid::new_v4(),
            context_uuid: Some(context.uuid),
            kind: StatementKind::Statement,
            identifier: None,
            term: term.into(),
            consequent: None,
            dependencies: BTreeSet::new(),
            proved: false,
        }
    }

    pub fn with_identifier(mut self, identifier: Namespace) -> Self {
        self.identifier = Some(identifier);
        self
    }

    pub fn with_dependencies<'a>(mut self, deps: impl IntoIterator<Item = &'a Statement>) -> Self {
        self.dependencies.extend(deps.into_iter().map(|s| s.uuid));
        self
    }

    pub fn with_proved(mut self, proved: bool) -> Self {
        self.proved = proved;
        self
    }

    pub fn is_context(&self) -> bool {
        matches!(self.kind, StatementKind::Context | StatementKind::RootContext)
    }

    pub fn is_root_context(&self) -> bool {
        self.kind == StatementKind::RootContext
    }

    /// The namespace used to look up delegate authorizers: the identifier, or the
    /// root namespace for unidentified statements.
    pub fn prefix(&self) -> Namespace {
        self.identifier.clone().unwrap_or_default()
    }

    pub(crate) fn content(&self) -> StatementContent<'_> {
        StatementContent {
            uuid: &self.uuid,
            context_uuid: &self.context_uuid,
            kind: self.kind,
            identifier: self.identifier.as_ref().map(ToString::to_string),
            term: &self.term,
            consequent: &self.consequent,
            dependencies: &self.dependencies,
        }
    }
}

/// Load a statement or fail with `StatementNotFound`.
pub fn load(txn: &dyn BackendTransaction, uuid: Uuid) -> Result<Statement> {
    txn.get_statement(uuid)?
        .ok_or_else(|| BackendError::StatementNotFound { uuid }.into())
}

/// The chain of contexts from the root context down to `context_uuid` inclusive.
pub fn context_path(txn: &dyn BackendTransaction, context_uuid: Uuid) -> Result<Vec<Statement>> {
    let mut path = Vec::new();
    let mut current = Some(context_uuid);
    while let Some(uuid) = current {
        let statement = load(txn, uuid)?;
        current = statement.context_uuid;
        path.push(statement);
    }
    path.reverse();
    Ok(path)
}

/// Whether `statement_uuid` is `ancestor_uuid` or lies (transitively) inside it.
pub fn is_inside(
    txn: &dyn BackendTransaction,
    statement_uuid: Uuid,
    ancestor_uuid: Uuid,
) -> Result<bool> {
    let mut current = Some(statement_uuid);
    while let Some(uuid) = current {
        if uuid == ancestor_uuid {
            return Ok(true);
        }
        current = match txn.get_statement(uuid)? {
            Some(statement) => statement.context_uuid,
            None => None,
        };
    }
    Ok(false)
}

/// Statements that can solve `context`: same term as its consequent, living in the
/// context itself or one of its ancestors, other than the context and not directly
/// depending on it.
pub fn solvers(txn: &dyn BackendTransaction, context: &Statement) -> Result<Vec<Statement>> {
    let Some(consequent) = context.consequent.as_deref() else {
        return Ok(Vec::new());
    };
    let mut solvers = Vec::new();
    let mut current = Some(context.uuid);
    while let Some(ctx) = current {
        for uuid in txn.statements_by_term(ctx, consequent)? {
            if uuid == context.uuid {
                continue;
            }
            let candidate = load(txn, uuid)?;
            if !candidate.dependencies.contains(&context.uuid) {
                solvers.push(candidate);
            }
        }
        current = if ctx == context.uuid {
            context.context_uuid
        } else {
            load(txn, ctx)?.context_uuid
        };
    }
    Ok(solvers)
}
