//! Persistence collaborator interface.
//!
//! The authority core never talks to a storage engine directly. It works against
//! a [`BackendTransaction`]: one repository trait per entity kind with typed
//! primary-key access and the secondary-index queries the core needs (by author,
//! by context, by authorizer, by delegate, by prefix, by successor, by orphan
//! timestamp). Any ordered key-value store or relational engine can implement it.
//!
//! A [`Backend`] hands out transactions. Writes made through a transaction are
//! only visible to it until [`BackendTransaction::commit`]; dropping a transaction
//! without committing discards its writes. The backend is the sole serialization
//! point: this crate assumes single-writer-per-transaction semantics.
//!
//! [`InMemory`] is the reference implementation.

use std::any::Any;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::authority::{StatementAuthority, StatementAuthoritySignature};
use crate::delegate::{DelegateAuthorizer, DelegateTreeNode};
use crate::person::Person;
use crate::request::SignatureRequest;
use crate::signatory::SignatoryRecord;
use crate::{Namespace, Result, Statement};

mod errors;
pub mod in_memory;

pub use errors::BackendError;
pub use in_memory::InMemory;

/// Storage of signatory key material.
pub trait SignatoryStore {
    fn get_signatory(&self, uuid: Uuid) -> Result<Option<SignatoryRecord>>;

    /// Insert or replace a signatory.
    fn put_signatory(&mut self, record: SignatoryRecord) -> Result<()>;

    /// Insert a signatory unless one with the same UUID exists; returns whether it was inserted.
    fn put_signatory_no_overwrite(&mut self, record: SignatoryRecord) -> Result<bool>;

    fn delete_signatory(&mut self, uuid: Uuid) -> Result<()>;
}

/// Storage of persons.
pub trait PersonStore {
    fn get_person(&self, uuid: Uuid) -> Result<Option<Person>>;

    fn put_person(&mut self, person: Person) -> Result<()>;

    fn put_person_no_overwrite(&mut self, person: Person) -> Result<bool>;

    fn delete_person(&mut self, uuid: Uuid) -> Result<()>;

    /// Persons carrying the given nick.
    fn persons_by_nick(&self, nick: &str) -> Result<Vec<Person>>;

    /// Orphan persons whose `orphan_since` is strictly before `date`, oldest first.
    fn orphans_since_before(&self, date: DateTime<Utc>) -> Result<Vec<Person>>;

    fn all_persons(&self) -> Result<Vec<Person>>;
}

/// Storage of the statement projection written by the statement layer.
pub trait StatementStore {
    fn get_statement(&self, uuid: Uuid) -> Result<Option<Statement>>;

    fn put_statement(&mut self, statement: Statement) -> Result<()>;

    fn put_statement_no_overwrite(&mut self, statement: Statement) -> Result<bool>;

    fn delete_statement(&mut self, uuid: Uuid) -> Result<()>;

    /// Statements listing `uuid` among their dependencies.
    fn dependents(&self, uuid: Uuid) -> Result<Vec<Uuid>>;

    /// Statements directly contained in `context`.
    fn local_statements(&self, context: Uuid) -> Result<Vec<Uuid>>;

    /// Statements directly contained in `context` whose term equals `term`.
    fn statements_by_term(&self, context: Uuid, term: &str) -> Result<Vec<Uuid>>;

    /// Contexts nested (at any depth) inside `context` whose consequent equals `consequent`.
    fn descendant_contexts_by_consequent(
        &self,
        context: Uuid,
        consequent: &str,
    ) -> Result<Vec<Uuid>> {
        let mut found = Vec::new();
        let mut stack = vec![context];
        while let Some(ctx) = stack.pop() {
            for uuid in self.local_statements(ctx)? {
                let Some(statement) = self.get_statement(uuid)? else {
                    continue;
                };
                if statement.is_context() {
                    if statement.consequent.as_deref() == Some(consequent) {
                        found.push(uuid);
                    }
                    stack.push(uuid);
                }
            }
        }
        Ok(found)
    }
}

/// Storage of statement authorities.
pub trait AuthorityStore {
    fn get_authority(&self, statement_uuid: Uuid) -> Result<Option<StatementAuthority>>;

    fn put_authority(&mut self, authority: StatementAuthority) -> Result<()>;

    fn delete_authority(&mut self, statement_uuid: Uuid) -> Result<()>;

    /// Statements authored by `author`.
    fn authorities_by_author(&self, author: Uuid) -> Result<Vec<Uuid>>;

    /// Authorities of statements directly contained in `context`.
    fn authorities_by_context(&self, context: Uuid) -> Result<Vec<StatementAuthority>>;
}

/// Storage of authority signatures, keyed by (statement, authorizer).
pub trait SignatureStore {
    fn get_signature(
        &self,
        statement_uuid: Uuid,
        authorizer_uuid: Uuid,
    ) -> Result<Option<StatementAuthoritySignature>>;

    fn put_signature(&mut self, signature: StatementAuthoritySignature) -> Result<()>;

    fn delete_signature(&mut self, statement_uuid: Uuid, authorizer_uuid: Uuid) -> Result<()>;

    fn signatures_by_statement(
        &self,
        statement_uuid: Uuid,
    ) -> Result<Vec<StatementAuthoritySignature>>;

    /// Signatures by `authorizer` on statements directly contained in `context`.
    fn signatures_by_context_and_authorizer(
        &self,
        context: Uuid,
        authorizer_uuid: Uuid,
    ) -> Result<Vec<StatementAuthoritySignature>>;

    fn signatures_by_authorizer(
        &self,
        authorizer_uuid: Uuid,
    ) -> Result<Vec<StatementAuthoritySignature>>;
}

/// Storage of delegate tree nodes and their authorizers.
pub trait DelegateStore {
    fn get_delegate_node(
        &self,
        statement_uuid: Uuid,
        prefix: &Namespace,
    ) -> Result<Option<DelegateTreeNode>>;

    fn put_delegate_node(&mut self, node: DelegateTreeNode) -> Result<()>;

    fn delete_delegate_node(&mut self, statement_uuid: Uuid, prefix: &Namespace) -> Result<()>;

    /// Every node of the statement's tree, ordered by prefix.
    fn delegate_nodes_by_statement(&self, statement_uuid: Uuid) -> Result<Vec<DelegateTreeNode>>;

    /// Direct children of the node at `prefix`, ordered by prefix.
    fn delegate_children(
        &self,
        statement_uuid: Uuid,
        prefix: &Namespace,
    ) -> Result<Vec<DelegateTreeNode>>;

    /// Statements whose root node lists `person` in its successor chain.
    fn root_nodes_by_successor(&self, person: Uuid) -> Result<Vec<Uuid>>;

    fn get_delegate_authorizer(
        &self,
        statement_uuid: Uuid,
        prefix: &Namespace,
        delegate_uuid: Uuid,
    ) -> Result<Option<DelegateAuthorizer>>;

    fn put_delegate_authorizer(&mut self, authorizer: DelegateAuthorizer) -> Result<()>;

    fn delete_delegate_authorizer(
        &mut self,
        statement_uuid: Uuid,
        prefix: &Namespace,
        delegate_uuid: Uuid,
    ) -> Result<()>;

    /// Authorizers attached to the node at `prefix`, ordered by delegate.
    fn authorizers_by_node(
        &self,
        statement_uuid: Uuid,
        prefix: &Namespace,
    ) -> Result<Vec<DelegateAuthorizer>>;

    /// Authorizers naming `person` as delegate.
    fn authorizers_by_delegate(&self, person: Uuid) -> Result<Vec<DelegateAuthorizer>>;

    /// Authorizers of the node at `prefix` whose authorizing signatory is `authorizer_uuid`.
    fn authorizers_by_prefix_and_authorizer(
        &self,
        statement_uuid: Uuid,
        prefix: &Namespace,
        authorizer_uuid: Uuid,
    ) -> Result<Vec<DelegateAuthorizer>>;
}

/// Storage of signature requests.
pub trait RequestStore {
    fn get_signature_request(&self, uuid: Uuid) -> Result<Option<SignatureRequest>>;

    fn put_signature_request(&mut self, request: SignatureRequest) -> Result<()>;

    fn delete_signature_request(&mut self, uuid: Uuid) -> Result<()>;

    /// Unpacked requests listing `statement_uuid` among their statements.
    fn requests_by_statement(&self, statement_uuid: Uuid) -> Result<Vec<Uuid>>;

    /// Requests whose context path ends at `context`.
    fn requests_by_context(&self, context: Uuid) -> Result<Vec<SignatureRequest>>;

    fn all_signature_requests(&self) -> Result<Vec<SignatureRequest>>;
}

/// A unit of work against the persistence collaborator.
pub trait BackendTransaction:
    SignatoryStore
    + PersonStore
    + StatementStore
    + AuthorityStore
    + SignatureStore
    + DelegateStore
    + RequestStore
{
    /// Make this transaction's writes visible, or fail without applying any of them.
    fn commit(self: Box<Self>) -> Result<()>;
}

/// A storage engine able to open transactions.
///
/// Implementations must be `Send` and `Sync` so a manager can be shared across
/// threads, and implement `Any` to allow downcasting (e.g. to save an [`InMemory`]
/// store to disk).
pub trait Backend: Send + Sync + Any {
    /// Begin a new transaction.
    fn begin(&self) -> Result<Box<dyn BackendTransaction + '_>>;

    /// Returns a reference to the backend as `Any` for downcasting.
    fn as_any(&self) -> &dyn Any;
}
