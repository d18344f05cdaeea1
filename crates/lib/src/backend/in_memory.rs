//! In-memory persistence collaborator.
//!
//! [`InMemory`] keeps every table in ordered maps behind a single lock. A
//! transaction works on a private snapshot of the tables and publishes it on
//! commit, failing with [`BackendError::TransactionConflict`] when another
//! transaction committed writes in the meantime.
//!
//! The whole store can be saved to and loaded from a JSON file.
//!
//! **Security Note**: plain-storage signatories keep their private keys
//! unencrypted in memory and in saved files. Use encrypted storage for keys that
//! must be protected at rest.

use std::any::Any;
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::Path;
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;

use super::{
    AuthorityStore, Backend, BackendError, BackendTransaction, DelegateStore, PersonStore,
    RequestStore, SignatoryStore, SignatureStore, StatementStore,
};
use crate::authority::{StatementAuthority, StatementAuthoritySignature};
use crate::delegate::{DelegateAuthorizer, DelegateNodeKind, DelegateTreeNode};
use crate::person::Person;
use crate::request::SignatureRequest;
use crate::signatory::SignatoryRecord;
use crate::{Namespace, Result, Statement};

/// The current persistence file format version.
/// v0 indicates this is an unstable format subject to breaking changes.
const PERSISTENCE_VERSION: u8 = 0;

type SignatureKey = (Uuid, Uuid);
type NodeKey = (Uuid, Namespace);
type AuthorizerKey = (Uuid, Namespace, Uuid);

#[derive(Debug, Clone, Default)]
struct Tables {
    signatories: BTreeMap<Uuid, SignatoryRecord>,
    persons: BTreeMap<Uuid, Person>,
    statements: BTreeMap<Uuid, Statement>,
    /// dependency -> statements depending on it
    dependents: BTreeMap<Uuid, BTreeSet<Uuid>>,
    /// context -> statements directly inside it
    locals: BTreeMap<Uuid, BTreeSet<Uuid>>,
    authorities: BTreeMap<Uuid, StatementAuthority>,
    signatures: BTreeMap<SignatureKey, StatementAuthoritySignature>,
    delegate_nodes: BTreeMap<NodeKey, DelegateTreeNode>,
    delegate_authorizers: BTreeMap<AuthorizerKey, DelegateAuthorizer>,
    requests: BTreeMap<Uuid, SignatureRequest>,
}

impl Tables {
    fn index_statement(&mut self, statement: &Statement) {
        for dep in &statement.dependencies {
            self.dependents
                .entry(*dep)
                .or_default()
                .insert(statement.uuid);
        }
        if let Some(context) = statement.context_uuid {
            self.locals.entry(context).or_default().insert(statement.uuid);
        }
    }

    fn unindex_statement(&mut self, statement: &Statement) {
        for dep in &statement.dependencies {
            if let Some(set) = self.dependents.get_mut(dep) {
                set.remove(&statement.uuid);
                if set.is_empty() {
                    self.dependents.remove(dep);
                }
            }
        }
        let Some(context) = statement.context_uuid else {
            return;
        };
        if let Some(set) = self.locals.get_mut(&context) {
            set.remove(&statement.uuid);
            if set.is_empty() {
                self.locals.remove(&context);
            }
        }
    }
}

#[derive(Debug, Default)]
struct Committed {
    version: u64,
    tables: Tables,
}

/// An in-memory [`Backend`] with snapshot transactions.
///
/// Suitable for tests, tools and embedding; persistence is whole-store via
/// [`save_to_file`](Self::save_to_file) and [`load_from_file`](Self::load_from_file).
#[derive(Debug, Default)]
pub struct InMemory {
    state: RwLock<Committed>,
}

impl InMemory {
    /// Creates a new, empty `InMemory` store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of commits that published writes.
    pub fn version(&self) -> u64 {
        self.state.read().unwrap_or_else(|e| e.into_inner()).version
    }

    /// Saves the committed state to a JSON file.
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let json = {
            let state = self.state.read().unwrap_or_else(|e| e.into_inner());
            serde_json::to_string_pretty(&SerializableStore::from_tables(&state.tables))
                .map_err(|source| BackendError::SerializationFailed { source })?
        };
        fs::write(path, json).map_err(|source| BackendError::FileIo { source })?;
        Ok(())
    }

    /// Loads a store from a JSON file.
    ///
    /// If the file does not exist, a new, empty store is returned.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Self::new());
        }
        let json = fs::read_to_string(path).map_err(|source| BackendError::FileIo { source })?;
        let stored: SerializableStore = serde_json::from_str(&json)
            .map_err(|source| BackendError::DeserializationFailed { source })?;
        Ok(Self {
            state: RwLock::new(Committed {
                version: 0,
                tables: stored.into_tables(),
            }),
        })
    }
}

impl Backend for InMemory {
    fn begin(&self) -> Result<Box<dyn BackendTransaction + '_>> {
        let state = self.state.read().unwrap_or_else(|e| e.into_inner());
        Ok(Box::new(InMemoryTransaction {
            backend: self,
            base_version: state.version,
            tables: state.tables.clone(),
            dirty: false,
        }))
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// A snapshot transaction over an [`InMemory`] store.
struct InMemoryTransaction<'a> {
    backend: &'a InMemory,
    base_version: u64,
    tables: Tables,
    dirty: bool,
}

impl BackendTransaction for InMemoryTransaction<'_> {
    fn commit(self: Box<Self>) -> Result<()> {
        if !self.dirty {
            return Ok(());
        }
        let mut state = self
            .backend
            .state
            .write()
            .unwrap_or_else(|e| e.into_inner());
        if state.version != self.base_version {
            return Err(BackendError::TransactionConflict.into());
        }
        state.tables = self.tables;
        state.version += 1;
        Ok(())
    }
}

impl SignatoryStore for InMemoryTransaction<'_> {
    fn get_signatory(&self, uuid: Uuid) -> Result<Option<SignatoryRecord>> {
        Ok(self.tables.signatories.get(&uuid).cloned())
    }

    fn put_signatory(&mut self, record: SignatoryRecord) -> Result<()> {
        self.dirty = true;
        self.tables.signatories.insert(record.uuid, record);
        Ok(())
    }

    fn put_signatory_no_overwrite(&mut self, record: SignatoryRecord) -> Result<bool> {
        if self.tables.signatories.contains_key(&record.uuid) {
            return Ok(false);
        }
        self.put_signatory(record)?;
        Ok(true)
    }

    fn delete_signatory(&mut self, uuid: Uuid) -> Result<()> {
        self.dirty = true;
        self.tables.signatories.remove(&uuid);
        Ok(())
    }
}

impl PersonStore for InMemoryTransaction<'_> {
    fn get_person(&self, uuid: Uuid) -> Result<Option<Person>> {
        Ok(self.tables.persons.get(&uuid).cloned())
    }

    fn put_person(&mut self, person: Person) -> Result<()> {
        self.dirty = true;
        self.tables.persons.insert(person.uuid, person);
        Ok(())
    }

    fn put_person_no_overwrite(&mut self, person: Person) -> Result<bool> {
        if self.tables.persons.contains_key(&person.uuid) {
            return Ok(false);
        }
        self.put_person(person)?;
        Ok(true)
    }

    fn delete_person(&mut self, uuid: Uuid) -> Result<()> {
        self.dirty = true;
        self.tables.persons.remove(&uuid);
        Ok(())
    }

    fn persons_by_nick(&self, nick: &str) -> Result<Vec<Person>> {
        Ok(self
            .tables
            .persons
            .values()
            .filter(|p| p.nick == nick)
            .cloned()
            .collect())
    }

    fn orphans_since_before(&self, date: DateTime<Utc>) -> Result<Vec<Person>> {
        let mut orphans: Vec<Person> = self
            .tables
            .persons
            .values()
            .filter(|p| p.orphan_since.is_some_and(|since| since < date))
            .cloned()
            .collect();
        orphans.sort_by_key(|p| p.orphan_since);
        Ok(orphans)
    }

    fn all_persons(&self) -> Result<Vec<Person>> {
        Ok(self.tables.persons.values().cloned().collect())
    }
}

impl StatementStore for InMemoryTransaction<'_> {
    fn get_statement(&self, uuid: Uuid) -> Result<Option<Statement>> {
        Ok(self.tables.statements.get(&uuid).cloned())
    }

    fn put_statement(&mut self, statement: Statement) -> Result<()> {
        self.dirty = true;
        if let Some(old) = self.tables.statements.remove(&statement.uuid) {
            self.tables.unindex_statement(&old);
        }
        self.tables.index_statement(&statement);
        self.tables.statements.insert(statement.uuid, statement);
        Ok(())
    }

    fn put_statement_no_overwrite(&mut self, statement: Statement) -> Result<bool> {
        if self.tables.statements.contains_key(&statement.uuid) {
            return Ok(false);
        }
        self.put_statement(statement)?;
        Ok(true)
    }

    fn delete_statement(&mut self, uuid: Uuid) -> Result<()> {
        self.dirty = true;
        if let Some(old) = self.tables.statements.remove(&uuid) {
            self.tables.unindex_statement(&old);
        }
        Ok(())
    }

    fn dependents(&self, uuid: Uuid) -> Result<Vec<Uuid>> {
        Ok(self
            .tables
            .dependents
            .get(&uuid)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default())
    }

    fn local_statements(&self, context: Uuid) -> Result<Vec<Uuid>> {
        Ok(self
            .tables
            .locals
            .get(&context)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default())
    }

    fn statements_by_term(&self, context: Uuid, term: &str) -> Result<Vec<Uuid>> {
        let Some(locals) = self.tables.locals.get(&context) else {
            return Ok(Vec::new());
        };
        Ok(locals
            .iter()
            .filter(|uuid| {
                self.tables
                    .statements
                    .get(uuid)
                    .is_some_and(|s| s.term == term)
            })
            .copied()
            .collect())
    }
}

impl AuthorityStore for InMemoryTransaction<'_> {
    fn get_authority(&self, statement_uuid: Uuid) -> Result<Option<StatementAuthority>> {
        Ok(self.tables.authorities.get(&statement_uuid).cloned())
    }

    fn put_authority(&mut self, authority: StatementAuthority) -> Result<()> {
        self.dirty = true;
        self.tables
            .authorities
            .insert(authority.statement_uuid, authority);
        Ok(())
    }

    fn delete_authority(&mut self, statement_uuid: Uuid) -> Result<()> {
        self.dirty = true;
        self.tables.authorities.remove(&statement_uuid);
        Ok(())
    }

    fn authorities_by_author(&self, author: Uuid) -> Result<Vec<Uuid>> {
        Ok(self
            .tables
            .authorities
            .values()
            .filter(|a| a.author_uuid == author)
            .map(|a| a.statement_uuid)
            .collect())
    }

    fn authorities_by_context(&self, context: Uuid) -> Result<Vec<StatementAuthority>> {
        Ok(self
            .tables
            .authorities
            .values()
            .filter(|a| a.context_uuid == Some(context))
            .cloned()
            .collect())
    }
}

impl SignatureStore for InMemoryTransaction<'_> {
    fn get_signature(
        &self,
        statement_uuid: Uuid,
        authorizer_uuid: Uuid,
    ) -> Result<Option<StatementAuthoritySignature>> {
        Ok(self
            .tables
            .signatures
            .get(&(statement_uuid, authorizer_uuid))
            .cloned())
    }

    fn put_signature(&mut self, signature: StatementAuthoritySignature) -> Result<()> {
        self.dirty = true;
        self.tables.signatures.insert(
            (signature.statement_uuid, signature.authorizer_uuid),
            signature,
        );
        Ok(())
    }

    fn delete_signature(&mut self, statement_uuid: Uuid, authorizer_uuid: Uuid) -> Result<()> {
        self.dirty = true;
        self.tables
            .signatures
            .remove(&(statement_uuid, authorizer_uuid));
        Ok(())
    }

    fn signatures_by_statement(
        &self,
        statement_uuid: Uuid,
    ) -> Result<Vec<StatementAuthoritySignature>> {
        Ok(self
            .tables
            .signatures
            .range((statement_uuid, Uuid::nil())..)
            .take_while(|((statement, _), _)| *statement == statement_uuid)
            .map(|(_, signature)| signature.clone())
            .collect())
    }

    fn signatures_by_context_and_authorizer(
        &self,
        context: Uuid,
        authorizer_uuid: Uuid,
    ) -> Result<Vec<StatementAuthoritySignature>> {
        Ok(self
            .tables
            .signatures
            .values()
            .filter(|s| s.context_uuid == Some(context) && s.authorizer_uuid == authorizer_uuid)
            .cloned()
            .collect())
    }

    fn signatures_by_authorizer(
        &self,
        authorizer_uuid: Uuid,
    ) -> Result<Vec<StatementAuthoritySignature>> {
        Ok(self
            .tables
            .signatures
            .values()
            .filter(|s| s.authorizer_uuid == authorizer_uuid)
            .cloned()
            .collect())
    }
}

impl DelegateStore for InMemoryTransaction<'_> {
    fn get_delegate_node(
        &self,
        statement_uuid: Uuid,
        prefix: &Namespace,
    ) -> Result<Option<DelegateTreeNode>> {
        Ok(self
            .tables
            .delegate_nodes
            .get(&(statement_uuid, prefix.clone()))
            .cloned())
    }

    fn put_delegate_node(&mut self, node: DelegateTreeNode) -> Result<()> {
        self.dirty = true;
        self.tables
            .delegate_nodes
            .insert((node.statement_uuid, node.prefix.clone()), node);
        Ok(())
    }

    fn delete_delegate_node(&mut self, statement_uuid: Uuid, prefix: &Namespace) -> Result<()> {
        self.dirty = true;
        self.tables
            .delegate_nodes
            .remove(&(statement_uuid, prefix.clone()));
        Ok(())
    }

    fn delegate_nodes_by_statement(&self, statement_uuid: Uuid) -> Result<Vec<DelegateTreeNode>> {
        Ok(self
            .tables
            .delegate_nodes
            .range((statement_uuid, Namespace::root())..)
            .take_while(|((statement, _), _)| *statement == statement_uuid)
            .map(|(_, node)| node.clone())
            .collect())
    }

    fn delegate_children(
        &self,
        statement_uuid: Uuid,
        prefix: &Namespace,
    ) -> Result<Vec<DelegateTreeNode>> {
        Ok(self
            .tables
            .delegate_nodes
            .range((statement_uuid, prefix.clone())..)
            .take_while(|((statement, p), _)| *statement == statement_uuid && prefix.is_prefix_of(p))
            .filter(|(_, node)| {
                matches!(&node.kind, DelegateNodeKind::Sub { parent } if parent == prefix)
            })
            .map(|(_, node)| node.clone())
            .collect())
    }

    fn root_nodes_by_successor(&self, person: Uuid) -> Result<Vec<Uuid>> {
        Ok(self
            .tables
            .delegate_nodes
            .values()
            .filter(|node| match &node.kind {
                DelegateNodeKind::Root(root) => root
                    .successor_entries
                    .iter()
                    .any(|entry| entry.successor_uuid == person),
                DelegateNodeKind::Sub { .. } => false,
            })
            .map(|node| node.statement_uuid)
            .collect())
    }

    fn get_delegate_authorizer(
        &self,
        statement_uuid: Uuid,
        prefix: &Namespace,
        delegate_uuid: Uuid,
    ) -> Result<Option<DelegateAuthorizer>> {
        Ok(self
            .tables
            .delegate_authorizers
            .get(&(statement_uuid, prefix.clone(), delegate_uuid))
            .cloned())
    }

    fn put_delegate_authorizer(&mut self, authorizer: DelegateAuthorizer) -> Result<()> {
        self.dirty = true;
        self.tables.delegate_authorizers.insert(
            (
                authorizer.statement_uuid,
                authorizer.prefix.clone(),
                authorizer.delegate_uuid,
            ),
            authorizer,
        );
        Ok(())
    }

    fn delete_delegate_authorizer(
        &mut self,
        statement_uuid: Uuid,
        prefix: &Namespace,
        delegate_uuid: Uuid,
    ) -> Result<()> {
        self.dirty = true;
        self.tables
            .delegate_authorizers
            .remove(&(statement_uuid, prefix.clone(), delegate_uuid));
        Ok(())
    }

    fn authorizers_by_node(
        &self,
        statement_uuid: Uuid,
        prefix: &Namespace,
    ) -> Result<Vec<DelegateAuthorizer>> {
        Ok(self
            .tables
            .delegate_authorizers
            .range((statement_uuid, prefix.clone(), Uuid::nil())..)
            .take_while(|((statement, p, _), _)| *statement == statement_uuid && p == prefix)
            .map(|(_, authorizer)| authorizer.clone())
            .collect())
    }

    fn authorizers_by_delegate(&self, person: Uuid) -> Result<Vec<DelegateAuthorizer>> {
        Ok(self
            .tables
            .delegate_authorizers
            .values()
            .filter(|a| a.delegate_uuid == person)
            .cloned()
            .collect())
    }

    fn authorizers_by_prefix_and_authorizer(
        &self,
        statement_uuid: Uuid,
        prefix: &Namespace,
        authorizer_uuid: Uuid,
    ) -> Result<Vec<DelegateAuthorizer>> {
        Ok(self
            .authorizers_by_node(statement_uuid, prefix)?
            .into_iter()
            .filter(|a| a.authorizer_uuid == Some(authorizer_uuid))
            .collect())
    }
}

impl RequestStore for InMemoryTransaction<'_> {
    fn get_signature_request(&self, uuid: Uuid) -> Result<Option<SignatureRequest>> {
        Ok(self.tables.requests.get(&uuid).cloned())
    }

    fn put_signature_request(&mut self, request: SignatureRequest) -> Result<()> {
        self.dirty = true;
        self.tables.requests.insert(request.uuid(), request);
        Ok(())
    }

    fn delete_signature_request(&mut self, uuid: Uuid) -> Result<()> {
        self.dirty = true;
        self.tables.requests.remove(&uuid);
        Ok(())
    }

    fn requests_by_statement(&self, statement_uuid: Uuid) -> Result<Vec<Uuid>> {
        Ok(self
            .tables
            .requests
            .values()
            .filter_map(|request| match request {
                SignatureRequest::Unpacked(unpacked)
                    if unpacked.statement_uuids.contains(&statement_uuid) =>
                {
                    Some(unpacked.uuid)
                }
                _ => None,
            })
            .collect())
    }

    fn requests_by_context(&self, context: Uuid) -> Result<Vec<SignatureRequest>> {
        Ok(self
            .tables
            .requests
            .values()
            .filter(|request| request.context_uuid() == Some(context))
            .cloned()
            .collect())
    }

    fn all_signature_requests(&self) -> Result<Vec<SignatureRequest>> {
        Ok(self.tables.requests.values().cloned().collect())
    }
}

/// Helper to check if version is default (0) for serde skip_serializing_if
fn is_v0(v: &u8) -> bool {
    *v == 0
}

/// Validates the persistence version during deserialization.
fn validate_persistence_version<'de, D>(deserializer: D) -> std::result::Result<u8, D::Error>
where
    D: Deserializer<'de>,
{
    let version = u8::deserialize(deserializer)?;
    if version != PERSISTENCE_VERSION {
        return Err(serde::de::Error::custom(format!(
            "unsupported persistence version {version}; only version {PERSISTENCE_VERSION} is supported"
        )));
    }
    Ok(version)
}

/// Serializable form of the committed tables.
///
/// Composite keys cannot be JSON object keys, so every table is stored as a list
/// and the secondary indexes are rebuilt on load.
#[derive(Serialize, Deserialize)]
struct SerializableStore {
    #[serde(
        rename = "_v",
        default,
        skip_serializing_if = "is_v0",
        deserialize_with = "validate_persistence_version"
    )]
    version: u8,
    #[serde(default)]
    signatories: Vec<SignatoryRecord>,
    #[serde(default)]
    persons: Vec<Person>,
    #[serde(default)]
    statements: Vec<Statement>,
    #[serde(default)]
    authorities: Vec<StatementAuthority>,
    #[serde(default)]
    signatures: Vec<StatementAuthoritySignature>,
    #[serde(default)]
    delegate_nodes: Vec<DelegateTreeNode>,
    #[serde(default)]
    delegate_authorizers: Vec<DelegateAuthorizer>,
    #[serde(default)]
    signature_requests: Vec<SignatureRequest>,
}

impl SerializableStore {
    fn from_tables(tables: &Tables) -> Self {
        Self {
            version: PERSISTENCE_VERSION,
            signatories: tables.signatories.values().cloned().collect(),
            persons: tables.persons.values().cloned().collect(),
            statements: tables.statements.values().cloned().collect(),
            authorities: tables.authorities.values().cloned().collect(),
            signatures: tables.signatures.values().cloned().collect(),
            delegate_nodes: tables.delegate_nodes.values().cloned().collect(),
            delegate_authorizers: tables.delegate_authorizers.values().cloned().collect(),
            signature_requests: tables.requests.values().cloned().collect(),
        }
    }

    fn into_tables(self) -> Tables {
        let mut tables = Tables {
            signatories: self.signatories.into_iter().map(|s| (s.uuid, s)).collect(),
            persons: self.persons.into_iter().map(|p| (p.uuid, p)).collect(),
            authorities: self
                .authorities
                .into_iter()
                .map(|a| (a.statement_uuid, a))
                .collect(),
            signatures: self
                .signatures
                .into_iter()
                .map(|s| ((s.statement_uuid, s.authorizer_uuid), s))
                .collect(),
            delegate_nodes: self
                .delegate_nodes
                .into_iter()
                .map(|n| ((n.statement_uuid, n.prefix.clone()), n))
                .collect(),
            delegate_authorizers: self
                .delegate_authorizers
                .into_iter()
                .map(|a| ((a.statement_uuid, a.prefix.clone(), a.delegate_uuid), a))
                .collect(),
            requests: self
                .signature_requests
                .into_iter()
                .map(|r| (r.uuid(), r))
                .collect(),
            ..Tables::default()
        };
        for statement in self.statements {
            tables.index_statement(&statement);
            tables.statements.insert(statement.uuid, statement);
        }
        tables
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn put(backend: &InMemory, statement: Statement) {
        let mut txn = backend.begin().unwrap();
        txn.put_statement(statement).unwrap();
        txn.commit().unwrap();
    }

    #[test]
    fn uncommitted_writes_are_discarded() {
        let backend = InMemory::new();
        let root = Statement::root_context("T", "C");
        {
            let mut txn = backend.begin().unwrap();
            txn.put_statement(root.clone()).unwrap();
            assert!(txn.get_statement(root.uuid).unwrap().is_some());
        }
        let txn = backend.begin().unwrap();
        assert!(txn.get_statement(root.uuid).unwrap().is_none());
        assert_eq!(backend.version(), 0);
    }

    #[test]
    fn concurrent_writers_conflict() {
        let backend = InMemory::new();
        let root = Statement::root_context("T", "C");

        let mut first = backend.begin().unwrap();
        let mut second = backend.begin().unwrap();
        first.put_statement(root.clone()).unwrap();
        second
            .put_statement(Statement::root_context("U", "D"))
            .unwrap();
        first.commit().unwrap();
        let err = second.commit().unwrap_err();
        assert!(err.is_conflict());

        let txn = backend.begin().unwrap();
        assert!(txn.get_statement(root.uuid).unwrap().is_some());
    }

    #[test]
    fn statement_indexes_follow_updates() {
        let backend = InMemory::new();
        let root = Statement::root_context("T", "C");
        let a = Statement::new(&root, "A");
        let b = Statement::new(&root, "B").with_dependencies([&a]);
        let nested = Statement::context(&root, "N", "B");
        let inner = Statement::context(&nested, "M", "B");
        put(&backend, root.clone());
        put(&backend, a.clone());
        put(&backend, b.clone());
        put(&backend, nested.clone());
        put(&backend, inner.clone());

        let txn = backend.begin().unwrap();
        assert_eq!(txn.dependents(a.uuid).unwrap(), vec![b.uuid]);
        assert_eq!(txn.statements_by_term(root.uuid, "B").unwrap(), vec![b.uuid]);
        let mut found = txn
            .descendant_contexts_by_consequent(root.uuid, "B")
            .unwrap();
        found.sort();
        let mut expected = vec![nested.uuid, inner.uuid];
        expected.sort();
        assert_eq!(found, expected);
        drop(txn);

        let mut txn = backend.begin().unwrap();
        let mut b2 = b.clone();
        b2.dependencies.clear();
        txn.put_statement(b2).unwrap();
        assert!(txn.dependents(a.uuid).unwrap().is_empty());
    }

    #[test]
    fn save_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.json");

        let backend = InMemory::new();
        let root = Statement::root_context("T", "C");
        let a = Statement::new(&root, "A");
        put(&backend, root.clone());
        put(&backend, a.clone());
        backend.save_to_file(&path).unwrap();

        let loaded = InMemory::load_from_file(&path).unwrap();
        let txn = loaded.begin().unwrap();
        assert_eq!(txn.get_statement(a.uuid).unwrap(), Some(a));
        assert_eq!(txn.local_statements(root.uuid).unwrap().len(), 1);

        let missing = InMemory::load_from_file(dir.path().join("absent.json")).unwrap();
        assert_eq!(missing.version(), 0);
    }

    #[test]
    fn unknown_persistence_version_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.json");
        fs::write(&path, r#"{"_v": 9}"#).unwrap();
        let err = InMemory::load_from_file(&path).unwrap_err();
        assert!(matches!(
            err,
            crate::Error::Backend(BackendError::DeserializationFailed { .. })
        ));
    }
}
