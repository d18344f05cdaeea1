//! Packing and unpacking of signature requests.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::wire::{self, AuthorityRecord, DelegateNodeRecord, PackedRecord, PersonRecord};
use super::{RequestError, SignatureRequest, UnpackedSignatureRequest, check_context_path};
use crate::authority::{self, StatementAuthority};
use crate::backend::{
    AuthorityStore, BackendTransaction, DelegateStore, PersonStore, RequestStore, SignatureStore,
    StatementStore,
};
use crate::delegate;
use crate::events::AuthorityEvent;
use crate::person::Person;
use crate::signatory::Signatory;
use crate::{Namespace, Result, Statement, Transaction, statement};

const ENVELOPE_MAGIC: &[u8; 4] = b"ALRQ";
const ENVELOPE_VERSION: u16 = 0;

/// A request in transport form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackedSignatureRequest {
    pub uuid: Uuid,
    pub creation_date: DateTime<Utc>,
    pub context_uuid_path: Vec<Uuid>,
    pub packing_date: DateTime<Utc>,
    /// The root context author's signature at packing time.
    pub root_context_signature_uuid: Option<Uuid>,
    /// Path contexts the packed statements depend on.
    pub dependency_uuids: BTreeSet<Uuid>,
    /// Records in the packed wire format.
    #[serde(with = "serde_bytes")]
    pub data: Vec<u8>,
}

/// Collects records, sending each entity once.
struct Packer<'t> {
    txn: &'t dyn BackendTransaction,
    path: &'t [Uuid],
    sent_statements: HashSet<Uuid>,
    sent_persons: HashSet<Uuid>,
    records: Vec<PackedRecord>,
    dependency_uuids: BTreeSet<Uuid>,
}

impl<'t> Packer<'t> {
    fn new(txn: &'t dyn BackendTransaction, path: &'t [Uuid]) -> Self {
        Self {
            txn,
            path,
            sent_statements: HashSet::new(),
            sent_persons: HashSet::new(),
            records: Vec::new(),
            dependency_uuids: BTreeSet::new(),
        }
    }

    fn send_dependency(&mut self, uuid: Uuid) -> Result<()> {
        if self.path.contains(&uuid) {
            self.dependency_uuids.insert(uuid);
            return Ok(());
        }
        self.send_statement(uuid)
    }

    /// Send a statement after its enclosing contexts and its dependencies,
    /// followed by its authority and, for contexts, its signed delegate tree.
    fn send_statement(&mut self, uuid: Uuid) -> Result<()> {
        if self.path.contains(&uuid) || !self.sent_statements.insert(uuid) {
            return Ok(());
        }
        let statement = statement::load(self.txn, uuid)?;
        if let Some(context) = statement.context_uuid {
            self.send_statement(context)?;
        }
        for dependency in &statement.dependencies {
            self.send_dependency(*dependency)?;
        }
        let is_context = statement.is_context();
        self.records.push(PackedRecord::Statement(statement));

        if let Some(authority) = self.txn.get_authority(uuid)? {
            self.send_authority(authority)?;
        }
        if is_context && delegate::is_root_signed(self.txn, uuid)? {
            self.send_delegate_tree(uuid)?;
        }
        Ok(())
    }

    fn send_person(&mut self, uuid: Uuid) -> Result<()> {
        if !self.sent_persons.insert(uuid) {
            return Ok(());
        }
        let Some(mut person) = self.txn.get_person(uuid)? else {
            warn!(person = %uuid, "Referenced person missing, not packed");
            return Ok(());
        };
        person.orphan_since = None;
        let signatory = Signatory::load(self.txn, uuid)?;
        self.records
            .push(PackedRecord::Person(PersonRecord { person, signatory }));
        Ok(())
    }

    fn signatories(&self, uuids: impl IntoIterator<Item = Uuid>) -> Result<Vec<Signatory>> {
        let uuids: BTreeSet<Uuid> = uuids.into_iter().collect();
        let mut signatories = Vec::with_capacity(uuids.len());
        for uuid in uuids {
            if let Some(signatory) = Signatory::get(self.txn, uuid)? {
                signatories.push(signatory);
            }
        }
        Ok(signatories)
    }

    fn send_authority(&mut self, authority: StatementAuthority) -> Result<()> {
        self.send_person(authority.author_uuid)?;
        let signatures = self.txn.signatures_by_statement(authority.statement_uuid)?;
        let signatories = self.signatories(signatures.iter().map(|s| s.authorizer_uuid))?;
        self.records
            .push(PackedRecord::StatementAuthority(AuthorityRecord {
                authority,
                signatures,
                signatories,
            }));
        Ok(())
    }

    fn send_delegate_tree(&mut self, statement_uuid: Uuid) -> Result<()> {
        let mut nodes = self.txn.delegate_nodes_by_statement(statement_uuid)?;
        nodes.sort_by(|a, b| {
            a.prefix
                .depth()
                .cmp(&b.prefix.depth())
                .then_with(|| a.prefix.cmp(&b.prefix))
        });
        for node in nodes {
            if let Some(root) = node.root_data() {
                for entry in &root.successor_entries {
                    self.send_person(entry.successor_uuid)?;
                }
            }
            let authorizers = self.txn.authorizers_by_node(statement_uuid, &node.prefix)?;
            for authorizer in &authorizers {
                self.send_person(authorizer.delegate_uuid)?;
            }
            let signatories =
                self.signatories(authorizers.iter().filter_map(|a| a.authorizer_uuid))?;
            self.records
                .push(PackedRecord::DelegateTreeNode(DelegateNodeRecord {
                    node,
                    authorizers,
                    signatories,
                }));
        }
        Ok(())
    }
}

fn root_context_signature_uuid(txn: &dyn BackendTransaction, root_uuid: Uuid) -> Result<Option<Uuid>> {
    let Some(authority) = txn.get_authority(root_uuid)? else {
        return Ok(None);
    };
    Ok(txn
        .get_signature(root_uuid, authority.author_uuid)?
        .map(|signature| signature.signature_uuid))
}

impl UnpackedSignatureRequest {
    /// Pack the listed statements with everything needed to sign them remotely.
    ///
    /// The packed request gets its own UUID and is stored alongside this one.
    pub fn pack(&self, txn: &mut Transaction<'_>) -> Result<PackedSignatureRequest> {
        check_context_path(&**txn, &self.context_uuid_path)?;
        let (records, dependency_uuids, root_signature) = {
            let mut packer = Packer::new(&**txn, &self.context_uuid_path);
            for uuid in &self.statement_uuids {
                packer.send_statement(*uuid)?;
            }
            packer.records.extend(
                self.statement_uuids
                    .iter()
                    .map(|uuid| PackedRecord::RequestedStatement(*uuid)),
            );
            let root_signature = root_context_signature_uuid(&**txn, self.context_uuid_path[0])?;
            (packer.records, packer.dependency_uuids, root_signature)
        };
        let data = wire::encode(&records, txn.manager().config().pack_segment_size)?;

        let packed = PackedSignatureRequest {
            uuid: Uuid::new_v4(),
            creation_date: self.creation_date,
            context_uuid_path: self.context_uuid_path.clone(),
            packing_date: txn.now(),
            root_context_signature_uuid: root_signature,
            dependency_uuids,
            data,
        };
        txn.put_signature_request(SignatureRequest::Packed(packed.clone()))?;
        info!(
            request = %self.uuid,
            packed = %packed.uuid,
            records = records.len(),
            bytes = packed.data.len(),
            "Packed signature request"
        );
        Ok(packed)
    }
}

impl PackedSignatureRequest {
    /// Check that the request can be unpacked into the local store.
    ///
    /// The context path must resolve to a chain of contexts and every recorded
    /// dependency must lie on it.
    pub fn unpackable(&self, txn: &dyn BackendTransaction) -> Result<()> {
        check_context_path(txn, &self.context_uuid_path)?;
        if let Some(uuid) = self
            .dependency_uuids
            .iter()
            .find(|uuid| !self.context_uuid_path.contains(uuid))
        {
            return Err(RequestError::DependencyOffPath { uuid: *uuid }.into());
        }
        Ok(())
    }

    /// Decode the records without touching the store.
    pub fn records(&self) -> Result<Vec<PackedRecord>> {
        wire::decode(&self.data)
    }

    /// Replay the records into the local store.
    ///
    /// Persons and signatures are verified before they are stored; signatures
    /// that fail to verify are dropped. A delegate tree replaces the local one
    /// only when it verifies and its root was signed more recently. Validity flags are then
    /// recomputed locally. Returns the rehydrated request, stored under this
    /// request's UUID.
    pub fn unpack(&self, txn: &mut Transaction<'_>) -> Result<UnpackedSignatureRequest> {
        self.unpackable(&**txn)?;
        let records = self.records()?;
        self.check_root_context_signature(&**txn)?;

        let mut requested = BTreeSet::new();
        let mut persons = BTreeSet::new();
        let mut authorities = Vec::new();
        let mut trees: BTreeMap<Uuid, Vec<DelegateNodeRecord>> = BTreeMap::new();
        for record in records {
            match record {
                PackedRecord::Statement(statement) => register_statement(txn, statement)?,
                PackedRecord::Person(record) => {
                    Person::register(txn, &record.person, &record.signatory)?;
                    persons.insert(record.person.uuid);
                }
                PackedRecord::StatementAuthority(record) => {
                    if let Some(uuid) = register_authority(txn, record)? {
                        authorities.push(uuid);
                    }
                }
                PackedRecord::DelegateTreeNode(record) => {
                    trees
                        .entry(record.node.statement_uuid)
                        .or_default()
                        .push(record);
                }
                PackedRecord::RequestedStatement(uuid) => {
                    requested.insert(uuid);
                }
            }
        }
        for (statement_uuid, nodes) in trees {
            register_delegate_tree(txn, statement_uuid, nodes)?;
        }
        for uuid in &authorities {
            authority::check_valid_signature(txn, *uuid)?;
        }
        for uuid in persons {
            Person::update_orphan_since(txn, uuid)?;
        }

        let context = self
            .context_uuid_path
            .last()
            .copied()
            .unwrap_or_default();
        for uuid in &requested {
            if !statement::is_inside(&**txn, *uuid, context)? || txn.get_statement(*uuid)?.is_none() {
                return Err(RequestError::malformed(format!(
                    "requested statement {uuid} is not inside the request context"
                ))
                .into());
            }
        }

        let request = UnpackedSignatureRequest {
            uuid: self.uuid,
            creation_date: self.creation_date,
            context_uuid_path: self.context_uuid_path.clone(),
            statement_uuids: requested,
        };
        txn.put_signature_request(SignatureRequest::Unpacked(request.clone()))?;
        info!(
            request = %request.uuid,
            statements = request.statement_uuids.len(),
            "Unpacked signature request"
        );
        Ok(request)
    }

    /// Warn when the local root context signature differs from the packed one.
    fn check_root_context_signature(&self, txn: &dyn BackendTransaction) -> Result<()> {
        let Some(expected) = self.root_context_signature_uuid else {
            return Ok(());
        };
        let root_uuid = self.context_uuid_path[0];
        let known = txn
            .signatures_by_statement(root_uuid)?
            .iter()
            .any(|signature| signature.signature_uuid == expected);
        if !known {
            warn!(
                request = %self.uuid,
                root = %root_uuid,
                signature = %expected,
                "Root context signature of the packed request is not known locally"
            );
        }
        Ok(())
    }

    /// Serialize into the transport envelope.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(64 + 16 * self.context_uuid_path.len() + self.data.len());
        out.extend_from_slice(ENVELOPE_MAGIC);
        out.extend_from_slice(&ENVELOPE_VERSION.to_be_bytes());
        out.extend_from_slice(self.uuid.as_bytes());
        out.extend_from_slice(&self.creation_date.timestamp_millis().to_be_bytes());
        out.extend_from_slice(&self.packing_date.timestamp_millis().to_be_bytes());
        match self.root_context_signature_uuid {
            Some(uuid) => {
                out.push(1);
                out.extend_from_slice(uuid.as_bytes());
            }
            None => out.push(0),
        }
        put_uuids(&mut out, &self.context_uuid_path);
        put_uuids(&mut out, self.dependency_uuids.iter());
        out.extend_from_slice(&(self.data.len() as u32).to_be_bytes());
        out.extend_from_slice(&self.data);
        out
    }

    /// Parse the transport envelope. The records are not decoded.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let mut input = EnvelopeReader { bytes };
        if input.take(ENVELOPE_MAGIC.len())? != ENVELOPE_MAGIC {
            return Err(RequestError::malformed("not a packed signature request").into());
        }
        let version = input.u16()?;
        if version != ENVELOPE_VERSION {
            return Err(
                RequestError::malformed(format!("unsupported envelope version {version}")).into(),
            );
        }
        let uuid = input.uuid()?;
        let creation_date = input.date()?;
        let packing_date = input.date()?;
        let root_context_signature_uuid = match input.u8()? {
            0 => None,
            1 => Some(input.uuid()?),
            other => {
                return Err(RequestError::malformed(format!("invalid flag {other}")).into());
            }
        };
        let context_uuid_path = input.uuids()?;
        let dependency_uuids = input.uuids()?.into_iter().collect();
        let len = input.u32()? as usize;
        let data = input.take(len)?.to_vec();
        if !input.bytes.is_empty() {
            return Err(RequestError::malformed("trailing bytes after envelope").into());
        }
        Ok(Self {
            uuid,
            creation_date,
            context_uuid_path,
            packing_date,
            root_context_signature_uuid,
            dependency_uuids,
            data,
        })
    }
}

fn put_uuids<'a>(out: &mut Vec<u8>, uuids: impl IntoIterator<Item = &'a Uuid>) {
    let uuids: Vec<&Uuid> = uuids.into_iter().collect();
    out.extend_from_slice(&(uuids.len() as u32).to_be_bytes());
    for uuid in uuids {
        out.extend_from_slice(uuid.as_bytes());
    }
}

struct EnvelopeReader<'a> {
    bytes: &'a [u8],
}

impl<'a> EnvelopeReader<'a> {
    fn take(&mut self, n: usize) -> std::result::Result<&'a [u8], RequestError> {
        if self.bytes.len() < n {
            return Err(RequestError::malformed("truncated envelope"));
        }
        let (head, tail) = self.bytes.split_at(n);
        self.bytes = tail;
        Ok(head)
    }

    fn array<const N: usize>(&mut self) -> std::result::Result<[u8; N], RequestError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    fn u8(&mut self) -> std::result::Result<u8, RequestError> {
        Ok(self.array::<1>()?[0])
    }

    fn u16(&mut self) -> std::result::Result<u16, RequestError> {
        Ok(u16::from_be_bytes(self.array()?))
    }

    fn u32(&mut self) -> std::result::Result<u32, RequestError> {
        Ok(u32::from_be_bytes(self.array()?))
    }

    fn uuid(&mut self) -> std::result::Result<Uuid, RequestError> {
        Ok(Uuid::from_bytes(self.array()?))
    }

    fn date(&mut self) -> std::result::Result<DateTime<Utc>, RequestError> {
        let millis = i64::from_be_bytes(self.array()?);
        DateTime::from_timestamp_millis(millis)
            .ok_or_else(|| RequestError::malformed(format!("invalid date {millis}")))
    }

    fn uuids(&mut self) -> std::result::Result<Vec<Uuid>, RequestError> {
        let count = self.u32()? as usize;
        let size = count
            .checked_mul(16)
            .ok_or_else(|| RequestError::malformed("uuid list too long"))?;
        Ok(self
            .take(size)?
            .chunks_exact(16)
            .map(|chunk| {
                let mut bytes = [0u8; 16];
                bytes.copy_from_slice(chunk);
                Uuid::from_bytes(bytes)
            })
            .collect())
    }
}

fn register_statement(txn: &mut Transaction<'_>, statement: Statement) -> Result<()> {
    if let Some(context) = statement.context_uuid {
        if txn.get_statement(context)?.is_none() {
            return Err(RequestError::malformed(format!(
                "statement {} arrives before its context {context}",
                statement.uuid
            ))
            .into());
        }
    }
    let uuid = statement.uuid;
    match txn.get_statement(uuid)? {
        None => {
            txn.put_statement(statement)?;
            debug!(statement = %uuid, "Registered packed statement");
        }
        Some(local) if local != statement => {
            warn!(statement = %uuid, "Packed statement differs from the local copy, keeping local");
        }
        Some(_) => {}
    }
    Ok(())
}

/// Store an authority and its verified signatures.
///
/// Returns the statement UUID unless the record was rejected.
fn register_authority(txn: &mut Transaction<'_>, record: AuthorityRecord) -> Result<Option<Uuid>> {
    let AuthorityRecord {
        authority: remote,
        signatures,
        signatories,
    } = record;
    let uuid = remote.statement_uuid;
    let Some(statement) = txn.get_statement(uuid)? else {
        return Err(
            RequestError::malformed(format!("authority of unknown statement {uuid}")).into(),
        );
    };
    for signatory in &signatories {
        Signatory::register(&mut **txn, signatory)?;
    }

    let local = match StatementAuthority::get(&**txn, uuid)? {
        Some(local) if local.author_uuid != remote.author_uuid => {
            warn!(statement = %uuid, "Packed authority names a different author, rejected");
            return Ok(None);
        }
        Some(local) => local,
        None => {
            let authority = StatementAuthority {
                valid_signature: false,
                signed_dependencies: false,
                signed_proof: false,
                ..remote
            };
            txn.put_authority(authority.clone())?;
            debug!(statement = %uuid, "Registered packed authority");
            authority
        }
    };

    for mut signature in signatures {
        if signature.statement_uuid != uuid {
            warn!(statement = %uuid, "Packed signature belongs to another statement, dropped");
            continue;
        }
        if let Some(existing) = txn.get_signature(uuid, signature.authorizer_uuid)? {
            if existing.signature_date >= signature.signature_date {
                continue;
            }
        }
        if !signature.verifies(&**txn, &statement, &local)? {
            warn!(
                statement = %uuid,
                authorizer = %signature.authorizer_uuid,
                "Packed signature does not verify, dropped"
            );
            continue;
        }
        signature.valid = false;
        txn.emit(AuthorityEvent::SignatureAdded {
            statement_uuid: uuid,
            authorizer_uuid: signature.authorizer_uuid,
        });
        txn.put_signature(signature)?;
    }
    Ok(Some(uuid))
}

/// Replace the local delegate tree when the packed root is newer and verifies.
///
/// The packed tree is checked before anything local is touched: placement of
/// its nodes and authorizers, its digests, the successor chain from the local
/// author and the root signature. A tree that fails any check is dropped.
fn register_delegate_tree(
    txn: &mut Transaction<'_>,
    statement_uuid: Uuid,
    records: Vec<DelegateNodeRecord>,
) -> Result<()> {
    let Some(authority) = txn.get_authority(statement_uuid)? else {
        warn!(statement = %statement_uuid, "Delegate tree of an unauthored statement, dropped");
        return Ok(());
    };
    let remote_date = records
        .iter()
        .find_map(|record| record.node.root_data())
        .and_then(|root| root.signature_date);
    let Some(remote_date) = remote_date else {
        warn!(statement = %statement_uuid, "Packed delegate tree without signed root, dropped");
        return Ok(());
    };
    let local_root = txn.get_delegate_node(statement_uuid, &Namespace::root())?;
    if let Some(local) = local_root.as_ref().and_then(|node| node.root_data()) {
        if local.signature_date.is_some_and(|date| date >= remote_date) {
            debug!(statement = %statement_uuid, "Local delegate tree is current");
            return Ok(());
        }
    }

    let mut staged = Vec::with_capacity(records.len());
    let mut authorizers = Vec::new();
    let mut signatories: HashMap<Uuid, Signatory> = HashMap::new();
    for record in records {
        if record.node.statement_uuid != statement_uuid {
            warn!(statement = %statement_uuid, "Misplaced packed delegate tree node, dropped tree");
            return Ok(());
        }
        for authorizer in &record.authorizers {
            if authorizer.statement_uuid != statement_uuid || authorizer.prefix != record.node.prefix {
                warn!(statement = %statement_uuid, "Misplaced packed delegate authorizer, dropped tree");
                return Ok(());
            }
        }
        for signatory in record.signatories {
            if let Some(local) = Signatory::get(&**txn, signatory.uuid)? {
                if local.public_key != signatory.public_key {
                    warn!(
                        statement = %statement_uuid,
                        signatory = %signatory.uuid,
                        "Packed delegate tree carries a conflicting key, dropped tree"
                    );
                    return Ok(());
                }
            }
            signatories.insert(signatory.uuid, signatory);
        }
        let delegates: Vec<Uuid> = record.authorizers.iter().map(|a| a.delegate_uuid).collect();
        authorizers.extend(record.authorizers);
        staged.push((record.node, delegates));
    }

    let Some(root) = staged.iter().map(|(node, _)| node).find(|node| node.is_root()) else {
        warn!(statement = %statement_uuid, "Packed delegate tree without root, dropped");
        return Ok(());
    };
    let store: &dyn BackendTransaction = &**txn;
    let chain_ok = delegate::root_chain_verifies(root, authority.author_uuid, |uuid| {
        match Signatory::get(store, uuid)? {
            Some(local) => Ok(Some(local)),
            None => Ok(signatories.get(&uuid).cloned()),
        }
    })?;
    if !chain_ok || !delegate::detached_tree_consistent(&staged) {
        warn!(statement = %statement_uuid, "Packed delegate tree does not verify, dropped");
        return Ok(());
    }

    let mut touched = BTreeSet::new();
    for node in txn.delegate_nodes_by_statement(statement_uuid)? {
        for authorizer in txn.authorizers_by_node(statement_uuid, &node.prefix)? {
            txn.delete_delegate_authorizer(statement_uuid, &node.prefix, authorizer.delegate_uuid)?;
            touched.insert(authorizer.delegate_uuid);
        }
        if let Some(root) = node.root_data() {
            touched.extend(root.successor_entries.iter().map(|e| e.successor_uuid));
        }
        txn.delete_delegate_node(statement_uuid, &node.prefix)?;
    }

    for signatory in signatories.values() {
        Signatory::register(&mut **txn, signatory)?;
    }
    for authorizer in authorizers {
        touched.insert(authorizer.delegate_uuid);
        txn.put_delegate_authorizer(authorizer)?;
    }
    for (node, _) in staged {
        if let Some(root) = node.root_data() {
            touched.extend(root.successor_entries.iter().map(|e| e.successor_uuid));
        }
        txn.put_delegate_node(node)?;
    }
    debug!(statement = %statement_uuid, "Registered packed delegate tree");

    for person in touched {
        Person::update_orphan_since(txn, person)?;
    }
    txn.emit(AuthorityEvent::DelegateTreeChanged { statement_uuid });
    authority::revalidate_context(txn, statement_uuid)
}
