//! Signature requests travelling between two stores
//!
//! The requesting side packs what a co-signer needs and the bytes cross over
//! to a store that only shares the context path.

use std::collections::BTreeSet;
use std::sync::Arc;

use aletheia_authority::{
    FixedClock, PersistenceManager, Statement,
    authority::StatementAuthority,
    backend::{InMemory, RequestStore, StatementStore},
    request::{PackedSignatureRequest, SignatureRequest, UnpackedSignatureRequest},
};

use crate::helpers::*;

#[test]
fn test_unpacked_set_is_request_plus_unsigned_closure() {
    let (local, _clock) = test_manager();
    let mut txn = local.begin().unwrap();
    let alice = private_person(&mut txn, "alice");
    let root = signed_root(&mut txn, &alice, "T", "C");

    // c -> b -> a, where only a is already signed
    let a = Statement::new(&root, "a");
    let b = Statement::new(&root, "b").with_dependencies([&a]);
    let c = Statement::new(&root, "c").with_dependencies([&b]);
    author_and_sign(&mut txn, &a, &alice);
    author(&mut txn, &b, &alice);
    author(&mut txn, &c, &alice);

    let mut request = UnpackedSignatureRequest::create(&mut txn, root.uuid).unwrap();
    request.add_statement(&mut txn, c.uuid).unwrap();
    assert_eq!(request.statement_uuids, BTreeSet::from([b.uuid, c.uuid]));
    let packed = request.pack(&mut txn).unwrap();
    txn.commit().unwrap();
    let bytes = packed.to_bytes();

    // The co-signer already holds the root context
    let (remote, _remote_clock) = test_manager();
    let mut rtxn = remote.begin().unwrap();
    rtxn.put_statement(root.clone()).unwrap();
    let received = PackedSignatureRequest::from_bytes(&bytes).unwrap();
    let unpacked = received.unpack(&mut rtxn).unwrap();
    assert_eq!(unpacked.statement_uuids, BTreeSet::from([b.uuid, c.uuid]));
    for statement in [&a, &b, &c] {
        assert_eq!(rtxn.get_statement(statement.uuid).unwrap().as_ref(), Some(statement));
        let authority = StatementAuthority::load(&*rtxn, statement.uuid).unwrap();
        assert_eq!(authority.author_uuid, alice.uuid());
    }
    // a's signature came along, but the root context's delegate tree did not
    let a_authority = StatementAuthority::load(&*rtxn, a.uuid).unwrap();
    assert_eq!(a_authority.signatures(&*rtxn).unwrap().len(), 1);
    assert!(!a_authority.valid_signature);
}

#[test]
fn test_nested_context_requests_keep_path_contexts_local() {
    let (local, _clock) = test_manager();
    let mut txn = local.begin().unwrap();
    let alice = private_person(&mut txn, "alice");
    let root = signed_root(&mut txn, &alice, "T", "C");
    let lemma = Statement::new(&root, "lemma");
    author(&mut txn, &lemma, &alice);
    let k = Statement::context(&root, "K", "goal");
    author_and_sign(&mut txn, &k, &alice);
    delegate_to_author(&mut txn, &k, &alice);

    // The proof in K uses a statement of the enclosing context and K itself
    let step = Statement::new(&k, "goal").with_dependencies([&lemma, &k]);
    author(&mut txn, &step, &alice);

    let mut request = UnpackedSignatureRequest::create(&mut txn, k.uuid).unwrap();
    assert_eq!(request.context_uuid_path, vec![root.uuid, k.uuid]);
    let added = request.add_statement(&mut txn, step.uuid).unwrap();
    assert_eq!(added, BTreeSet::from([step.uuid]));
    let packed = request.pack(&mut txn).unwrap();
    assert_eq!(packed.dependency_uuids, BTreeSet::from([k.uuid]));

    let (remote, _remote_clock) = test_manager();
    let mut rtxn = remote.begin().unwrap();
    rtxn.put_statement(root.clone()).unwrap();
    let err = packed.unpackable(&*rtxn).unwrap_err();
    assert!(err.is_decoding_error());

    rtxn.put_statement(k.clone()).unwrap();
    packed.unpackable(&*rtxn).unwrap();
    let unpacked = packed.unpack(&mut rtxn).unwrap();
    assert_eq!(unpacked.statement_uuids, BTreeSet::from([step.uuid]));
    // The lemma travels as data so the step's dependencies resolve
    assert_eq!(rtxn.get_statement(lemma.uuid).unwrap().as_ref(), Some(&lemma));
    assert!(StatementAuthority::get(&*rtxn, lemma.uuid).unwrap().is_some());
}

#[test]
fn test_packed_requests_survive_a_store_reload() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("authority.json");

    let backend = Arc::new(InMemory::new());
    let clock = Arc::new(FixedClock::new(CLOCK_START));
    let manager = PersistenceManager::with_clock(backend.clone(), clock.clone());
    let mut txn = manager.begin().unwrap();
    let alice = private_person(&mut txn, "alice");
    let root = signed_root(&mut txn, &alice, "T", "C");
    let a = Statement::new(&root, "a");
    author(&mut txn, &a, &alice);
    let mut request = UnpackedSignatureRequest::create(&mut txn, root.uuid).unwrap();
    request.add_statement(&mut txn, a.uuid).unwrap();
    let packed = request.pack(&mut txn).unwrap();
    txn.commit().unwrap();
    backend.save_to_file(&path).unwrap();

    let reloaded = PersistenceManager::with_clock(
        Arc::new(InMemory::load_from_file(&path).unwrap()),
        clock,
    );
    let txn = reloaded.begin().unwrap();
    match txn.get_signature_request(packed.uuid).unwrap() {
        Some(SignatureRequest::Packed(stored)) => assert_eq!(stored, packed),
        other => panic!("Expected the packed request, got {other:?}"),
    }
    let stored = UnpackedSignatureRequest::load(&*txn, request.uuid).unwrap();
    assert_eq!(stored.statement_uuids, BTreeSet::from([a.uuid]));
    assert_eq!(
        txn.requests_by_statement(a.uuid).unwrap(),
        vec![request.uuid]
    );
}
