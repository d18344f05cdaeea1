//! Listener dispatch of committed changes

use std::sync::{Arc, Mutex};

use aletheia_authority::{
    Statement,
    authority::StatementAuthority,
    events::AuthorityEvent,
};

use crate::helpers::*;

#[test]
fn test_listeners_see_flag_changes_after_commit() {
    let (manager, _clock) = test_manager();
    let mut txn = manager.begin().unwrap();
    let alice = private_person(&mut txn, "alice");
    let root = signed_root(&mut txn, &alice, "T", "C");
    let lemma = Statement::new(&root, "lemma");
    author(&mut txn, &lemma, &alice);
    txn.commit().unwrap();

    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    manager.listeners().register(
        lemma.uuid,
        Arc::new(move |event: &AuthorityEvent| sink.lock().unwrap().push(event.clone())),
    );

    let mut txn = manager.begin().unwrap();
    StatementAuthority::load(&*txn, lemma.uuid)
        .unwrap()
        .sign(&mut txn, &alice.signatory)
        .unwrap();
    assert!(seen.lock().unwrap().is_empty());
    txn.commit().unwrap();

    let events = seen.lock().unwrap().clone();
    assert_eq!(
        events.first(),
        Some(&AuthorityEvent::SignatureAdded {
            statement_uuid: lemma.uuid,
            authorizer_uuid: alice.uuid(),
        })
    );
    for expected in [
        AuthorityEvent::ValidSignatureChanged {
            statement_uuid: lemma.uuid,
            value: true,
        },
        AuthorityEvent::SignedDependenciesChanged {
            statement_uuid: lemma.uuid,
            value: true,
        },
        AuthorityEvent::SignedProofChanged {
            statement_uuid: lemma.uuid,
            value: true,
        },
    ] {
        assert!(events.contains(&expected), "missing {expected:?}");
    }
    assert!(events.iter().all(|event| event.key() == lemma.uuid));
}

#[test]
fn test_dropped_transactions_dispatch_nothing() {
    let (manager, _clock) = test_manager();
    let seen = Arc::new(Mutex::new(0usize));
    let mut txn = manager.begin().unwrap();
    let alice = private_person(&mut txn, "alice");

    let sink = seen.clone();
    manager.listeners().register(
        alice.uuid(),
        Arc::new(move |_: &AuthorityEvent| *sink.lock().unwrap() += 1),
    );
    let root = Statement::root_context("T", "C");
    author(&mut txn, &root, &alice);
    assert!(!txn.pending_events().is_empty());
    drop(txn);
    assert_eq!(*seen.lock().unwrap(), 0);
}
