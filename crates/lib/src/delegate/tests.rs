//! Tests for delegate trees, successor chains and authorizers

use std::sync::Arc;

use super::*;
use crate::authority::StatementAuthority;
use crate::backend::{DelegateStore, InMemory};
use crate::person::{Person, PrivatePerson};
use crate::signatory::{KeyStorage, PrivateSignatory};
use crate::{FixedClock, Namespace, PersistenceManager, Statement, Transaction};

fn manager() -> PersistenceManager {
    PersistenceManager::with_clock(Arc::new(InMemory::new()), Arc::new(FixedClock::new(10_000)))
}

fn authored_root(txn: &mut Transaction<'_>, storage: KeyStorage) -> (PrivatePerson, Statement) {
    let alice = PrivatePerson::create(txn, storage, "alice", None, None).unwrap();
    let root = Statement::root_context("T", "C");
    let mut authority = StatementAuthority::create(txn, &root, &alice.person).unwrap();
    authority.sign(txn, &alice.signatory).unwrap();
    (alice, root)
}

#[test]
fn root_is_signed_by_private_author() {
    let manager = manager();
    let mut txn = manager.begin().unwrap();
    let (_alice, root) = authored_root(&mut txn, KeyStorage::Plain);

    let node = get_or_create_root(&mut txn, root.uuid).unwrap();
    assert!(node.is_root());
    assert_eq!(node.root_data().unwrap().successor_index, None);
    assert!(is_root_signed(&*txn, root.uuid).unwrap());
}

#[test]
fn root_requires_authority() {
    let manager = manager();
    let mut txn = manager.begin().unwrap();
    let err = get_or_create_root(&mut txn, Statement::root_context("T", "C").uuid).unwrap_err();
    assert!(err.is_not_found());
}

#[test]
fn authorizers_change_digests_and_stay_signed() {
    let manager = manager();
    let mut txn = manager.begin().unwrap();
    let (_alice, root) = authored_root(&mut txn, KeyStorage::Plain);
    let empty_digest = get_or_create_root(&mut txn, root.uuid).unwrap().message_digest;

    let bob = PrivatePerson::create(&mut txn, KeyStorage::Plain, "bob", None, None).unwrap();
    let x = PrivateSignatory::generate(&mut txn, KeyStorage::Plain).unwrap();
    let foo = Namespace::parse("foo").unwrap();
    let authorizer =
        create_authorizer(&mut txn, root.uuid, &foo, &bob.person, Some(x.signatory())).unwrap();

    assert!(authorizer.is_signed(&*txn).unwrap());
    assert_eq!(authorizer.authorizer_uuid, Some(x.uuid()));
    let root_node = load_node(&*txn, root.uuid, &Namespace::root()).unwrap();
    assert_ne!(root_node.message_digest, empty_digest);
    assert!(digests_consistent(&*txn, root.uuid).unwrap());
    assert!(is_root_signed(&*txn, root.uuid).unwrap());
    assert!(!Person::load(&*txn, bob.uuid()).unwrap().is_orphan());

    let err = delete_node(&mut txn, root.uuid, &foo).unwrap_err();
    assert!(err.is_deletion_conflict());

    delete_authorizer(&mut txn, root.uuid, &foo, bob.uuid()).unwrap();
    delete_node(&mut txn, root.uuid, &foo).unwrap();
    let root_node = load_node(&*txn, root.uuid, &Namespace::root()).unwrap();
    assert_eq!(root_node.message_digest, empty_digest);
    assert!(is_root_signed(&*txn, root.uuid).unwrap());
    assert!(Person::load(&*txn, bob.uuid()).unwrap().is_orphan());
}

#[test]
fn tampered_digest_breaks_root_signature() {
    let manager = manager();
    let mut txn = manager.begin().unwrap();
    let (_alice, root) = authored_root(&mut txn, KeyStorage::Plain);
    let bob = PrivatePerson::create(&mut txn, KeyStorage::Plain, "bob", None, None).unwrap();
    let foo = Namespace::parse("foo").unwrap();
    create_authorizer(&mut txn, root.uuid, &foo, &bob.person, None).unwrap();
    assert!(is_root_signed(&*txn, root.uuid).unwrap());

    let mut node = load_node(&*txn, root.uuid, &foo).unwrap();
    node.message_digest = vec![0; 32];
    txn.put_delegate_node(node).unwrap();
    assert!(!is_root_signed(&*txn, root.uuid).unwrap());
}

#[test]
fn delete_subtree_removes_nested_nodes() {
    let manager = manager();
    let mut txn = manager.begin().unwrap();
    let (_alice, root) = authored_root(&mut txn, KeyStorage::Plain);
    let empty_digest = get_or_create_root(&mut txn, root.uuid).unwrap().message_digest;
    let bob = PrivatePerson::create(&mut txn, KeyStorage::Plain, "bob", None, None).unwrap();
    let carol = PrivatePerson::create(&mut txn, KeyStorage::Plain, "carol", None, None).unwrap();

    let foo = Namespace::parse("foo").unwrap();
    let foo_bar = Namespace::parse("foo.bar").unwrap();
    create_authorizer(&mut txn, root.uuid, &foo, &bob.person, None).unwrap();
    create_authorizer(&mut txn, root.uuid, &foo_bar, &carol.person, None).unwrap();
    assert_eq!(txn.delegate_nodes_by_statement(root.uuid).unwrap().len(), 3);

    delete_subtree(&mut txn, root.uuid, &foo).unwrap();
    assert_eq!(txn.delegate_nodes_by_statement(root.uuid).unwrap().len(), 1);
    assert!(txn.authorizers_by_delegate(carol.uuid()).unwrap().is_empty());
    assert!(Person::load(&*txn, carol.uuid()).unwrap().is_orphan());
    let root_node = load_node(&*txn, root.uuid, &Namespace::root()).unwrap();
    assert_eq!(root_node.message_digest, empty_digest);
    assert!(is_root_signed(&*txn, root.uuid).unwrap());
}

#[test]
fn successor_chain_rejects_duplicates_and_stale_dates() {
    let manager = manager();
    let mut txn = manager.begin().unwrap();
    let (alice, root) = authored_root(&mut txn, KeyStorage::Plain);
    let bob = PrivatePerson::create(&mut txn, KeyStorage::Plain, "bob", None, None).unwrap();
    let carol = PrivatePerson::create(&mut txn, KeyStorage::Plain, "carol", None, None).unwrap();

    let date = txn.now();
    let err = add_successor_entry(&mut txn, root.uuid, &alice.person, date).unwrap_err();
    assert!(err.is_chain_error());

    let creation_date = StatementAuthority::load(&*txn, root.uuid)
        .unwrap()
        .creation_date;
    let err = add_successor_entry(&mut txn, root.uuid, &bob.person, creation_date).unwrap_err();
    assert!(matches!(
        err,
        crate::Error::Delegate(DelegateError::SuccessorDateNotIncreasing { .. })
    ));

    let date = txn.now();
    let entry = add_successor_entry(&mut txn, root.uuid, &bob.person, date).unwrap();
    assert_eq!(entry.successor_uuid, bob.uuid());
    assert!(!Person::load(&*txn, bob.uuid()).unwrap().is_orphan());

    let date = txn.now();
    let err = add_successor_entry(&mut txn, root.uuid, &bob.person, date).unwrap_err();
    assert!(matches!(
        err,
        crate::Error::Delegate(DelegateError::DuplicateSuccessor { .. })
    ));

    let err = add_successor_entry(&mut txn, root.uuid, &carol.person, entry.signature_date)
        .unwrap_err();
    assert!(err.is_chain_error());
}

#[test]
fn successor_takes_over_root_signing() {
    let manager = manager();
    let mut txn = manager.begin().unwrap();
    let (alice, root) = authored_root(&mut txn, KeyStorage::Plain);
    let bob = PrivatePerson::create(&mut txn, KeyStorage::Plain, "bob", None, None).unwrap();

    let date = txn.now();
    add_successor_entry(&mut txn, root.uuid, &bob.person, date).unwrap();
    // The author still holds the root until the successor signs.
    let node = load_node(&*txn, root.uuid, &Namespace::root()).unwrap();
    assert_eq!(node.root_data().unwrap().successor_index, None);
    assert!(is_root_signed(&*txn, root.uuid).unwrap());

    let node = sign_root(&mut txn, root.uuid).unwrap();
    let data = node.root_data().unwrap();
    assert_eq!(data.successor_index, Some(0));
    assert_eq!(data.holder(alice.uuid()), bob.uuid());
    assert!(is_root_signed(&*txn, root.uuid).unwrap());

    let node = sign_root_from_earliest(&mut txn, root.uuid).unwrap();
    let data = node.root_data().unwrap();
    assert_eq!(data.successor_index, None);
    assert!(data.successor_entries.is_empty());
    assert!(is_root_signed(&*txn, root.uuid).unwrap());
    assert!(Person::load(&*txn, bob.uuid()).unwrap().is_orphan());
}

#[test]
fn deleting_holder_entry_resigns_as_author() {
    let manager = manager();
    let mut txn = manager.begin().unwrap();
    let (_alice, root) = authored_root(&mut txn, KeyStorage::Plain);
    let bob = PrivatePerson::create(&mut txn, KeyStorage::Plain, "bob", None, None).unwrap();
    let date = txn.now();
    add_successor_entry(&mut txn, root.uuid, &bob.person, date).unwrap();
    sign_root(&mut txn, root.uuid).unwrap();

    delete_successor_entries_from(&mut txn, root.uuid, 0).unwrap();
    let node = load_node(&*txn, root.uuid, &Namespace::root()).unwrap();
    let data = node.root_data().unwrap();
    assert_eq!(data.successor_index, None);
    assert!(data.successor_entries.is_empty());
    assert!(is_root_signed(&*txn, root.uuid).unwrap());

    let err = delete_successor_entries_from(&mut txn, root.uuid, 0).unwrap_err();
    assert!(matches!(
        err,
        crate::Error::Delegate(DelegateError::SuccessorIndexOutOfRange { index: 0, len: 0 })
    ));
}

#[test]
fn root_stays_unsigned_without_private_holder() {
    let manager = manager();
    manager.secrets().set_passphrase("pw");
    let mut txn = manager.begin().unwrap();
    let (_alice, root) = authored_root(&mut txn, KeyStorage::Encrypted);
    manager.secrets().clear();

    get_or_create_root(&mut txn, root.uuid).unwrap();
    assert!(!is_root_signed(&*txn, root.uuid).unwrap());
    let err = sign_root(&mut txn, root.uuid).unwrap_err();
    assert!(err.is_missing_private_data());

    manager.secrets().set_passphrase("pw");
    sign_root(&mut txn, root.uuid).unwrap();
    assert!(is_root_signed(&*txn, root.uuid).unwrap());
}

#[test]
fn revocation_set_changes_keep_authorizer_signed() {
    let manager = manager();
    let mut txn = manager.begin().unwrap();
    let (_alice, root) = authored_root(&mut txn, KeyStorage::Plain);
    let bob = PrivatePerson::create(&mut txn, KeyStorage::Plain, "bob", None, None).unwrap();
    let foo = Namespace::parse("foo").unwrap();
    let mut authorizer =
        create_authorizer(&mut txn, root.uuid, &foo, &bob.person, Some(bob.signatory.signatory()))
            .unwrap();
    let first_date = authorizer.signature_date;

    let revoked = uuid::Uuid::new_v4();
    assert!(authorizer.add_revoked_signature_uuid(&mut txn, revoked).unwrap());
    assert!(!authorizer.add_revoked_signature_uuid(&mut txn, revoked).unwrap());
    assert!(authorizer.is_signed(&*txn).unwrap());
    assert_ne!(authorizer.signature_date, first_date);

    let stored = DelegateAuthorizer::load(&*txn, root.uuid, &foo, bob.uuid()).unwrap();
    assert_eq!(stored, authorizer);

    assert!(authorizer.remove_revoked_signature_uuid(&mut txn, revoked).unwrap());
    assert!(authorizer.revoked_signature_uuids.is_empty());
    authorizer.set_authorizer(&mut txn, None).unwrap();
    assert_eq!(authorizer.authorizer_uuid, None);
    assert!(authorizer.is_signed(&*txn).unwrap());
}

#[test]
fn authorizer_of_public_delegate_is_unsigned() {
    let manager = manager();
    manager.secrets().set_passphrase("pw");
    let mut txn = manager.begin().unwrap();
    let (_alice, root) = authored_root(&mut txn, KeyStorage::Plain);
    let bob = PrivatePerson::create(&mut txn, KeyStorage::Encrypted, "bob", None, None).unwrap();
    manager.secrets().clear();

    let foo = Namespace::parse("foo").unwrap();
    let mut authorizer = create_authorizer(&mut txn, root.uuid, &foo, &bob.person, None).unwrap();
    assert!(!authorizer.is_signed(&*txn).unwrap());
    let err = authorizer.sign(&mut txn).unwrap_err();
    assert!(err.is_missing_private_data());

    manager.secrets().set_passphrase("pw");
    authorizer.sign(&mut txn).unwrap();
    assert!(authorizer.is_signed(&*txn).unwrap());
}
