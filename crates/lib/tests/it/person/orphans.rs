//! Orphan lifecycle of persons
//!
//! A person nothing references becomes orphan with a timestamp, is rescued by a
//! new reference, and is garbage collected once the grace period has passed
//! without one. Persons with private key material are never collected.

use aletheia_authority::{
    Statement,
    authority::StatementAuthority,
    person::Person,
    signatory::Signatory,
};

use crate::helpers::*;

#[test]
fn test_orphan_lifecycle_with_grace_period() {
    // Alice lives in one store, her public identity travels to another
    let (home, _home_clock) = test_manager();
    let mut txn = home.begin().unwrap();
    let alice = private_person(&mut txn, "alice");
    txn.commit().unwrap();

    let (store, clock) = test_manager();
    let mut txn = store.begin().unwrap();
    Person::register(&mut txn, &alice.person, alice.signatory.signatory()).unwrap();
    let registered = Person::load(&*txn, alice.uuid()).unwrap();
    assert!(registered.is_orphan());
    assert!(!Signatory::is_private(&*txn, alice.uuid()).unwrap());

    // Referenced again within the grace period
    clock.advance_days(3);
    let root = Statement::root_context("T", "C");
    StatementAuthority::create(&mut txn, &root, &registered).unwrap();
    assert!(!Person::load(&*txn, alice.uuid()).unwrap().is_orphan());

    StatementAuthority::delete(&mut txn, root.uuid).unwrap();
    let orphaned = Person::load(&*txn, alice.uuid()).unwrap();
    let since = orphaned.orphan_since.expect("Alice should be orphan again");
    assert!(since > registered.orphan_since.unwrap());

    clock.advance_days(6);
    assert!(Person::delete_old_orphans(&mut txn).unwrap().is_empty());
    assert!(Person::get(&*txn, alice.uuid()).unwrap().is_some());

    clock.advance_days(2);
    assert_eq!(Person::delete_old_orphans(&mut txn).unwrap(), vec![alice.uuid()]);
    assert!(Person::get(&*txn, alice.uuid()).unwrap().is_none());
    assert!(Signatory::get(&*txn, alice.uuid()).unwrap().is_none());
}

#[test]
fn test_private_persons_are_never_collected() {
    let (manager, clock) = test_manager();
    let mut txn = manager.begin().unwrap();
    let bob = private_person(&mut txn, "bob");
    assert!(Person::load(&*txn, bob.uuid()).unwrap().is_orphan());

    clock.advance_days(30);
    assert!(Person::delete_old_orphans(&mut txn).unwrap().is_empty());
    assert!(Person::get(&*txn, bob.uuid()).unwrap().is_some());
}

#[test]
fn test_delegation_references_keep_persons_alive() {
    let (manager, clock) = test_manager();
    let mut txn = manager.begin().unwrap();
    let owner = private_person(&mut txn, "owner");
    let root = signed_root(&mut txn, &owner, "T", "C");

    // A public delegate known only through the grant
    let (other, _other_clock) = test_manager();
    let mut other_txn = other.begin().unwrap();
    let carol = private_person(&mut other_txn, "carol");
    Person::register(&mut txn, &carol.person, carol.signatory.signatory()).unwrap();
    aletheia_authority::delegate::create_authorizer(
        &mut txn,
        root.uuid,
        &aletheia_authority::Namespace::parse("lemmas").unwrap(),
        &carol.person,
        None,
    )
    .unwrap();
    assert!(!Person::load(&*txn, carol.uuid()).unwrap().is_orphan());

    clock.advance_days(30);
    assert!(Person::delete_old_orphans(&mut txn).unwrap().is_empty());
    let err = Person::delete(&mut txn, carol.uuid()).unwrap_err();
    assert!(err.is_deletion_conflict());
}
