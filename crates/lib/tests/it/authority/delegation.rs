//! Delegated signing end to end
//!
//! A root context owner grants a delegate signing rights under a namespace,
//! backed by a separate authorizer signatory, and later revokes individual
//! signatures made through that grant.

use aletheia_authority::{
    Namespace, Statement,
    authority::StatementAuthority,
    delegate::{self, DelegateAuthorizer},
    signatory::{KeyStorage, PrivateSignatory},
};

use crate::helpers::*;

#[test]
fn test_revocation_invalidates_exactly_one_signature() {
    let (manager, _clock) = test_manager();
    let mut txn = manager.begin().unwrap();

    // Person A creates and signs the root context
    let person_a = private_person(&mut txn, "a");
    let root = Statement::root_context("T", "C");
    author_and_sign(&mut txn, &root, &person_a);
    assert!(flags(&txn, &root).0);

    // A grants B the "foo" namespace, signed by B and backed by X
    let person_b = private_person(&mut txn, "b");
    let x = PrivateSignatory::generate(&mut txn, KeyStorage::Plain).unwrap();
    let foo = Namespace::parse("foo").unwrap();
    let grant =
        delegate::create_authorizer(&mut txn, root.uuid, &foo, &person_b.person, Some(x.signatory()))
            .unwrap();
    assert!(grant.is_signed(&*txn).unwrap());
    assert!(delegate::is_root_signed(&*txn, root.uuid).unwrap());

    let statement = Statement::new(&root, "s").with_identifier(Namespace::parse("foo").unwrap());
    let mut authority = author(&mut txn, &statement, &person_a);
    let first = authority.sign(&mut txn, &x).unwrap();
    assert!(first.valid);
    assert!(flags(&txn, &statement).0);

    // An independent signature by X under the same grant
    let other = Statement::new(&root, "t").with_identifier(Namespace::parse("foo.bar").unwrap());
    let mut other_authority = author(&mut txn, &other, &person_a);
    other_authority.sign(&mut txn, &x).unwrap();
    assert!(flags(&txn, &other).0);

    let mut grant = DelegateAuthorizer::load(&*txn, root.uuid, &foo, person_b.uuid()).unwrap();
    assert!(
        grant
            .add_revoked_signature_uuid(&mut txn, first.signature_uuid)
            .unwrap()
    );
    assert!(grant.is_signed(&*txn).unwrap());
    assert!(!flags(&txn, &statement).0);
    assert!(flags(&txn, &other).0);
    let revoked = authority.signatures(&*txn).unwrap();
    assert_eq!(revoked.len(), 1);
    assert!(!revoked[0].valid);

    // X signs again, producing a signature the revocation does not name
    let second = authority.sign(&mut txn, &x).unwrap();
    assert_ne!(second.signature_uuid, first.signature_uuid);
    assert!(second.valid);
    assert!(flags(&txn, &statement).0);

    assert!(
        grant
            .remove_revoked_signature_uuid(&mut txn, first.signature_uuid)
            .unwrap()
    );
    assert!(flags(&txn, &statement).0);
    assert!(flags(&txn, &other).0);
}

#[test]
fn test_grant_only_covers_its_namespace() {
    let (manager, _clock) = test_manager();
    let mut txn = manager.begin().unwrap();
    let owner = private_person(&mut txn, "owner");
    let root = Statement::root_context("T", "C");
    author_and_sign(&mut txn, &root, &owner);

    let delegate_person = private_person(&mut txn, "delegate");
    let foo = Namespace::parse("foo").unwrap();
    delegate::create_authorizer(
        &mut txn,
        root.uuid,
        &foo,
        &delegate_person.person,
        Some(delegate_person.signatory.signatory()),
    )
    .unwrap();

    let inside = Statement::new(&root, "inside").with_identifier(Namespace::parse("foo.x").unwrap());
    let outside = Statement::new(&root, "outside").with_identifier(Namespace::parse("bar").unwrap());
    let unnamed = Statement::new(&root, "unnamed");
    for statement in [&inside, &outside, &unnamed] {
        author(&mut txn, statement, &owner)
            .sign(&mut txn, &delegate_person.signatory)
            .unwrap();
    }
    assert!(flags(&txn, &inside).0);
    assert!(!flags(&txn, &outside).0);
    assert!(!flags(&txn, &unnamed).0);

    // The owner has no grant of their own, so their signature alone does not count
    let mut owner_signed = StatementAuthority::load(&*txn, outside.uuid).unwrap();
    owner_signed.sign(&mut txn, &owner.signatory).unwrap();
    assert!(!flags(&txn, &outside).0);
}

#[test]
fn test_changing_the_authorizer_moves_validity() {
    let (manager, _clock) = test_manager();
    let mut txn = manager.begin().unwrap();
    let owner = private_person(&mut txn, "owner");
    let root = Statement::root_context("T", "C");
    author_and_sign(&mut txn, &root, &owner);

    let bob = private_person(&mut txn, "bob");
    let x = PrivateSignatory::generate(&mut txn, KeyStorage::Plain).unwrap();
    let y = PrivateSignatory::generate(&mut txn, KeyStorage::Plain).unwrap();
    let mut grant = delegate::create_authorizer(
        &mut txn,
        root.uuid,
        &Namespace::root(),
        &bob.person,
        Some(x.signatory()),
    )
    .unwrap();

    let statement = Statement::new(&root, "s");
    let mut authority = author(&mut txn, &statement, &owner);
    authority.sign(&mut txn, &x).unwrap();
    authority.sign(&mut txn, &y).unwrap();
    assert!(flags(&txn, &statement).0);

    grant.set_authorizer(&mut txn, Some(y.signatory())).unwrap();
    assert_eq!(grant.authorizer_uuid, Some(y.uuid()));
    let signatures = authority.signatures(&*txn).unwrap();
    let valid_by = |uuid| {
        signatures
            .iter()
            .find(|signature| signature.authorizer_uuid == uuid)
            .map(|signature| signature.valid)
    };
    assert_eq!(valid_by(x.uuid()), Some(false));
    assert_eq!(valid_by(y.uuid()), Some(true));
    assert!(flags(&txn, &statement).0);

    grant.set_authorizer(&mut txn, None).unwrap();
    assert!(!flags(&txn, &statement).0);
}

#[test]
fn test_successor_keeps_delegation_alive() {
    let (manager, _clock) = test_manager();
    let mut txn = manager.begin().unwrap();
    let owner = private_person(&mut txn, "owner");
    let root = signed_root(&mut txn, &owner, "T", "C");
    let statement = Statement::new(&root, "s");
    author_and_sign(&mut txn, &statement, &owner);
    assert!(flags(&txn, &statement).0);

    // The owner hands root signing to a successor
    let heir = private_person(&mut txn, "heir");
    let date = txn.now();
    delegate::add_successor_entry(&mut txn, root.uuid, &heir.person, date).unwrap();
    delegate::sign_root(&mut txn, root.uuid).unwrap();
    assert!(delegate::is_root_signed(&*txn, root.uuid).unwrap());
    assert!(flags(&txn, &statement).0);

    let root_node = delegate::load_node(&*txn, root.uuid, &Namespace::root()).unwrap();
    let data = root_node.root_data().unwrap();
    assert_eq!(data.holder(owner.uuid()), heir.uuid());

    // The author cannot be appended as a successor
    let date = txn.now();
    let err = delegate::add_successor_entry(&mut txn, root.uuid, &owner.person, date).unwrap_err();
    assert!(err.is_chain_error());
}
