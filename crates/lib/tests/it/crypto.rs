//! Signing and verification through persisted signatories

use std::sync::Arc;

use aletheia_authority::{
    FixedClock, PersistenceManager,
    backend::InMemory,
    person::{Person, PrivatePerson},
    signatory::{KeyStorage, PrivateSignatory, Signatory},
};

use crate::helpers::*;

#[test]
fn test_signatures_verify_only_for_the_signed_bytes_and_key() {
    let (manager, _clock) = test_manager();
    let mut txn = manager.begin().unwrap();
    let signer = PrivateSignatory::generate(&mut txn, KeyStorage::Plain).unwrap();
    let stranger = PrivateSignatory::generate(&mut txn, KeyStorage::Plain).unwrap();

    let message = b"theorem: every group of prime order is cyclic".to_vec();
    let signature = signer.sign(&message);
    let public = Signatory::load(&*txn, signer.uuid()).unwrap();
    assert!(public.verify(&signature, &message));
    assert!(!stranger.signatory().verify(&signature, &message));

    for index in 0..message.len() {
        let mut tampered = message.clone();
        tampered[index] ^= 0x01;
        assert!(
            !public.verify(&signature, &tampered),
            "flipping byte {index} should break the signature"
        );
    }
}

#[test]
fn test_encrypted_keys_survive_a_reload() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("keys.json");

    let backend = Arc::new(InMemory::new());
    let clock = Arc::new(FixedClock::new(CLOCK_START));
    let manager = PersistenceManager::with_clock(backend.clone(), clock.clone());
    manager.secrets().set_passphrase("correct horse battery staple");
    let mut txn = manager.begin().unwrap();
    let alice = PrivatePerson::create(&mut txn, KeyStorage::Encrypted, "alice", None, None).unwrap();
    txn.commit().unwrap();
    backend.save_to_file(&path).unwrap();

    let reloaded =
        PersistenceManager::with_clock(Arc::new(InMemory::load_from_file(&path).unwrap()), clock);
    let txn = reloaded.begin().unwrap();
    assert!(Signatory::is_private(&*txn, alice.uuid()).unwrap());
    let err = PrivateSignatory::load(&txn, alice.uuid()).unwrap_err();
    assert!(err.is_missing_private_data());

    reloaded.secrets().set_passphrase("correct horse battery staple");
    let signatory = PrivateSignatory::load(&txn, alice.uuid()).unwrap();
    let signature = signatory.sign(b"lemma");
    assert!(alice.signatory.signatory().verify(&signature, b"lemma"));
    Person::load(&*txn, alice.uuid())
        .unwrap()
        .verify(&*txn)
        .unwrap();
}
