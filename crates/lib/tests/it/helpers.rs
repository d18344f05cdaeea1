use std::sync::Arc;

use aletheia_authority::{
    AuthorityConfig, FixedClock, Namespace, PersistenceManager, Statement, Transaction,
    authority::StatementAuthority,
    backend::InMemory,
    delegate,
    person::PrivatePerson,
    signatory::KeyStorage,
};

// ==========================
// CORE TEST FACTORIES
// ==========================

/// Start of the test clock, in milliseconds since the epoch.
pub const CLOCK_START: u64 = 1_700_000_000_000;

/// An in-memory manager with a controllable clock.
pub fn test_manager() -> (PersistenceManager, Arc<FixedClock>) {
    let clock = Arc::new(FixedClock::new(CLOCK_START));
    let manager = PersistenceManager::with_clock(Arc::new(InMemory::new()), clock.clone());
    (manager, clock)
}

/// Like [`test_manager`] with a custom configuration.
pub fn test_manager_with_config(config: AuthorityConfig) -> PersistenceManager {
    let (manager, _clock) = test_manager();
    manager
        .with_config(config)
        .expect("Test configuration should be valid")
}

/// A person with a plain stored key.
pub fn private_person(txn: &mut Transaction<'_>, nick: &str) -> PrivatePerson {
    PrivatePerson::create(txn, KeyStorage::Plain, nick, None, None)
        .expect("Failed to create private person")
}

// ==========================
// STATEMENT FACTORIES
// ==========================

/// Author `statement` as `author` without signing it.
pub fn author(
    txn: &mut Transaction<'_>,
    statement: &Statement,
    author: &PrivatePerson,
) -> StatementAuthority {
    StatementAuthority::create(txn, statement, &author.person)
        .expect("Failed to create statement authority")
}

/// Author `statement` as `author` and sign it with the author's key.
pub fn author_and_sign(
    txn: &mut Transaction<'_>,
    statement: &Statement,
    author: &PrivatePerson,
) -> StatementAuthority {
    let mut authority = self::author(txn, statement, author);
    authority
        .sign(txn, &author.signatory)
        .expect("Failed to sign statement authority");
    authority
}

/// Let the author of `context` sign anything inside it by delegating the whole
/// namespace to themself.
pub fn delegate_to_author(txn: &mut Transaction<'_>, context: &Statement, author: &PrivatePerson) {
    delegate::create_authorizer(
        txn,
        context.uuid,
        &Namespace::root(),
        &author.person,
        Some(author.signatory.signatory()),
    )
    .expect("Failed to delegate to the author");
}

/// A signed root context whose author may sign everything inside it.
pub fn signed_root(
    txn: &mut Transaction<'_>,
    owner: &PrivatePerson,
    term: &str,
    consequent: &str,
) -> Statement {
    let root = Statement::root_context(term, consequent);
    author_and_sign(txn, &root, owner);
    delegate_to_author(txn, &root, owner);
    root
}

// ==========================
// ASSERTION HELPERS
// ==========================

/// `(valid_signature, signed_dependencies, signed_proof)` of a statement.
pub fn flags(txn: &Transaction<'_>, statement: &Statement) -> (bool, bool, bool) {
    let authority = StatementAuthority::load(&**txn, statement.uuid)
        .expect("Statement should be authored");
    (
        authority.valid_signature,
        authority.signed_dependencies,
        authority.signed_proof,
    )
}

/// Check `signed_proof => signed_dependencies => valid_signature` for each statement.
pub fn assert_flag_chain(txn: &Transaction<'_>, statements: &[&Statement]) {
    for statement in statements {
        let (valid, dependencies, proof) = flags(txn, statement);
        assert!(
            !proof || dependencies,
            "signed_proof without signed_dependencies on '{}'",
            statement.term
        );
        assert!(
            !dependencies || valid,
            "signed_dependencies without valid_signature on '{}'",
            statement.term
        );
    }
}
