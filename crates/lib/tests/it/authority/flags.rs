//! Propagation of `signed_dependencies` and `signed_proof`
//!
//! Tests how validity flows:
//! - upward through dependency edges
//! - from solvers into the contexts they solve
//! - back out again when a signature disappears, including the safe
//!   alternative shortcut of the signed-proof reset

use aletheia_authority::{AuthorityConfig, Statement, Transaction, events::AuthorityEvent};

use crate::helpers::*;

#[test]
fn test_signed_dependencies_follow_the_dependency_chain() {
    let (manager, _clock) = test_manager();
    let mut txn = manager.begin().unwrap();
    let alice = private_person(&mut txn, "alice");
    let root = signed_root(&mut txn, &alice, "T", "C");

    let a = Statement::new(&root, "a");
    let b = Statement::new(&root, "b").with_dependencies([&a]);
    let mut a_authority = author(&mut txn, &a, &alice);
    author_and_sign(&mut txn, &b, &alice);

    // b is signed but a is not
    assert_eq!(flags(&txn, &a), (false, false, false));
    assert_eq!(flags(&txn, &b), (true, false, false));

    a_authority.sign(&mut txn, &alice.signatory).unwrap();
    assert_eq!(flags(&txn, &a), (true, true, true));
    assert_eq!(flags(&txn, &b), (true, true, true));

    a_authority
        .delete_signature(&mut txn, alice.uuid())
        .unwrap();
    assert_eq!(flags(&txn, &a), (false, false, false));
    assert_eq!(flags(&txn, &b), (true, false, false));
    assert_flag_chain(&txn, &[&root, &a, &b]);
}

#[test]
fn test_context_proof_waits_for_a_signed_solver() {
    let (manager, _clock) = test_manager();
    let mut txn = manager.begin().unwrap();
    let alice = private_person(&mut txn, "alice");
    let root = signed_root(&mut txn, &alice, "T", "C");
    assert_eq!(flags(&txn, &root), (true, true, false));

    let k = Statement::context(&root, "K", "goal");
    author_and_sign(&mut txn, &k, &alice);
    delegate_to_author(&mut txn, &k, &alice);
    assert_eq!(flags(&txn, &k), (true, true, false));

    let solver = Statement::new(&k, "goal");
    let mut solver_authority = author_and_sign(&mut txn, &solver, &alice);
    assert_eq!(flags(&txn, &solver), (true, true, true));
    assert_eq!(flags(&txn, &k), (true, true, true));

    // Solving the root context through a statement that uses K
    let conclusion = Statement::new(&root, "C").with_dependencies([&k]);
    author_and_sign(&mut txn, &conclusion, &alice);
    assert_eq!(flags(&txn, &conclusion), (true, true, true));
    assert_eq!(flags(&txn, &root), (true, true, true));

    solver_authority
        .delete_signature(&mut txn, alice.uuid())
        .unwrap();
    assert_eq!(flags(&txn, &solver), (false, false, false));
    assert_eq!(flags(&txn, &k), (true, true, false));
    assert_eq!(flags(&txn, &conclusion), (true, true, false));
    assert_eq!(flags(&txn, &root), (true, true, false));
    assert_flag_chain(&txn, &[&root, &k, &solver, &conclusion]);
}

#[test]
fn test_solver_depending_on_its_context_does_not_count() {
    let (manager, _clock) = test_manager();
    let mut txn = manager.begin().unwrap();
    let alice = private_person(&mut txn, "alice");
    let root = signed_root(&mut txn, &alice, "T", "C");

    let k = Statement::context(&root, "K", "goal");
    author_and_sign(&mut txn, &k, &alice);
    let circular = Statement::new(&root, "goal").with_dependencies([&k]);
    author_and_sign(&mut txn, &circular, &alice);

    assert_eq!(flags(&txn, &k), (true, true, false));
    assert_eq!(flags(&txn, &circular), (true, true, false));
}

/// Count the queued `signed_proof` resets of `contexts` since event `since`.
fn context_resets(txn: &Transaction<'_>, since: usize, contexts: &[&Statement]) -> usize {
    txn.pending_events()[since..]
        .iter()
        .filter(|event| {
            matches!(
                event,
                AuthorityEvent::SignedProofChanged { statement_uuid, value: false }
                    if contexts.iter().any(|c| c.uuid == *statement_uuid)
            )
        })
        .count()
}

#[test]
fn test_safe_alternative_skips_descendant_context_reset() {
    // Two contexts to reset: the shortcut applies from a threshold of 2.
    for (threshold, resets) in [(2, 0), (3, 2)] {
        let manager = test_manager_with_config(AuthorityConfig {
            descendant_context_reset_threshold: threshold,
            ..AuthorityConfig::default()
        });
        let mut txn = manager.begin().unwrap();
        let alice = private_person(&mut txn, "alice");
        let root = signed_root(&mut txn, &alice, "T", "C");

        let first = Statement::new(&root, "goal");
        let second = Statement::new(&root, "goal");
        let mut first_authority = author_and_sign(&mut txn, &first, &alice);
        author_and_sign(&mut txn, &second, &alice);
        let k1 = Statement::context(&root, "K1", "goal");
        let k2 = Statement::context(&root, "K2", "goal");
        author_and_sign(&mut txn, &k1, &alice);
        author_and_sign(&mut txn, &k2, &alice);

        let since = txn.pending_events().len();
        first_authority
            .delete_signature(&mut txn, alice.uuid())
            .unwrap();
        assert_eq!(
            context_resets(&txn, since, &[&k1, &k2]),
            resets,
            "threshold {threshold}"
        );
        assert_eq!(flags(&txn, &k1), (true, true, true), "threshold {threshold}");
        assert_eq!(flags(&txn, &k2), (true, true, true), "threshold {threshold}");
        assert_flag_chain(&txn, &[&root, &first, &second, &k1, &k2]);
    }
}

#[test]
fn test_descendant_contexts_reset_without_safe_alternative() {
    let manager = test_manager_with_config(AuthorityConfig {
        descendant_context_reset_threshold: 2,
        ..AuthorityConfig::default()
    });
    let mut txn = manager.begin().unwrap();
    let alice = private_person(&mut txn, "alice");
    let root = signed_root(&mut txn, &alice, "T", "C");

    let only = Statement::new(&root, "goal");
    let mut only_authority = author_and_sign(&mut txn, &only, &alice);
    let k1 = Statement::context(&root, "K1", "goal");
    let k2 = Statement::context(&root, "K2", "goal");
    author_and_sign(&mut txn, &k1, &alice);
    author_and_sign(&mut txn, &k2, &alice);
    assert_eq!(flags(&txn, &k1), (true, true, true));

    let since = txn.pending_events().len();
    only_authority
        .delete_signature(&mut txn, alice.uuid())
        .unwrap();
    assert_eq!(context_resets(&txn, since, &[&k1, &k2]), 2);
    assert_eq!(flags(&txn, &k1), (true, true, false));
    assert_eq!(flags(&txn, &k2), (true, true, false));
    assert_flag_chain(&txn, &[&root, &only, &k1, &k2]);
}

#[test]
fn test_deleting_an_authority_clears_dependents() {
    let (manager, _clock) = test_manager();
    let mut txn = manager.begin().unwrap();
    let alice = private_person(&mut txn, "alice");
    let root = signed_root(&mut txn, &alice, "T", "C");

    let a = Statement::new(&root, "a");
    let b = Statement::new(&root, "b").with_dependencies([&a]);
    author_and_sign(&mut txn, &a, &alice);
    author_and_sign(&mut txn, &b, &alice);
    assert_eq!(flags(&txn, &b), (true, true, true));

    aletheia_authority::authority::StatementAuthority::delete(&mut txn, a.uuid).unwrap();
    assert_eq!(flags(&txn, &b), (true, false, false));
}
