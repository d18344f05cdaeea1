/*! Integration tests for the Aletheia authority layer.
 *
 * This test suite is organized as a single integration test binary
 * following the pattern described by matklad in
 * https://matklad.github.io/2021/02/27/delete-cargo-integration-tests.html
 *
 * The module structure mirrors the main library structure:
 * - authority: Validity flags, their propagation and delegated signing end to end
 * - person: Orphan lifecycle and garbage collection across stores
 * - request: Signature requests travelling between two stores
 * - crypto: Signing and verification through persisted signatories
 * - events: Listener dispatch of committed changes
 */

use tracing_subscriber::EnvFilter;

#[ctor::ctor]
fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("aletheia_authority=info".parse().unwrap()),
        )
        .with_test_writer()
        .try_init();
}

mod authority;
mod crypto;
mod events;
mod helpers;
mod person;
mod request;
