//! Delegate trees of statement authorities.
//!
//! The author of a context grants signing rights over the statements inside it
//! through a tree keyed by namespace prefix. Each node lists delegates, each
//! delegate carries a [`DelegateAuthorizer`] naming the signatory that signs
//! for it, and every node holds a digest over its delegates and children. The
//! root digest is signed by the current holder of the successor chain, so one
//! signature covers the whole tree.
//!
//! A signature on a statement inside the context is authorized when the root
//! is validly signed and some signed authorizer at a node whose prefix contains
//! the statement's prefix names the signer and has not revoked the signature.
//!
//! All local changes recompute digests up to the root and re-sign it if a
//! holder of the chain is private here. Whenever the root's signed state flips,
//! every signature inside the context is rechecked.

mod authorizer;
mod errors;
mod node;
mod successor;

pub use authorizer::{DelegateAuthorizer, create_authorizer, delete_authorizer};
pub use errors::DelegateError;
pub use node::{
    DelegateNodeKind, DelegateTreeNode, RootNodeData, compute_digest, delete_node,
    delete_subtree, digests_consistent, get_or_create_root, get_or_create_sub_node, load_node,
    update_upward,
};
pub use successor::{
    SuccessorEntry, add_successor_entry, delete_successor_entries_from, is_root_signed, sign_root,
    sign_root_from_earliest,
};
pub(crate) use node::detached_tree_consistent;
pub(crate) use successor::root_chain_verifies;

#[cfg(test)]
mod tests;
