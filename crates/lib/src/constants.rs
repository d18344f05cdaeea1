//! Constants used throughout the library.
//!
//! Central definitions for protocol constants and configuration defaults.

/// Default number of days a person may stay orphan before it is garbage collected.
pub const DEFAULT_ORPHAN_GRACE_DAYS: u64 = 7;

/// Default size of the descendant-context candidate set above which a signed-proof
/// reset first looks for a safe alternative statement.
pub const DEFAULT_DESCENDANT_CONTEXT_RESET_THRESHOLD: usize = 70;

/// Default segment size of the packed signature request stream (64 KiB).
pub const DEFAULT_PACK_SEGMENT_SIZE: usize = 64 * 1024;

/// Version tag written at the start of a packed signature request payload.
pub const PACKED_REQUEST_VERSION: u16 = 0;

/// Separator used when rendering a namespace as text.
pub const NAMESPACE_SEPARATOR: char = '.';

/// Algorithm prefix used in textual key representations.
pub const ED25519_PREFIX: &str = "ed25519";
