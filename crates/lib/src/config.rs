//! Configuration for the authority core.
//!
//! [`AuthorityConfig`] holds the tunables of the persistence manager. It is plain
//! serde data so it can live in a JSON file next to the store:
//!
//! ```json
//! { "orphan_grace_period_days": 7, "descendant_context_reset_threshold": 70 }
//! ```
//!
//! Missing fields fall back to their defaults.

use std::path::Path;

use chrono::Duration;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::constants::{
    DEFAULT_DESCENDANT_CONTEXT_RESET_THRESHOLD, DEFAULT_ORPHAN_GRACE_DAYS,
    DEFAULT_PACK_SEGMENT_SIZE,
};
use crate::{Error, Result};

/// Errors raised when validating an [`AuthorityConfig`].
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A configured value is outside its accepted range.
    #[error("Invalid configuration value for {field}: {reason}")]
    InvalidValue {
        /// The offending field
        field: &'static str,
        /// Why the value was rejected
        reason: String,
    },
}

impl From<ConfigError> for Error {
    fn from(err: ConfigError) -> Self {
        Error::Config(err)
    }
}

/// Tunables of the [`PersistenceManager`](crate::PersistenceManager).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthorityConfig {
    /// Days a person may stay orphan before it becomes eligible for deletion.
    pub orphan_grace_period_days: u64,

    /// Number of descendant contexts sharing a consequent above which a signed-proof
    /// reset first searches for a safe alternative statement before clearing them.
    pub descendant_context_reset_threshold: usize,

    /// Maximum payload size of one segment of a packed signature request.
    pub pack_segment_size: usize,

    /// Whether signatories generated without an explicit storage choice are encrypted
    /// under the manager's secret passphrase.
    pub encrypt_new_signatories: bool,
}

impl Default for AuthorityConfig {
    fn default() -> Self {
        Self {
            orphan_grace_period_days: DEFAULT_ORPHAN_GRACE_DAYS,
            descendant_context_reset_threshold: DEFAULT_DESCENDANT_CONTEXT_RESET_THRESHOLD,
            pack_segment_size: DEFAULT_PACK_SEGMENT_SIZE,
            encrypt_new_signatories: false,
        }
    }
}

impl AuthorityConfig {
    /// Load a configuration from a JSON file and validate it.
    ///
    /// A missing file yields the default configuration.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Self::default());
        }
        let json = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&json)?;
        config.validate()?;
        Ok(config)
    }

    /// Check value ranges.
    pub fn validate(&self) -> Result<()> {
        if self.descendant_context_reset_threshold == 0 {
            return Err(ConfigError::InvalidValue {
                field: "descendant_context_reset_threshold",
                reason: "must be at least 1".to_string(),
            }
            .into());
        }
        if self.pack_segment_size == 0 || self.pack_segment_size > u32::MAX as usize {
            return Err(ConfigError::InvalidValue {
                field: "pack_segment_size",
                reason: format!("{} is not a valid segment size", self.pack_segment_size),
            }
            .into());
        }
        Ok(())
    }

    /// The orphan grace period as a duration.
    pub fn orphan_grace_period(&self) -> Duration {
        Duration::days(self.orphan_grace_period_days as i64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_uses_defaults() {
        let config: AuthorityConfig =
            serde_json::from_str(r#"{"descendant_context_reset_threshold": 100}"#).unwrap();
        assert_eq!(config.descendant_context_reset_threshold, 100);
        assert_eq!(config.orphan_grace_period_days, 7);
        assert_eq!(config.pack_segment_size, 64 * 1024);
    }

    #[test]
    fn zero_threshold_is_rejected() {
        let config = AuthorityConfig {
            descendant_context_reset_threshold: 0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn missing_file_yields_default() {
        let dir = tempfile::tempdir().unwrap();
        let config = AuthorityConfig::from_json_file(dir.path().join("absent.json")).unwrap();
        assert_eq!(config, AuthorityConfig::default());
    }
}
