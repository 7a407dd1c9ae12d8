//! Store configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;
use crate::source::FederationMode;

/// Configuration shared by the database and the components built on it.
///
/// Deserializes from JSON with every field optional:
///
/// ```
/// use termstore::TermStoreConfig;
///
/// let cfg = TermStoreConfig::from_json(r#"{ "max_text_bytes": 400 }"#).unwrap();
/// assert_eq!(cfg.max_text_bytes, 400);
/// assert_eq!(cfg.max_language_bytes, 20);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TermStoreConfig {
    /// Longest accepted text, in UTF-8 bytes, after normalization.
    pub max_text_bytes: usize,
    /// Longest accepted language code, in bytes.
    pub max_language_bytes: usize,
    /// How long a writer waits for another writer's entity row lock.
    pub lock_wait_timeout_ms: u64,
    /// Attempts for unique-key and foreign-key races before giving up.
    pub max_acquire_attempts: u32,
    /// How entity ownership is decided.
    pub federation: FederationMode,
}

impl Default for TermStoreConfig {
    fn default() -> Self {
        Self {
            max_text_bytes: 255,
            max_language_bytes: 20,
            lock_wait_timeout_ms: 5_000,
            max_acquire_attempts: 5,
            federation: FederationMode::default(),
        }
    }
}

impl TermStoreConfig {
    /// Parses and validates a JSON configuration document.
    pub fn from_json(json: &str) -> Result<Self, ValidationError> {
        let cfg: Self = serde_json::from_str(json).map_err(|e| ValidationError::InvalidConfig {
            reason: e.to_string(),
        })?;
        cfg.validate()
    }

    pub fn validate(self) -> Result<Self, ValidationError> {
        let invalid = |reason: String| Err(ValidationError::InvalidConfig { reason });

        if self.max_text_bytes == 0 {
            return invalid("max_text_bytes must be positive".to_string());
        }
        if self.max_language_bytes == 0 {
            return invalid("max_language_bytes must be positive".to_string());
        }
        if self.lock_wait_timeout_ms == 0 {
            return invalid("lock_wait_timeout_ms must be positive".to_string());
        }
        if self.max_acquire_attempts == 0 {
            return invalid(format!(
                "max_acquire_attempts must be at least 1 (got {})",
                self.max_acquire_attempts
            ));
        }
        Ok(self)
    }

    #[must_use]
    pub const fn lock_wait_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_wait_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        assert!(TermStoreConfig::default().validate().is_ok());
    }

    #[test]
    fn test_rejects_zero_attempts() {
        let cfg = TermStoreConfig {
            max_acquire_attempts: 0,
            ..TermStoreConfig::default()
        };
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("max_acquire_attempts"));
    }

    #[test]
    fn test_from_json_reads_federation() {
        let cfg = TermStoreConfig::from_json(r#"{ "federation": "entity_source" }"#).unwrap();
        assert_eq!(cfg.federation, FederationMode::EntitySource);
    }

    #[test]
    fn test_from_json_rejects_bad_document() {
        assert!(TermStoreConfig::from_json("{ not json").is_err());
        assert!(TermStoreConfig::from_json(r#"{ "lock_wait_timeout_ms": 0 }"#).is_err());
    }
}
