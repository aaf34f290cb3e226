use chrono::{DateTime, Utc};
use thiserror::Error;

use super::records::VersionExpectation;
use crate::decoder::DecodeError;
use crate::types::CompilationError;

/// Failures of the storage layer. A failed write leaves nothing behind.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StorageError {
    #[error("version conflict on rule '{rule_id}': expected {expected}, latest is {}", .latest.map_or_else(|| "none".to_owned(), |v| v.to_string()))]
    Conflict {
        rule_id: String,
        expected: VersionExpectation,
        latest: Option<u32>,
    },

    #[error("refusing event for rule '{rule_id}' version {version}: no such version")]
    OrphanEvent { rule_id: String, version: u32 },

    #[error("rule '{rule_id}' is already deprecated")]
    AlreadyDeprecated { rule_id: String },

    #[error("storage backend error: {0}")]
    Backend(String),
}

/// Errors from [`VersionedRuleService`](super::VersionedRuleService).
///
/// [`is_user_error`](Self::is_user_error) separates caller misuse from
/// storage failures.
#[derive(Debug, Error)]
pub enum VersioningError {
    #[error("rule '{rule_id}' already exists at version {version}; use update_rule")]
    AlreadyExists { rule_id: String, version: u32 },

    #[error("rule '{rule_id}' not found")]
    NotFound { rule_id: String },

    #[error("version {version} not found for rule '{rule_id}'")]
    VersionNotFound { rule_id: String, version: u32 },

    #[error("rule '{rule_id}' is already deprecated")]
    AlreadyDeprecated { rule_id: String },

    #[error("effective date {requested} of rule '{rule_id}' precedes the latest version's {latest}")]
    EffectiveDateRegression {
        rule_id: String,
        latest: DateTime<Utc>,
        requested: DateTime<Utc>,
    },

    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error(transparent)]
    Compile(#[from] CompilationError),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl VersioningError {
    /// True for errors caused by the request itself rather than by storage
    /// or stored content.
    #[must_use]
    pub fn is_user_error(&self) -> bool {
        matches!(
            self,
            VersioningError::AlreadyExists { .. }
                | VersioningError::NotFound { .. }
                | VersioningError::VersionNotFound { .. }
                | VersioningError::AlreadyDeprecated { .. }
                | VersioningError::EffectiveDateRegression { .. }
        )
    }
}
