use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::ContentHash;

/// Kinds of entries in the rule event log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RuleEventType {
    #[serde(rename = "RuleCreated")]
    Created,
    #[serde(rename = "RuleUpdated")]
    Updated,
    #[serde(rename = "RuleDeprecated")]
    Deprecated,
}

impl RuleEventType {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            RuleEventType::Created => "RuleCreated",
            RuleEventType::Updated => "RuleUpdated",
            RuleEventType::Deprecated => "RuleDeprecated",
        }
    }
}

impl fmt::Display for RuleEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An immutable snapshot of one rule version.
///
/// Only the supersession fields (`superseded_by`, `superseded_at`,
/// `effective_to`) are ever written after creation, exactly once, when the
/// next version is committed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleVersionRecord {
    pub id: Uuid,
    pub rule_id: String,
    pub version: u32,
    pub content_hash: ContentHash,
    /// The rule text exactly as submitted.
    pub content_yaml: String,
    pub effective_from: DateTime<Utc>,
    pub effective_to: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub created_by: Option<String>,
    pub superseded_by: Option<u32>,
    pub superseded_at: Option<DateTime<Utc>>,
    pub jurisdiction_code: Option<String>,
    pub regime_id: Option<String>,
}

impl RuleVersionRecord {
    #[must_use]
    pub fn is_latest(&self) -> bool {
        self.superseded_by.is_none()
    }

    /// `effective_from <= ts < effective_to`, with an open end for the
    /// latest version.
    #[must_use]
    pub fn is_effective_at(&self, ts: DateTime<Utc>) -> bool {
        self.effective_from <= ts && self.effective_to.is_none_or(|end| ts < end)
    }
}

/// An append-only log entry. Never updated or deleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleEventRecord {
    pub id: Uuid,
    /// Global, strictly increasing across all rules.
    pub sequence_number: u64,
    pub rule_id: String,
    pub version: u32,
    pub event_type: RuleEventType,
    pub event_data: serde_json::Value,
    pub timestamp: DateTime<Utc>,
    pub actor: Option<String>,
    pub reason: Option<String>,
}

/// What the writer believes the latest version to be. A store rejects the
/// write with [`StorageError::Conflict`](super::StorageError::Conflict) if
/// it is wrong.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VersionExpectation {
    Any,
    NoVersion,
    Latest(u32),
}

impl VersionExpectation {
    #[must_use]
    pub fn matches(self, latest: Option<u32>) -> bool {
        match self {
            VersionExpectation::Any => true,
            VersionExpectation::NoVersion => latest.is_none(),
            VersionExpectation::Latest(v) => latest == Some(v),
        }
    }
}

impl fmt::Display for VersionExpectation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VersionExpectation::Any => f.write_str("any version"),
            VersionExpectation::NoVersion => f.write_str("no version"),
            VersionExpectation::Latest(v) => write!(f, "version {v}"),
        }
    }
}

/// A version about to be written. The store assigns id, number and
/// creation time.
#[derive(Debug, Clone)]
pub struct NewVersion {
    pub rule_id: String,
    pub content_hash: ContentHash,
    pub content_yaml: String,
    pub effective_from: DateTime<Utc>,
    pub created_by: Option<String>,
    pub jurisdiction_code: Option<String>,
    pub regime_id: Option<String>,
    pub expected: VersionExpectation,
}

/// An event about to be appended. The store assigns id, sequence number
/// and timestamp.
#[derive(Debug, Clone)]
pub struct EventDraft {
    pub event_type: RuleEventType,
    pub event_data: serde_json::Value,
    pub actor: Option<String>,
    pub reason: Option<String>,
}
