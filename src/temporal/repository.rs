use chrono::{DateTime, Utc};

use super::error::StorageError;
use super::records::{
    EventDraft, NewVersion, RuleEventRecord, RuleVersionRecord, VersionExpectation,
};

/// Storage of immutable rule version snapshots.
///
/// Implementations must keep, per rule id: versions numbered 1, 2, 3, ...
/// without gaps; exactly one record with `superseded_by == None`; and every
/// earlier record's `superseded_by` equal to the next version's number.
pub trait RuleVersionRepository: Send + Sync {
    /// Write the next version of `new.rule_id`, superseding the current
    /// latest. Prefer [`TemporalStore::commit_version`], which also records
    /// the paired event.
    ///
    /// # Errors
    ///
    /// [`StorageError::Conflict`] if `new.expected` does not hold.
    fn create_version(&self, new: NewVersion) -> Result<RuleVersionRecord, StorageError>;

    /// # Errors
    ///
    /// Backend failures only; a missing version is `Ok(None)`.
    fn get_version(
        &self,
        rule_id: &str,
        version: u32,
    ) -> Result<Option<RuleVersionRecord>, StorageError>;

    /// # Errors
    ///
    /// Backend failures only.
    fn get_latest_version(&self, rule_id: &str) -> Result<Option<RuleVersionRecord>, StorageError>;

    /// The most recent `limit` versions, oldest first.
    ///
    /// # Errors
    ///
    /// Backend failures only.
    fn get_version_history(
        &self,
        rule_id: &str,
        limit: usize,
    ) -> Result<Vec<RuleVersionRecord>, StorageError>;

    /// The version whose effective window contains `ts`.
    ///
    /// # Errors
    ///
    /// Backend failures only.
    fn get_version_at_timestamp(
        &self,
        rule_id: &str,
        ts: DateTime<Utc>,
    ) -> Result<Option<RuleVersionRecord>, StorageError>;
}

/// The append-only rule event log.
pub trait RuleEventRepository: Send + Sync {
    /// Append an event against an existing version.
    ///
    /// # Errors
    ///
    /// [`StorageError::OrphanEvent`] if `(rule_id, version)` has no version
    /// record.
    fn append_event(
        &self,
        rule_id: &str,
        version: u32,
        draft: EventDraft,
    ) -> Result<RuleEventRecord, StorageError>;

    /// Events for one rule in sequence order.
    ///
    /// # Errors
    ///
    /// Backend failures only.
    fn get_events_for_rule(&self, rule_id: &str) -> Result<Vec<RuleEventRecord>, StorageError>;

    /// Events with a sequence number greater than `after`, in order.
    ///
    /// # Errors
    ///
    /// Backend failures only.
    fn get_events_since(&self, after: u64) -> Result<Vec<RuleEventRecord>, StorageError>;
}

/// Both repositories behind one transactional boundary.
pub trait TemporalStore: RuleVersionRepository + RuleEventRepository {
    /// Write a version and its event atomically: both become visible or
    /// neither does.
    ///
    /// # Errors
    ///
    /// [`StorageError::Conflict`] if `new.expected` does not hold; any other
    /// error also leaves the store unchanged.
    fn commit_version(
        &self,
        new: NewVersion,
        event: EventDraft,
    ) -> Result<(RuleVersionRecord, RuleEventRecord), StorageError>;

    /// Append a `RuleDeprecated` event against the latest version. The
    /// expectation and the rule's last event are checked in the same
    /// transaction as the append.
    ///
    /// # Errors
    ///
    /// [`StorageError::Conflict`] if the rule has no version or `expected`
    /// does not hold, or [`StorageError::AlreadyDeprecated`] if the rule's most recent event
    /// is already a deprecation. Either leaves the store unchanged.
    fn commit_deprecation(
        &self,
        rule_id: &str,
        expected: VersionExpectation,
        draft: EventDraft,
    ) -> Result<RuleEventRecord, StorageError>;
}
