use std::collections::HashMap;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tracing::debug;
use uuid::Uuid;

use super::error::StorageError;
use super::records::{
    EventDraft, NewVersion, RuleEventRecord, RuleEventType, RuleVersionRecord, VersionExpectation,
};
use super::repository::{RuleEventRepository, RuleVersionRepository, TemporalStore};

#[derive(Debug, Default)]
struct Inner {
    /// Per rule, `versions[i].version == i + 1`.
    versions: HashMap<String, Vec<RuleVersionRecord>>,
    events: Vec<RuleEventRecord>,
    last_sequence: u64,
}

impl Inner {
    fn history(&self, rule_id: &str) -> &[RuleVersionRecord] {
        self.versions.get(rule_id).map(Vec::as_slice).unwrap_or_default()
    }

    fn latest(&self, rule_id: &str) -> Option<&RuleVersionRecord> {
        self.history(rule_id).last()
    }

    fn has_version(&self, rule_id: &str, version: u32) -> bool {
        version >= 1 && self.history(rule_id).len() >= version as usize
    }

    fn is_deprecated(&self, rule_id: &str) -> bool {
        self.events
            .iter()
            .rev()
            .find(|e| e.rule_id == rule_id)
            .is_some_and(|e| e.event_type == RuleEventType::Deprecated)
    }

    /// Build the record without touching state.
    fn stage_version(
        &self,
        new: NewVersion,
        now: DateTime<Utc>,
    ) -> Result<RuleVersionRecord, StorageError> {
        let latest = self.latest(&new.rule_id).map(|r| r.version);
        if !new.expected.matches(latest) {
            return Err(StorageError::Conflict {
                rule_id: new.rule_id,
                expected: new.expected,
                latest,
            });
        }
        let version = latest
            .unwrap_or(0)
            .checked_add(1)
            .ok_or_else(|| StorageError::Backend("version number overflow".into()))?;

        Ok(RuleVersionRecord {
            id: Uuid::new_v4(),
            rule_id: new.rule_id,
            version,
            content_hash: new.content_hash,
            content_yaml: new.content_yaml,
            effective_from: new.effective_from,
            effective_to: None,
            created_at: now,
            created_by: new.created_by,
            superseded_by: None,
            superseded_at: None,
            jurisdiction_code: new.jurisdiction_code,
            regime_id: new.regime_id,
        })
    }

    fn stage_event(
        &self,
        rule_id: &str,
        version: u32,
        draft: EventDraft,
        now: DateTime<Utc>,
    ) -> RuleEventRecord {
        RuleEventRecord {
            id: Uuid::new_v4(),
            sequence_number: self.last_sequence + 1,
            rule_id: rule_id.to_owned(),
            version,
            event_type: draft.event_type,
            event_data: draft.event_data,
            timestamp: now,
            actor: draft.actor,
            reason: draft.reason,
        }
    }

    /// Infallible: all checks happened while staging.
    fn apply_version(&mut self, record: RuleVersionRecord, now: DateTime<Utc>) {
        let history = self.versions.entry(record.rule_id.clone()).or_default();
        if let Some(previous) = history.last_mut() {
            previous.superseded_by = Some(record.version);
            previous.superseded_at = Some(now);
            previous.effective_to = Some(record.effective_from);
        }
        history.push(record);
    }

    fn apply_event(&mut self, event: RuleEventRecord) {
        self.last_sequence = event.sequence_number;
        self.events.push(event);
    }
}

/// A [`TemporalStore`] held in memory behind a single mutex.
///
/// Every write stages its records first and mutates state only once nothing
/// can fail, so a rejected write leaves no trace.
#[derive(Debug, Default)]
pub struct InMemoryTemporalStore {
    inner: Mutex<Inner>,
}

impl InMemoryTemporalStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Rule ids with at least one version, sorted.
    #[must_use]
    pub fn rule_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.inner.lock().versions.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Total number of events across all rules.
    #[must_use]
    pub fn event_count(&self) -> usize {
        self.inner.lock().events.len()
    }

    /// Total number of version records across all rules.
    #[must_use]
    pub fn version_count(&self) -> usize {
        self.inner.lock().versions.values().map(Vec::len).sum()
    }
}

impl RuleVersionRepository for InMemoryTemporalStore {
    fn create_version(&self, new: NewVersion) -> Result<RuleVersionRecord, StorageError> {
        let now = Utc::now();
        let mut inner = self.inner.lock();
        let record = inner.stage_version(new, now)?;
        inner.apply_version(record.clone(), now);
        Ok(record)
    }

    fn get_version(
        &self,
        rule_id: &str,
        version: u32,
    ) -> Result<Option<RuleVersionRecord>, StorageError> {
        let inner = self.inner.lock();
        let index = (version as usize).checked_sub(1);
        Ok(index.and_then(|i| inner.history(rule_id).get(i)).cloned())
    }

    fn get_latest_version(&self, rule_id: &str) -> Result<Option<RuleVersionRecord>, StorageError> {
        Ok(self.inner.lock().latest(rule_id).cloned())
    }

    fn get_version_history(
        &self,
        rule_id: &str,
        limit: usize,
    ) -> Result<Vec<RuleVersionRecord>, StorageError> {
        let inner = self.inner.lock();
        let history = inner.history(rule_id);
        let start = history.len().saturating_sub(limit);
        Ok(history[start..].to_vec())
    }

    fn get_version_at_timestamp(
        &self,
        rule_id: &str,
        ts: DateTime<Utc>,
    ) -> Result<Option<RuleVersionRecord>, StorageError> {
        let inner = self.inner.lock();
        Ok(inner
            .history(rule_id)
            .iter()
            .rev()
            .find(|r| r.is_effective_at(ts))
            .cloned())
    }
}

impl RuleEventRepository for InMemoryTemporalStore {
    fn append_event(
        &self,
        rule_id: &str,
        version: u32,
        draft: EventDraft,
    ) -> Result<RuleEventRecord, StorageError> {
        let mut inner = self.inner.lock();
        if !inner.has_version(rule_id, version) {
            return Err(StorageError::OrphanEvent {
                rule_id: rule_id.to_owned(),
                version,
            });
        }
        let event = inner.stage_event(rule_id, version, draft, Utc::now());
        inner.apply_event(event.clone());
        Ok(event)
    }

    fn get_events_for_rule(&self, rule_id: &str) -> Result<Vec<RuleEventRecord>, StorageError> {
        Ok(self
            .inner
            .lock()
            .events
            .iter()
            .filter(|e| e.rule_id == rule_id)
            .cloned()
            .collect())
    }

    fn get_events_since(&self, after: u64) -> Result<Vec<RuleEventRecord>, StorageError> {
        let inner = self.inner.lock();
        // Sequence numbers start at 1 and are dense, so they index the log.
        let start = usize::try_from(after).unwrap_or(usize::MAX).min(inner.events.len());
        Ok(inner.events[start..].to_vec())
    }
}

impl TemporalStore for InMemoryTemporalStore {
    fn commit_version(
        &self,
        new: NewVersion,
        event: EventDraft,
    ) -> Result<(RuleVersionRecord, RuleEventRecord), StorageError> {
        let now = Utc::now();
        let mut inner = self.inner.lock();
        let record = inner.stage_version(new, now)?;
        let event = inner.stage_event(&record.rule_id, record.version, event, now);

        inner.apply_version(record.clone(), now);
        inner.apply_event(event.clone());
        debug!(
            rule_id = %record.rule_id,
            version = record.version,
            sequence = event.sequence_number,
            event = %event.event_type,
            "committed rule version"
        );
        Ok((record, event))
    }

    fn commit_deprecation(
        &self,
        rule_id: &str,
        expected: VersionExpectation,
        draft: EventDraft,
    ) -> Result<RuleEventRecord, StorageError> {
        let mut inner = self.inner.lock();
        let latest = inner.latest(rule_id).map(|r| r.version);
        let Some(version) = latest.filter(|_| expected.matches(latest)) else {
            return Err(StorageError::Conflict {
                rule_id: rule_id.to_owned(),
                expected,
                latest,
            });
        };
        if inner.is_deprecated(rule_id) {
            return Err(StorageError::AlreadyDeprecated {
                rule_id: rule_id.to_owned(),
            });
        }

        let event = inner.stage_event(rule_id, version, draft, Utc::now());
        inner.apply_event(event.clone());
        debug!(rule_id, version, sequence = event.sequence_number, "committed deprecation");
        Ok(event)
    }
}
