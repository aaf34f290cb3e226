use std::sync::Arc;

use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::json;
use tracing::{debug, info, instrument};

use super::error::{StorageError, VersioningError};
use super::records::{
    EventDraft, NewVersion, RuleEventRecord, RuleEventType, RuleVersionRecord, VersionExpectation,
};
use super::repository::TemporalStore;
use crate::decoder::RuleDecoder;
use crate::engine::DecisionEngine;
use crate::types::{ContentHash, DecisionResult, Facts};

/// A create or update request.
#[derive(Debug, Clone)]
pub struct RuleChange {
    rule_id: String,
    content: String,
    actor: Option<String>,
    reason: Option<String>,
    effective_from: Option<DateTime<Utc>>,
    jurisdiction_code: Option<String>,
    regime_id: Option<String>,
}

impl RuleChange {
    #[must_use]
    pub fn new(rule_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            rule_id: rule_id.into(),
            content: content.into(),
            actor: None,
            reason: None,
            effective_from: None,
            jurisdiction_code: None,
            regime_id: None,
        }
    }

    #[must_use]
    pub fn actor(mut self, actor: impl Into<String>) -> Self {
        self.actor = Some(actor.into());
        self
    }

    #[must_use]
    pub fn reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    /// Defaults to now for a create, and to the later of now and the
    /// latest version's start for an update.
    #[must_use]
    pub fn effective_from(mut self, at: DateTime<Utc>) -> Self {
        self.effective_from = Some(at);
        self
    }

    #[must_use]
    pub fn jurisdiction(mut self, code: impl Into<String>) -> Self {
        self.jurisdiction_code = Some(code.into());
        self
    }

    #[must_use]
    pub fn regime(mut self, regime_id: impl Into<String>) -> Self {
        self.regime_id = Some(regime_id.into());
        self
    }

    #[must_use]
    pub fn rule_id(&self) -> &str {
        &self.rule_id
    }

    #[must_use]
    pub fn content(&self) -> &str {
        &self.content
    }
}

/// One version together with the events recorded against it.
#[derive(Debug, Clone, PartialEq)]
pub struct VersionHistoryEntry {
    pub record: RuleVersionRecord,
    pub events: Vec<RuleEventRecord>,
}

/// Two versions side by side. Computing a textual diff is left to the
/// caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionComparison {
    pub rule_id: String,
    pub version_a: u32,
    pub version_b: u32,
    pub content_a: String,
    pub content_b: String,
    pub hash_a: ContentHash,
    pub hash_b: ContentHash,
    pub same_content: bool,
}

/// Version lifecycle on top of a [`TemporalStore`].
///
/// Per rule id: nothing, then version 1 (`RuleCreated`), then further
/// versions (`RuleUpdated`), with `RuleDeprecated` recorded against the
/// latest version without creating a new one.
#[derive(Debug)]
pub struct VersionedRuleService<S> {
    store: Arc<S>,
}

impl<S> Clone for VersionedRuleService<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
        }
    }
}

fn rfc3339(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Secs, true)
}

impl<S: TemporalStore> VersionedRuleService<S> {
    #[must_use]
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    #[must_use]
    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Record version 1 of a new rule.
    ///
    /// # Errors
    ///
    /// [`VersioningError::AlreadyExists`] if the rule has any version, or
    /// a [`StorageError`] from the store.
    #[instrument(skip_all, fields(rule_id = %change.rule_id))]
    pub fn create_rule(&self, change: RuleChange) -> Result<RuleVersionRecord, VersioningError> {
        if let Some(latest) = self.store.get_latest_version(&change.rule_id)? {
            return Err(VersioningError::AlreadyExists {
                rule_id: change.rule_id,
                version: latest.version,
            });
        }

        let effective_from = change.effective_from.unwrap_or_else(Utc::now);
        let content_hash = ContentHash::of_text(&change.content);
        let event = EventDraft {
            event_type: RuleEventType::Created,
            event_data: json!({
                "content_hash": content_hash.as_str(),
                "effective_from": rfc3339(effective_from),
                "jurisdiction_code": change.jurisdiction_code,
                "regime_id": change.regime_id,
            }),
            actor: change.actor.clone(),
            reason: change.reason,
        };
        let new = NewVersion {
            rule_id: change.rule_id,
            content_hash,
            content_yaml: change.content,
            effective_from,
            created_by: change.actor,
            jurisdiction_code: change.jurisdiction_code,
            regime_id: change.regime_id,
            expected: VersionExpectation::NoVersion,
        };

        let (record, _) = self.store.commit_version(new, event).map_err(|e| match e {
            // Lost a race with another creator.
            StorageError::Conflict {
                rule_id,
                latest: Some(version),
                ..
            } => VersioningError::AlreadyExists { rule_id, version },
            other => VersioningError::Storage(other),
        })?;
        info!(version = record.version, hash = record.content_hash.short(), "rule created");
        Ok(record)
    }

    /// Record the next version of an existing rule.
    ///
    /// Content whose hash matches the latest version is not a change: the
    /// latest record is returned and nothing is written.
    ///
    /// # Errors
    ///
    /// [`VersioningError::NotFound`] if the rule has no version,
    /// [`VersioningError::EffectiveDateRegression`] if an explicit
    /// `effective_from` precedes the latest version's, or a
    /// [`StorageError`] (including a conflict with a concurrent writer).
    #[instrument(skip_all, fields(rule_id = %change.rule_id))]
    pub fn update_rule(&self, change: RuleChange) -> Result<RuleVersionRecord, VersioningError> {
        let Some(latest) = self.store.get_latest_version(&change.rule_id)? else {
            return Err(VersioningError::NotFound {
                rule_id: change.rule_id,
            });
        };

        let content_hash = ContentHash::of_text(&change.content);
        if content_hash == latest.content_hash {
            debug!(version = latest.version, "content unchanged, no new version");
            return Ok(latest);
        }

        let effective_from = match change.effective_from {
            Some(requested) if requested < latest.effective_from => {
                return Err(VersioningError::EffectiveDateRegression {
                    rule_id: change.rule_id,
                    latest: latest.effective_from,
                    requested,
                });
            }
            Some(requested) => requested,
            None => Utc::now().max(latest.effective_from),
        };

        let event = EventDraft {
            event_type: RuleEventType::Updated,
            event_data: json!({
                "previous_version": latest.version,
                "previous_hash": latest.content_hash.as_str(),
                "new_hash": content_hash.as_str(),
                "effective_from": rfc3339(effective_from),
            }),
            actor: change.actor.clone(),
            reason: change.reason,
        };
        let new = NewVersion {
            rule_id: change.rule_id,
            content_hash,
            content_yaml: change.content,
            effective_from,
            created_by: change.actor,
            jurisdiction_code: change.jurisdiction_code.or(latest.jurisdiction_code),
            regime_id: change.regime_id.or(latest.regime_id),
            expected: VersionExpectation::Latest(latest.version),
        };

        let (record, _) = self.store.commit_version(new, event)?;
        info!(
            version = record.version,
            previous = latest.version,
            hash = record.content_hash.short(),
            "rule updated"
        );
        Ok(record)
    }

    /// Flag the rule as deprecated at its latest version.
    ///
    /// # Errors
    ///
    /// [`VersioningError::NotFound`] if the rule has no version,
    /// [`VersioningError::AlreadyDeprecated`] if the last recorded event
    /// is already a deprecation, or a [`StorageError`].
    #[instrument(skip_all, fields(rule_id = %rule_id))]
    pub fn deprecate_rule(
        &self,
        rule_id: &str,
        actor: Option<&str>,
        reason: Option<&str>,
    ) -> Result<RuleEventRecord, VersioningError> {
        let Some(latest) = self.store.get_latest_version(rule_id)? else {
            return Err(VersioningError::NotFound {
                rule_id: rule_id.to_owned(),
            });
        };

        let draft = EventDraft {
            event_type: RuleEventType::Deprecated,
            event_data: json!({
                "final_version": latest.version,
                "final_hash": latest.content_hash.as_str(),
            }),
            actor: actor.map(str::to_owned),
            reason: reason.map(str::to_owned),
        };
        let event = self
            .store
            .commit_deprecation(rule_id, VersionExpectation::Latest(latest.version), draft)
            .map_err(|e| match e {
                StorageError::AlreadyDeprecated { rule_id } => {
                    VersioningError::AlreadyDeprecated { rule_id }
                }
                other => VersioningError::Storage(other),
            })?;
        info!(version = latest.version, "rule deprecated");
        Ok(event)
    }

    /// # Errors
    ///
    /// Storage failures only.
    pub fn get_rule_at_version(
        &self,
        rule_id: &str,
        version: u32,
    ) -> Result<Option<RuleVersionRecord>, VersioningError> {
        Ok(self.store.get_version(rule_id, version)?)
    }

    /// # Errors
    ///
    /// Storage failures only.
    pub fn get_latest(&self, rule_id: &str) -> Result<Option<RuleVersionRecord>, VersioningError> {
        Ok(self.store.get_latest_version(rule_id)?)
    }

    /// The version in effect at `ts`.
    ///
    /// # Errors
    ///
    /// Storage failures only.
    pub fn get_rule_at_timestamp(
        &self,
        rule_id: &str,
        ts: DateTime<Utc>,
    ) -> Result<Option<RuleVersionRecord>, VersioningError> {
        Ok(self.store.get_version_at_timestamp(rule_id, ts)?)
    }

    /// The most recent `limit` versions, oldest first, each with its events.
    ///
    /// # Errors
    ///
    /// Storage failures only.
    pub fn get_rule_history(
        &self,
        rule_id: &str,
        limit: usize,
    ) -> Result<Vec<VersionHistoryEntry>, VersioningError> {
        let versions = self.store.get_version_history(rule_id, limit)?;
        let mut events = self.store.get_events_for_rule(rule_id)?;

        Ok(versions
            .into_iter()
            .map(|record| {
                let (mine, rest): (Vec<_>, Vec<_>) = std::mem::take(&mut events)
                    .into_iter()
                    .partition(|e| e.version == record.version);
                events = rest;
                VersionHistoryEntry {
                    record,
                    events: mine,
                }
            })
            .collect())
    }

    /// # Errors
    ///
    /// [`VersioningError::VersionNotFound`] if either version is missing.
    pub fn compare_versions(
        &self,
        rule_id: &str,
        version_a: u32,
        version_b: u32,
    ) -> Result<VersionComparison, VersioningError> {
        let a = self.require_version(rule_id, version_a)?;
        let b = self.require_version(rule_id, version_b)?;
        Ok(VersionComparison {
            rule_id: rule_id.to_owned(),
            version_a,
            version_b,
            same_content: a.content_hash == b.content_hash,
            content_a: a.content_yaml,
            content_b: b.content_yaml,
            hash_a: a.content_hash,
            hash_b: b.content_hash,
        })
    }

    /// True when the most recent event for the rule is a deprecation. An
    /// update after deprecation re-activates the rule.
    ///
    /// # Errors
    ///
    /// Storage failures only.
    pub fn is_deprecated(&self, rule_id: &str) -> Result<bool, VersioningError> {
        let events = self.store.get_events_for_rule(rule_id)?;
        Ok(events
            .last()
            .is_some_and(|e| e.event_type == RuleEventType::Deprecated))
    }

    /// Evaluate a stored version (the latest when `version` is `None`)
    /// against `facts`.
    ///
    /// The stored text is decoded with `decoder`, stamped with the stored
    /// rule id and version, compiled through the engine's IR cache and
    /// executed by the engine's runtime. The engine's loaded rule set is
    /// not touched.
    ///
    /// # Errors
    ///
    /// [`VersioningError::NotFound`] / [`VersioningError::VersionNotFound`]
    /// for a missing rule or version, [`VersioningError::Decode`] and
    /// [`VersioningError::Compile`] for stored content that does not decode
    /// or compile.
    #[instrument(skip_all, fields(rule_id = %rule_id, version = ?version))]
    pub fn evaluate_with_version(
        &self,
        rule_id: &str,
        version: Option<u32>,
        facts: &Facts,
        evaluated_at: DateTime<Utc>,
        decoder: &dyn RuleDecoder,
        engine: &DecisionEngine,
    ) -> Result<DecisionResult, VersioningError> {
        let record = match version {
            Some(v) => self.require_version(rule_id, v)?,
            None => self
                .store
                .get_latest_version(rule_id)?
                .ok_or_else(|| VersioningError::NotFound {
                    rule_id: rule_id.to_owned(),
                })?,
        };

        let mut rule = decoder.decode(&record.content_yaml)?;
        rule.rule_id.clone_from(&record.rule_id);
        rule.version = record.version;

        let ir = engine.cache().get_or_compile(&rule, engine.compiler())?;
        Ok(engine.runtime().execute_rule(&ir, facts, evaluated_at))
    }

    fn require_version(
        &self,
        rule_id: &str,
        version: u32,
    ) -> Result<RuleVersionRecord, VersioningError> {
        self.store
            .get_version(rule_id, version)?
            .ok_or_else(|| VersioningError::VersionNotFound {
                rule_id: rule_id.to_owned(),
                version,
            })
    }
}
