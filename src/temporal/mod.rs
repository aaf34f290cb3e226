//! Append-only rule versioning: immutable version snapshots, an event log
//! and the service that keeps the two paired.

mod error;
mod memory;
mod records;
mod repository;
mod service;

pub use error::{StorageError, VersioningError};
pub use memory::InMemoryTemporalStore;
pub use records::{
    EventDraft, NewVersion, RuleEventRecord, RuleEventType, RuleVersionRecord, VersionExpectation,
};
pub use repository::{RuleEventRepository, RuleVersionRepository, TemporalStore};
pub use service::{RuleChange, VersionComparison, VersionHistoryEntry, VersionedRuleService};
