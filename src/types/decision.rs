use std::fmt;

use serde::{Deserialize, Serialize};

use super::{ContentHash, Due, RuleIR};

/// One visited check: the node id, the condition as text and its outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceStep {
    pub node: usize,
    pub condition: String,
    pub result: bool,
}

/// An obligation triggered by a decision, with its deadline resolved
/// against the evaluation timestamp.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Obligation {
    pub id: String,
    pub description: Option<String>,
    pub due: Option<Due>,
}

/// Outcome of executing one rule against one fact set.
///
/// A failed execution still yields a `DecisionResult`: `decision` is `None`,
/// [`error`](Self::error) is set, and the trace holds the steps taken before
/// the failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[must_use]
pub struct DecisionResult {
    rule_id: String,
    rule_version: u32,
    content_hash: ContentHash,
    applicable: bool,
    decision: Option<String>,
    obligations: Vec<Obligation>,
    trace: Vec<TraceStep>,
    notes: Vec<String>,
    error: Option<String>,
}

impl DecisionResult {
    fn empty(ir: &RuleIR, applicable: bool, notes: Vec<String>) -> Self {
        Self {
            rule_id: ir.rule_id.clone(),
            rule_version: ir.version,
            content_hash: ir.content_hash.clone(),
            applicable,
            decision: None,
            obligations: Vec::new(),
            trace: Vec::new(),
            notes,
            error: None,
        }
    }

    pub(crate) fn not_applicable(ir: &RuleIR, notes: Vec<String>) -> Self {
        Self::empty(ir, false, notes)
    }

    pub(crate) fn decided(
        ir: &RuleIR,
        decision: String,
        obligations: Vec<Obligation>,
        trace: Vec<TraceStep>,
        notes: Vec<String>,
    ) -> Self {
        Self {
            decision: Some(decision),
            obligations,
            trace,
            ..Self::empty(ir, true, notes)
        }
    }

    /// The error message is also appended to `notes`.
    pub(crate) fn failed(
        ir: &RuleIR,
        applicable: bool,
        trace: Vec<TraceStep>,
        mut notes: Vec<String>,
        error: String,
    ) -> Self {
        notes.push(format!("error: {error}"));
        Self {
            trace,
            error: Some(error),
            ..Self::empty(ir, applicable, notes)
        }
    }

    #[must_use]
    pub fn rule_id(&self) -> &str {
        &self.rule_id
    }

    #[must_use]
    pub fn rule_version(&self) -> u32 {
        self.rule_version
    }

    #[must_use]
    pub fn content_hash(&self) -> &ContentHash {
        &self.content_hash
    }

    /// Whether the applicability predicate held.
    #[must_use]
    pub fn applicable(&self) -> bool {
        self.applicable
    }

    /// The outcome label of the leaf reached, if any.
    #[must_use]
    pub fn decision(&self) -> Option<&str> {
        self.decision.as_deref()
    }

    #[must_use]
    pub fn obligations(&self) -> &[Obligation] {
        &self.obligations
    }

    /// Checks visited, in traversal order.
    #[must_use]
    pub fn trace(&self) -> &[TraceStep] {
        &self.trace
    }

    /// Warnings such as conditions on missing facts.
    #[must_use]
    pub fn notes(&self) -> &[String] {
        &self.notes
    }

    #[must_use]
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    #[must_use]
    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

impl fmt::Display for DecisionResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@v{}: ", self.rule_id, self.rule_version)?;
        if let Some(err) = &self.error {
            return write!(f, "error: {err}");
        }
        match &self.decision {
            Some(d) => write!(
                f,
                "{d} (steps: {}, obligations: {})",
                self.trace.len(),
                self.obligations.len()
            ),
            None => write!(f, "not applicable"),
        }
    }
}
