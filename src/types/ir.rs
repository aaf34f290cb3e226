use std::fmt;

use serde::{Deserialize, Serialize};

use super::error::IrError;
use super::{ContentHash, DeadlineSpec, Operator, Value};

/// Normalized `field:operator` signature, e.g. `reserve_ratio:>=`.
#[must_use]
pub fn premise_key(field: &str, operator: Operator) -> String {
    format!("{field}:{}", operator.symbol())
}

/// How applicability premises combine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApplicabilityMode {
    All,
    Any,
}

/// One validated applicability premise.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompiledPremise {
    pub field: String,
    pub operator: Operator,
    pub operand: Value,
}

impl CompiledPremise {
    #[must_use]
    pub fn key(&self) -> String {
        premise_key(&self.field, self.operator)
    }
}

impl fmt::Display for CompiledPremise {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.field, self.operator, self.operand)
    }
}

/// The compiled applicability predicate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompiledApplicability {
    pub mode: ApplicabilityMode,
    pub premises: Vec<CompiledPremise>,
}

impl CompiledApplicability {
    /// `all: []` applies to every fact set.
    #[must_use]
    pub fn is_unconditional(&self) -> bool {
        self.mode == ApplicabilityMode::All && self.premises.is_empty()
    }
}

impl Default for CompiledApplicability {
    fn default() -> Self {
        Self {
            mode: ApplicabilityMode::All,
            premises: Vec::new(),
        }
    }
}

/// A flattened condition node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompiledCheck {
    pub node_id: usize,
    pub field: String,
    pub operator: Operator,
    pub operand: Value,
    pub true_next: usize,
    pub false_next: usize,
}

impl CompiledCheck {
    #[must_use]
    pub fn key(&self) -> String {
        premise_key(&self.field, self.operator)
    }
}

/// Renders the condition only, as it appears in traces.
impl fmt::Display for CompiledCheck {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.field, self.operator, self.operand)
    }
}

/// An obligation attached to a decision leaf. The deadline is a duration
/// token; it becomes a date only when a decision is made.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObligationSpec {
    pub id: String,
    pub description: Option<String>,
    pub deadline: Option<DeadlineSpec>,
}

/// A leaf node: the outcome label and its obligations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecisionEntry {
    pub node_id: usize,
    pub outcome: String,
    pub obligations: Vec<ObligationSpec>,
}

/// A resolved IR node.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum IrNode<'a> {
    Check(&'a CompiledCheck),
    Decision(&'a DecisionEntry),
}

/// Compiled form of one rule.
///
/// Node ids are contiguous from 0 (the root). `checks` and `decisions` are
/// each sorted by `node_id`. The graph reachable from node 0 is acyclic and
/// covers every node. A `RuleIR` is never mutated after compilation; share
/// it behind an `Arc`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleIR {
    pub rule_id: String,
    pub version: u32,
    pub content_hash: ContentHash,
    pub applicability: CompiledApplicability,
    pub checks: Vec<CompiledCheck>,
    pub decisions: Vec<DecisionEntry>,
}

impl RuleIR {
    /// Total number of nodes (checks plus decisions).
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.checks.len() + self.decisions.len()
    }

    /// Resolve a node id to its check or decision.
    #[must_use]
    pub fn node(&self, id: usize) -> Option<IrNode<'_>> {
        if let Ok(i) = self.checks.binary_search_by_key(&id, |c| c.node_id) {
            return Some(IrNode::Check(&self.checks[i]));
        }
        self.decisions
            .binary_search_by_key(&id, |d| d.node_id)
            .ok()
            .map(|i| IrNode::Decision(&self.decisions[i]))
    }

    /// Every premise key this rule tests: applicability first, then tree
    /// checks in node order. May contain duplicates.
    pub fn premise_keys(&self) -> impl Iterator<Item = String> + '_ {
        self.applicability
            .premises
            .iter()
            .map(CompiledPremise::key)
            .chain(self.checks.iter().map(CompiledCheck::key))
    }

    /// Same content under another identity. Used by the cache when two
    /// rule ids or versions share a content hash.
    #[must_use]
    pub fn with_identity(mut self, rule_id: &str, version: u32) -> Self {
        rule_id.clone_into(&mut self.rule_id);
        self.version = version;
        self
    }

    /// Re-check the graph invariants. The compiler only produces valid IR;
    /// this guards IR that was deserialized or built by hand.
    ///
    /// # Errors
    ///
    /// Returns the first [`IrError`] found.
    pub fn validate(&self) -> Result<(), IrError> {
        let n = self.node_count();
        if n == 0 {
            return Err(IrError::Empty);
        }

        if !self.checks.windows(2).all(|w| w[0].node_id < w[1].node_id)
            || !self.decisions.windows(2).all(|w| w[0].node_id < w[1].node_id)
        {
            return Err(IrError::Unsorted);
        }

        let mut seen = vec![false; n];
        let ids = self
            .checks
            .iter()
            .map(|c| c.node_id)
            .chain(self.decisions.iter().map(|d| d.node_id));
        for id in ids {
            let slot = seen.get_mut(id).ok_or(IrError::NodeOutOfRange { node: id, count: n })?;
            if *slot {
                return Err(IrError::DuplicateNode { node: id });
            }
            *slot = true;
        }

        for check in &self.checks {
            for target in [check.true_next, check.false_next] {
                if target >= n {
                    return Err(IrError::DanglingReference {
                        node: check.node_id,
                        target,
                    });
                }
            }
        }

        self.check_acyclic_and_reachable(n)
    }

    fn check_acyclic_and_reachable(&self, n: usize) -> Result<(), IrError> {
        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            Unvisited,
            InStack,
            Done,
        }

        let mut marks = vec![Mark::Unvisited; n];
        // (node, children already pushed)
        let mut stack = vec![(0_usize, false)];

        while let Some((id, expanded)) = stack.pop() {
            if expanded {
                marks[id] = Mark::Done;
                continue;
            }
            match marks[id] {
                Mark::Done => continue,
                Mark::InStack => return Err(IrError::Cycle { node: id }),
                Mark::Unvisited => {}
            }
            marks[id] = Mark::InStack;
            stack.push((id, true));
            if let Some(IrNode::Check(check)) = self.node(id) {
                for next in [check.false_next, check.true_next] {
                    match marks[next] {
                        Mark::InStack => return Err(IrError::Cycle { node: next }),
                        Mark::Unvisited => stack.push((next, false)),
                        Mark::Done => {}
                    }
                }
            }
        }

        match marks.iter().position(|m| *m == Mark::Unvisited) {
            Some(node) => Err(IrError::Unreachable { node }),
            None => Ok(()),
        }
    }

    /// Serialize to the binary IR format.
    ///
    /// # Errors
    ///
    /// Returns [`SerializeError`](crate::serial::SerializeError) if encoding fails.
    #[cfg(feature = "binary-cache")]
    pub fn to_bytes(&self) -> Result<Vec<u8>, crate::serial::SerializeError> {
        crate::serial::serialize(self)
    }

    /// Deserialize from the binary IR format, validating the header,
    /// checksum and graph invariants.
    ///
    /// # Errors
    ///
    /// Returns [`DeserializeError`](crate::serial::DeserializeError) if the
    /// bytes are not a valid, intact IR image.
    #[cfg(feature = "binary-cache")]
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, crate::serial::DeserializeError> {
        crate::serial::deserialize(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn check(node_id: usize, t: usize, f: usize) -> CompiledCheck {
        CompiledCheck {
            node_id,
            field: "x".into(),
            operator: Operator::Eq,
            operand: Value::Bool(true),
            true_next: t,
            false_next: f,
        }
    }

    fn leaf(node_id: usize) -> DecisionEntry {
        DecisionEntry {
            node_id,
            outcome: format!("leaf_{node_id}"),
            obligations: vec![],
        }
    }

    fn ir(checks: Vec<CompiledCheck>, decisions: Vec<DecisionEntry>) -> RuleIR {
        RuleIR {
            rule_id: "r".into(),
            version: 1,
            content_hash: ContentHash::of_bytes(b"r"),
            applicability: CompiledApplicability::default(),
            checks,
            decisions,
        }
    }

    #[test]
    fn valid_ir_passes() {
        let ir = ir(vec![check(0, 1, 2)], vec![leaf(1), leaf(2)]);
        assert_eq!(ir.validate(), Ok(()));
        assert!(matches!(ir.node(0), Some(IrNode::Check(_))));
        assert!(matches!(ir.node(2), Some(IrNode::Decision(d)) if d.outcome == "leaf_2"));
        assert_eq!(ir.node(3), None);
    }

    #[test]
    fn shared_subtree_is_valid() {
        let ir = ir(vec![check(0, 1, 2), check(1, 2, 3)], vec![leaf(2), leaf(3)]);
        assert_eq!(ir.validate(), Ok(()));
    }

    #[test]
    fn empty_ir_rejected() {
        assert_eq!(ir(vec![], vec![]).validate(), Err(IrError::Empty));
    }

    #[test]
    fn dangling_reference_rejected() {
        let ir = ir(vec![check(0, 1, 5)], vec![leaf(1)]);
        assert_eq!(
            ir.validate(),
            Err(IrError::DanglingReference { node: 0, target: 5 })
        );
    }

    #[test]
    fn duplicate_node_rejected() {
        let ir = ir(vec![check(0, 1, 1)], vec![leaf(0)]);
        assert_eq!(ir.validate(), Err(IrError::DuplicateNode { node: 0 }));
    }

    #[test]
    fn out_of_range_node_rejected() {
        let ir = ir(vec![check(0, 1, 1)], vec![leaf(7)]);
        assert_eq!(
            ir.validate(),
            Err(IrError::NodeOutOfRange { node: 7, count: 2 })
        );
    }

    #[test]
    fn cycle_rejected() {
        let ir = ir(vec![check(0, 1, 2), check(1, 0, 2)], vec![leaf(2)]);
        assert!(matches!(ir.validate(), Err(IrError::Cycle { .. })));
    }

    #[test]
    fn unreachable_node_rejected() {
        let ir = ir(vec![check(0, 1, 1)], vec![leaf(1), leaf(2)]);
        assert_eq!(ir.validate(), Err(IrError::Unreachable { node: 2 }));
    }

    #[test]
    fn premise_keys_list_applicability_first() {
        let mut ir = ir(vec![check(0, 1, 2)], vec![leaf(1), leaf(2)]);
        ir.applicability.premises.push(CompiledPremise {
            field: "activity".into(),
            operator: Operator::Eq,
            operand: Value::from("public_offer"),
        });
        let keys: Vec<String> = ir.premise_keys().collect();
        assert_eq!(keys, vec!["activity:==", "x:=="]);
    }

    #[test]
    fn with_identity_keeps_content() {
        let original = ir(vec![check(0, 1, 2)], vec![leaf(1), leaf(2)]);
        let renamed = original.clone().with_identity("other", 4);
        assert_eq!(renamed.rule_id, "other");
        assert_eq!(renamed.version, 4);
        assert_eq!(renamed.checks, original.checks);
        assert_eq!(renamed.content_hash, original.content_hash);
    }

    #[test]
    fn check_display() {
        let mut c = check(0, 1, 2);
        c.field = "reserve_ratio".into();
        c.operator = Operator::Gte;
        c.operand = Value::Float(1.0);
        assert_eq!(c.to_string(), "reserve_ratio >= 1.0");
    }
}
