use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use super::Value;

/// A parsed rule, as produced by a loader (YAML, JSON or hand-built).
///
/// The compiler only reads it. Everything under `applies_if` and
/// `decision_tree` is rule *content* and feeds the content hash; the
/// remaining fields are identity and metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rule {
    pub rule_id: String,
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub effective_from: Option<NaiveDate>,
    #[serde(default)]
    pub applies_if: Applicability,
    pub decision_tree: DecisionTree,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<SourceRef>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
}

fn default_version() -> u32 {
    1
}

impl Rule {
    #[must_use]
    pub fn new(rule_id: impl Into<String>, applies_if: Applicability, tree: DecisionTree) -> Self {
        Self {
            rule_id: rule_id.into(),
            version: 1,
            description: None,
            effective_from: None,
            applies_if,
            decision_tree: tree,
            source: None,
            tags: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_version(mut self, version: u32) -> Self {
        self.version = version;
        self
    }

    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    #[must_use]
    pub fn with_source(mut self, source: SourceRef) -> Self {
        self.source = Some(source);
        self
    }
}

/// Where a rule comes from in the regulatory text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceRef {
    pub document_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub article: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text_excerpt: Option<String>,
}

/// The applicability predicate: `{all: [...]}` or `{any: [...]}`.
///
/// `All([])` (the default) always applies; `Any([])` never does.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Applicability {
    All(Vec<Premise>),
    Any(Vec<Premise>),
}

impl Default for Applicability {
    fn default() -> Self {
        Applicability::All(Vec::new())
    }
}

impl Applicability {
    #[must_use]
    pub fn all(premises: impl IntoIterator<Item = Premise>) -> Self {
        Applicability::All(premises.into_iter().collect())
    }

    #[must_use]
    pub fn any(premises: impl IntoIterator<Item = Premise>) -> Self {
        Applicability::Any(premises.into_iter().collect())
    }

    #[must_use]
    pub fn premises(&self) -> &[Premise] {
        match self {
            Applicability::All(p) | Applicability::Any(p) => p,
        }
    }
}

/// One structured applicability condition. The operator stays a string
/// here; the compiler validates it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Premise {
    pub field: String,
    pub operator: String,
    pub value: Value,
}

impl Premise {
    #[must_use]
    pub fn new(
        field: impl Into<String>,
        operator: impl Into<String>,
        value: impl Into<Value>,
    ) -> Self {
        Self {
            field: field.into(),
            operator: operator.into(),
            value: value.into(),
        }
    }
}

/// A tree condition: either expression text (`reserve_ratio >= 1.0`) or
/// the structured form used by premises.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Condition {
    Expression(String),
    Structured {
        field: String,
        operator: String,
        value: Value,
    },
}

impl From<&str> for Condition {
    fn from(s: &str) -> Self {
        Condition::Expression(s.to_owned())
    }
}

impl From<String> for Condition {
    fn from(s: String) -> Self {
        Condition::Expression(s)
    }
}

impl From<Premise> for Condition {
    fn from(p: Premise) -> Self {
        Condition::Structured {
            field: p.field,
            operator: p.operator,
            value: p.value,
        }
    }
}

/// An obligation as authored, with its deadline still in text form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObligationInput {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deadline: Option<String>,
}

impl ObligationInput {
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            description: None,
            deadline: None,
        }
    }

    #[must_use]
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    #[must_use]
    pub fn deadline(mut self, deadline: impl Into<String>) -> Self {
        self.deadline = Some(deadline.into());
        self
    }
}

/// One node of the decision tree arena.
///
/// A check node has a `condition` and both branch indices; a leaf has a
/// `decision`. Fields are optional because loaders hand over whatever the
/// author wrote; the compiler rejects malformed nodes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TreeNode {
    pub node_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<Condition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub true_branch: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub false_branch: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decision: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub obligations: Vec<ObligationInput>,
}

impl TreeNode {
    /// A check node branching to arena indices `true_branch` / `false_branch`.
    #[must_use]
    pub fn check(
        node_id: impl Into<String>,
        condition: impl Into<Condition>,
        true_branch: usize,
        false_branch: usize,
    ) -> Self {
        Self {
            node_id: node_id.into(),
            condition: Some(condition.into()),
            description: None,
            true_branch: Some(true_branch),
            false_branch: Some(false_branch),
            decision: None,
            obligations: Vec::new(),
        }
    }

    /// A leaf node producing `decision`.
    #[must_use]
    pub fn leaf(node_id: impl Into<String>, decision: impl Into<String>) -> Self {
        Self {
            node_id: node_id.into(),
            condition: None,
            description: None,
            true_branch: None,
            false_branch: None,
            decision: Some(decision.into()),
            obligations: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_obligation(mut self, obligation: ObligationInput) -> Self {
        self.obligations.push(obligation);
        self
    }
}

/// The decision tree as a flat arena. Index 0 is the root; branches refer
/// to other nodes by index.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DecisionTree {
    pub nodes: Vec<TreeNode>,
}

impl DecisionTree {
    #[must_use]
    pub fn new(nodes: Vec<TreeNode>) -> Self {
        Self { nodes }
    }

    /// Flatten an owned [`Node`] tree into an arena, pre-order, naming
    /// nodes `root`, `root_t`, `root_f`, `root_t_t`, ...
    #[must_use]
    pub fn from_node(root: Node) -> Self {
        let mut nodes = Vec::new();
        flatten(root, "root".to_owned(), &mut nodes);
        Self { nodes }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

fn flatten(node: Node, name: String, nodes: &mut Vec<TreeNode>) -> usize {
    let index = nodes.len();
    match node {
        Node::Leaf {
            decision,
            obligations,
        } => {
            let mut leaf = TreeNode::leaf(name, decision);
            leaf.obligations = obligations;
            nodes.push(leaf);
        }
        Node::Check {
            condition,
            if_true,
            if_false,
        } => {
            // Reserve the slot so the parent keeps its pre-order index.
            nodes.push(TreeNode::check(name.clone(), condition, 0, 0));
            let t = flatten(*if_true, format!("{name}_t"), nodes);
            let f = flatten(*if_false, format!("{name}_f"), nodes);
            nodes[index].true_branch = Some(t);
            nodes[index].false_branch = Some(f);
        }
    }
    index
}

/// Owned, nested form of a decision tree for building rules in code.
#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Check {
        condition: Condition,
        if_true: Box<Node>,
        if_false: Box<Node>,
    },
    Leaf {
        decision: String,
        obligations: Vec<ObligationInput>,
    },
}

impl Node {
    #[must_use]
    pub fn check(condition: impl Into<Condition>, if_true: Node, if_false: Node) -> Self {
        Node::Check {
            condition: condition.into(),
            if_true: Box::new(if_true),
            if_false: Box::new(if_false),
        }
    }

    #[must_use]
    pub fn leaf(decision: impl Into<String>) -> Self {
        Node::Leaf {
            decision: decision.into(),
            obligations: Vec::new(),
        }
    }

    /// Attach an obligation. No effect on check nodes.
    #[must_use]
    pub fn obligation(mut self, obligation: ObligationInput) -> Self {
        if let Node::Leaf { obligations, .. } = &mut self {
            obligations.push(obligation);
        }
        self
    }
}
