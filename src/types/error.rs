use thiserror::Error;

/// Why a single rule failed to compile. Fatal to that rule only.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CompilationError {
    #[error("cycle in decision tree of rule '{rule_id}': {}", node_path.join(" -> "))]
    Cycle {
        rule_id: String,
        node_path: Vec<String>,
    },

    #[error("malformed condition at {} in rule '{rule_id}': {message}", node_path.join(" -> "))]
    MalformedCondition {
        rule_id: String,
        node_path: Vec<String>,
        message: String,
    },

    #[error("unknown operator '{operator}' at {} in rule '{rule_id}'", node_path.join(" -> "))]
    UnknownOperator {
        rule_id: String,
        node_path: Vec<String>,
        operator: String,
    },

    #[error("invalid operand at {} in rule '{rule_id}': {message}", node_path.join(" -> "))]
    InvalidOperand {
        rule_id: String,
        node_path: Vec<String>,
        message: String,
    },

    #[error("check node at {} in rule '{rule_id}' is missing its {branch} branch", node_path.join(" -> "))]
    MissingBranch {
        rule_id: String,
        node_path: Vec<String>,
        branch: &'static str,
    },

    #[error("malformed node at {} in rule '{rule_id}': {reason}", node_path.join(" -> "))]
    MalformedNode {
        rule_id: String,
        node_path: Vec<String>,
        reason: String,
    },

    #[error("node at {} in rule '{rule_id}' references missing node index {target}", node_path.join(" -> "))]
    DanglingReference {
        rule_id: String,
        node_path: Vec<String>,
        target: usize,
    },

    #[error("decision tree of rule '{rule_id}' exceeds maximum depth {limit} at {}", node_path.join(" -> "))]
    DepthExceeded {
        rule_id: String,
        node_path: Vec<String>,
        limit: usize,
    },

    #[error("invalid deadline '{deadline}' at {} in rule '{rule_id}'", node_path.join(" -> "))]
    InvalidDeadline {
        rule_id: String,
        node_path: Vec<String>,
        deadline: String,
    },

    #[error("rule '{rule_id}' has an empty decision tree")]
    EmptyTree { rule_id: String },

    #[error("duplicate rule id '{rule_id}'")]
    DuplicateRule { rule_id: String },
}

impl CompilationError {
    #[must_use]
    pub fn rule_id(&self) -> &str {
        match self {
            CompilationError::Cycle { rule_id, .. }
            | CompilationError::MalformedCondition { rule_id, .. }
            | CompilationError::UnknownOperator { rule_id, .. }
            | CompilationError::InvalidOperand { rule_id, .. }
            | CompilationError::MissingBranch { rule_id, .. }
            | CompilationError::MalformedNode { rule_id, .. }
            | CompilationError::DanglingReference { rule_id, .. }
            | CompilationError::DepthExceeded { rule_id, .. }
            | CompilationError::InvalidDeadline { rule_id, .. }
            | CompilationError::EmptyTree { rule_id }
            | CompilationError::DuplicateRule { rule_id } => rule_id,
        }
    }

    /// Node ids from the root to the offending node. Empty for errors that
    /// are not tied to a node.
    #[must_use]
    pub fn node_path(&self) -> &[String] {
        match self {
            CompilationError::Cycle { node_path, .. }
            | CompilationError::MalformedCondition { node_path, .. }
            | CompilationError::UnknownOperator { node_path, .. }
            | CompilationError::InvalidOperand { node_path, .. }
            | CompilationError::MissingBranch { node_path, .. }
            | CompilationError::MalformedNode { node_path, .. }
            | CompilationError::DanglingReference { node_path, .. }
            | CompilationError::DepthExceeded { node_path, .. }
            | CompilationError::InvalidDeadline { node_path, .. } => node_path,
            CompilationError::EmptyTree { .. } | CompilationError::DuplicateRule { .. } => &[],
        }
    }
}

/// A failure while executing one compiled rule against a fact set.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExecutionError {
    #[error("type mismatch on '{field}': cannot apply '{operator}' to {fact_type} and {operand_type}")]
    TypeMismatch {
        field: String,
        operator: String,
        fact_type: &'static str,
        operand_type: &'static str,
    },

    #[error("missing fact '{field}'")]
    MissingFact { field: String },

    #[error("node {node} does not exist")]
    DanglingNode { node: usize },

    #[error("execution exceeded {limit} steps")]
    StepLimitExceeded { limit: usize },
}

/// A violated structural invariant of a [`RuleIR`](super::RuleIR).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IrError {
    #[error("IR has no nodes")]
    Empty,

    #[error("IR nodes are not sorted by id")]
    Unsorted,

    #[error("node id {node} appears more than once")]
    DuplicateNode { node: usize },

    #[error("node id {node} is out of range for {count} nodes")]
    NodeOutOfRange { node: usize, count: usize },

    #[error("node {node} references missing node {target}")]
    DanglingReference { node: usize, target: usize },

    #[error("cycle through node {node}")]
    Cycle { node: usize },

    #[error("node {node} is unreachable from the root")]
    Unreachable { node: usize },
}
