mod deadline;
mod decision;
mod error;
mod facts;
mod hash;
mod ir;
mod operator;
mod rule;
mod value;

pub use deadline::{DeadlineSpec, DeadlineUnit, Due, InvalidDeadline};
pub use decision::{DecisionResult, Obligation, TraceStep};
pub use error::{CompilationError, ExecutionError, IrError};
pub use facts::Facts;
pub use hash::ContentHash;
pub use ir::{
    ApplicabilityMode, CompiledApplicability, CompiledCheck, CompiledPremise, DecisionEntry,
    IrNode, ObligationSpec, RuleIR, premise_key,
};
pub use operator::{Operator, UnknownOperator};
pub use rule::{
    Applicability, Condition, DecisionTree, Node, ObligationInput, Premise, Rule, SourceRef,
    TreeNode,
};
pub use value::Value;
