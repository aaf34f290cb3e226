//! Compile regulatory rules into a flat decision IR, index them by premise,
//! evaluate them against fact sets, and keep an append-only version history.
//!
//! ```
//! use chrono::Utc;
//! use regula::{Applicability, DecisionEngine, DecisionTree, Facts, Node, Premise, Rule};
//!
//! let rule = Rule::new(
//!     "offer_authorization",
//!     Applicability::all([Premise::new("activity", "==", "public_offer")]),
//!     DecisionTree::from_node(Node::check(
//!         "authorized == true",
//!         Node::leaf("authorized"),
//!         Node::leaf("not_authorized"),
//!     )),
//! );
//!
//! let engine = DecisionEngine::default();
//! assert!(engine.load(&[rule]).is_clean());
//!
//! let facts = Facts::new().set("activity", "public_offer").set("authorized", true);
//! let results = engine.decide(&facts, Utc::now());
//! assert_eq!(results[0].decision(), Some("authorized"));
//! ```

mod cache;
mod canonical;
mod compile;
mod config;
mod decoder;
mod engine;
mod error;
mod index;
pub mod parse;
mod runtime;
#[cfg(feature = "binary-cache")]
pub mod serial;
pub mod temporal;
mod types;

pub use cache::{CacheStats, IrCache};
pub use canonical::{canonical_json, content_hash};
pub use compile::RuleCompiler;
pub use config::{ConfigError, EngineConfig, MAX_TREE_DEPTH_LIMIT, MissingFactPolicy};
pub use decoder::{DecodeError, JsonRuleDecoder, RuleDecoder};
pub use engine::{DecisionEngine, LoadReport};
pub use error::RegulaError;
pub use index::{
    OperatorSelectivity, PremiseIndex, PremiseIndexBuilder, PremiseIndexRecord,
    SelectivityEstimator,
};
pub use runtime::RuleRuntime;
pub use types::{
    Applicability, ApplicabilityMode, CompilationError, CompiledApplicability, CompiledCheck,
    CompiledPremise, Condition, ContentHash, DeadlineSpec, DeadlineUnit, DecisionEntry,
    DecisionResult, DecisionTree, Due, ExecutionError, Facts, InvalidDeadline, IrError, IrNode,
    Node, Obligation, ObligationInput, ObligationSpec, Operator, Premise, Rule, RuleIR, SourceRef,
    TraceStep, TreeNode, UnknownOperator, Value, premise_key,
};
