use std::borrow::Borrow;
use std::thread;

use chrono::{DateTime, Utc};
use tracing::{debug, instrument};

use crate::config::{EngineConfig, MissingFactPolicy};
use crate::types::{
    ApplicabilityMode, DecisionResult, ExecutionError, Facts, IrNode, Obligation, ObligationSpec,
    Operator, RuleIR, TraceStep, Value,
};

/// Executes compiled rules against fact sets.
///
/// Execution is deterministic: the same IR, facts and timestamp always give
/// the same [`DecisionResult`], trace included.
#[derive(Debug, Clone)]
pub struct RuleRuntime {
    missing_fact: MissingFactPolicy,
    max_steps: usize,
    workers: usize,
    parallel_threshold: usize,
}

impl Default for RuleRuntime {
    fn default() -> Self {
        Self::new(&EngineConfig::default())
    }
}

/// Output of a tree walk that reached a leaf.
struct Reached {
    decision: String,
    obligations: Vec<Obligation>,
}

impl RuleRuntime {
    #[must_use]
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            missing_fact: config.missing_fact,
            max_steps: config.max_steps,
            workers: config.worker_count(),
            parallel_threshold: config.parallel_threshold,
        }
    }

    #[must_use]
    pub fn missing_fact_policy(&self) -> MissingFactPolicy {
        self.missing_fact
    }

    /// Execute one rule. Never fails: an execution error becomes a
    /// [`DecisionResult`] with no decision, the error recorded and the trace
    /// up to the failing step.
    pub fn execute_rule(
        &self,
        ir: &RuleIR,
        facts: &Facts,
        evaluated_at: DateTime<Utc>,
    ) -> DecisionResult {
        let mut notes = Vec::new();
        let applicable = match self.applies(ir, facts, &mut notes) {
            Ok(applicable) => applicable,
            Err(e) => {
                debug!(rule_id = %ir.rule_id, error = %e, "applicability check failed");
                return DecisionResult::failed(ir, false, Vec::new(), notes, e.to_string());
            }
        };
        if !applicable {
            return DecisionResult::not_applicable(ir, notes);
        }

        let mut trace = Vec::new();
        match self.walk(ir, facts, evaluated_at, &mut trace, &mut notes) {
            Ok(reached) => {
                DecisionResult::decided(ir, reached.decision, reached.obligations, trace, notes)
            }
            Err(e) => {
                debug!(
                    rule_id = %ir.rule_id,
                    error = %e,
                    steps = trace.len(),
                    "rule execution failed"
                );
                DecisionResult::failed(ir, true, trace, notes, e.to_string())
            }
        }
    }

    /// Like [`execute_rule`](Self::execute_rule) but returns the error
    /// instead of folding it into the result.
    ///
    /// # Errors
    ///
    /// Returns [`ExecutionError`] on a type mismatch, a missing fact under
    /// [`MissingFactPolicy::Error`], a dangling node or the step limit.
    pub fn try_execute_rule(
        &self,
        ir: &RuleIR,
        facts: &Facts,
        evaluated_at: DateTime<Utc>,
    ) -> Result<DecisionResult, ExecutionError> {
        let mut notes = Vec::new();
        if !self.applies(ir, facts, &mut notes)? {
            return Ok(DecisionResult::not_applicable(ir, notes));
        }
        let mut trace = Vec::new();
        let reached = self.walk(ir, facts, evaluated_at, &mut trace, &mut notes)?;
        Ok(DecisionResult::decided(
            ir,
            reached.decision,
            reached.obligations,
            trace,
            notes,
        ))
    }

    /// Execute every rule independently. Results come back in input order;
    /// one rule failing never affects the others.
    ///
    /// Batches of at least `parallel_threshold` rules are split across
    /// scoped worker threads.
    #[instrument(skip_all, fields(rules = irs.len()))]
    pub fn execute<R>(
        &self,
        irs: &[R],
        facts: &Facts,
        evaluated_at: DateTime<Utc>,
    ) -> Vec<DecisionResult>
    where
        R: Borrow<RuleIR> + Sync,
    {
        let workers = self.workers.min(irs.len());
        if irs.len() < self.parallel_threshold || workers <= 1 {
            return irs
                .iter()
                .map(|ir| self.execute_rule(ir.borrow(), facts, evaluated_at))
                .collect();
        }

        let chunk = irs.len().div_ceil(workers);
        debug!(workers, chunk, "executing in parallel");
        thread::scope(|s| {
            let handles: Vec<_> = irs
                .chunks(chunk)
                .map(|part| {
                    s.spawn(move || {
                        part.iter()
                            .map(|ir| self.execute_rule(ir.borrow(), facts, evaluated_at))
                            .collect::<Vec<_>>()
                    })
                })
                .collect();
            handles
                .into_iter()
                .flat_map(|h| h.join().unwrap_or_else(|panic| std::panic::resume_unwind(panic)))
                .collect()
        })
    }

    fn applies(
        &self,
        ir: &RuleIR,
        facts: &Facts,
        notes: &mut Vec<String>,
    ) -> Result<bool, ExecutionError> {
        let premises = &ir.applicability.premises;
        match ir.applicability.mode {
            ApplicabilityMode::All => {
                for p in premises {
                    if !self.holds(&p.field, p.operator, &p.operand, facts, notes)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            ApplicabilityMode::Any => {
                for p in premises {
                    if self.holds(&p.field, p.operator, &p.operand, facts, notes)? {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
        }
    }

    fn walk(
        &self,
        ir: &RuleIR,
        facts: &Facts,
        evaluated_at: DateTime<Utc>,
        trace: &mut Vec<TraceStep>,
        notes: &mut Vec<String>,
    ) -> Result<Reached, ExecutionError> {
        let mut node = 0;
        loop {
            match ir.node(node) {
                Some(IrNode::Check(check)) => {
                    if trace.len() >= self.max_steps {
                        return Err(ExecutionError::StepLimitExceeded {
                            limit: self.max_steps,
                        });
                    }
                    let result =
                        self.holds(&check.field, check.operator, &check.operand, facts, notes)?;
                    trace.push(TraceStep {
                        node,
                        condition: check.to_string(),
                        result,
                    });
                    node = if result { check.true_next } else { check.false_next };
                }
                Some(IrNode::Decision(entry)) => {
                    return Ok(Reached {
                        decision: entry.outcome.clone(),
                        obligations: entry
                            .obligations
                            .iter()
                            .map(|o| materialize(o, evaluated_at, notes))
                            .collect(),
                    });
                }
                None => return Err(ExecutionError::DanglingNode { node }),
            }
        }
    }

    fn holds(
        &self,
        field: &str,
        operator: Operator,
        operand: &Value,
        facts: &Facts,
        notes: &mut Vec<String>,
    ) -> Result<bool, ExecutionError> {
        let Some(fact) = facts.get(field) else {
            return match self.missing_fact {
                MissingFactPolicy::TreatAsFalse => {
                    notes.push(format!(
                        "missing fact '{field}': '{field} {operator} {operand}' treated as false"
                    ));
                    Ok(false)
                }
                MissingFactPolicy::Error => Err(ExecutionError::MissingFact {
                    field: field.to_owned(),
                }),
            };
        };
        fact.apply(operator, operand)
            .ok_or_else(|| ExecutionError::TypeMismatch {
                field: field.to_owned(),
                operator: operator.symbol().to_owned(),
                fact_type: fact.type_name(),
                operand_type: operand.type_name(),
            })
    }
}

fn materialize(
    spec: &ObligationSpec,
    evaluated_at: DateTime<Utc>,
    notes: &mut Vec<String>,
) -> Obligation {
    let due = spec.deadline.and_then(|deadline| {
        let due = deadline.materialize(evaluated_at);
        if due.is_none() {
            notes.push(format!(
                "deadline '{deadline}' of obligation '{}' is out of range",
                spec.id
            ));
        }
        due
    });
    Obligation {
        id: spec.id.clone(),
        description: spec.description.clone(),
        due,
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;
    use crate::compile::RuleCompiler;
    use crate::types::{
        Applicability, CompiledApplicability, CompiledCheck, ContentHash, DecisionTree, Due, Node,
        ObligationInput, Premise, Rule,
    };

    fn at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 30, 0, 0, 0).unwrap()
    }

    fn ratio_rule() -> RuleIR {
        RuleCompiler::default()
            .compile_rule(&Rule::new(
                "reserve",
                Applicability::all([Premise::new("instrument_type", "in", vec!["art", "emt"])]),
                DecisionTree::from_node(Node::check(
                    "reserve_ratio >= 1.0",
                    Node::leaf("compliant"),
                    Node::leaf("non_compliant")
                        .obligation(ObligationInput::new("restore_reserve").deadline("30 days")),
                )),
            ))
            .unwrap()
    }

    #[test]
    fn decides_and_materializes_deadline() {
        let facts = Facts::new()
            .set("instrument_type", "art")
            .set("reserve_ratio", 0.9);
        let r = RuleRuntime::default().execute_rule(&ratio_rule(), &facts, at());
        assert!(r.applicable());
        assert_eq!(r.decision(), Some("non_compliant"));
        assert_eq!(r.trace().len(), 1);
        assert!(!r.trace()[0].result);
        assert_eq!(r.trace()[0].condition, "reserve_ratio >= 1.0");
        assert_eq!(
            r.obligations()[0].due,
            Some(Due::At(Utc.with_ymd_and_hms(2024, 7, 30, 0, 0, 0).unwrap()))
        );
    }

    #[test]
    fn not_applicable_has_empty_trace() {
        let facts = Facts::new().set("instrument_type", "other");
        let r = RuleRuntime::default().execute_rule(&ratio_rule(), &facts, at());
        assert!(!r.applicable());
        assert!(r.trace().is_empty());
        assert!(r.notes().is_empty());
    }

    #[test]
    fn missing_fact_is_false_with_note() {
        let facts = Facts::new().set("instrument_type", "emt");
        let r = RuleRuntime::default().execute_rule(&ratio_rule(), &facts, at());
        assert_eq!(r.decision(), Some("non_compliant"));
        assert_eq!(r.notes().len(), 1);
        assert!(r.notes()[0].contains("reserve_ratio"));
        assert!(!r.is_error());
    }

    #[test]
    fn missing_fact_error_policy() {
        let config = EngineConfig::default().with_missing_fact(MissingFactPolicy::Error);
        let facts = Facts::new().set("instrument_type", "emt");
        let runtime = RuleRuntime::new(&config);
        let r = runtime.execute_rule(&ratio_rule(), &facts, at());
        assert!(r.is_error());
        assert_eq!(r.decision(), None);
        assert_eq!(r.error(), Some("missing fact 'reserve_ratio'"));
        assert!(matches!(
            runtime.try_execute_rule(&ratio_rule(), &facts, at()),
            Err(ExecutionError::MissingFact { .. })
        ));
    }

    #[test]
    fn type_mismatch_becomes_failed_result() {
        let facts = Facts::new()
            .set("instrument_type", "art")
            .set("reserve_ratio", "high");
        let r = RuleRuntime::default().execute_rule(&ratio_rule(), &facts, at());
        assert!(r.applicable());
        assert_eq!(r.decision(), None);
        assert!(r.error().unwrap().starts_with("type mismatch on 'reserve_ratio'"));
        assert!(r.notes().last().unwrap().starts_with("error: "));
    }

    #[test]
    fn any_with_no_premises_never_applies() {
        let ir = RuleCompiler::default()
            .compile_rule(&Rule::new(
                "never",
                Applicability::Any(vec![]),
                DecisionTree::from_node(Node::leaf("x")),
            ))
            .unwrap();
        let r = RuleRuntime::default().execute_rule(&ir, &Facts::new(), at());
        assert!(!r.applicable());
    }

    fn looping_ir() -> RuleIR {
        // Hand-built IR that bypassed the compiler.
        RuleIR {
            rule_id: "loop".into(),
            version: 1,
            content_hash: ContentHash::of_bytes(b"loop"),
            applicability: CompiledApplicability::default(),
            checks: vec![CompiledCheck {
                node_id: 0,
                field: "x".into(),
                operator: Operator::Eq,
                operand: Value::Bool(true),
                true_next: 0,
                false_next: 7,
            }],
            decisions: vec![],
        }
    }

    #[test]
    fn step_limit_guards_bad_ir() {
        let facts = Facts::new().set("x", true);
        let r = RuleRuntime::default().execute_rule(&looping_ir(), &facts, at());
        assert_eq!(r.error(), Some("execution exceeded 4096 steps"));
        assert_eq!(r.trace().len(), 4096);
    }

    #[test]
    fn dangling_node_in_bad_ir() {
        let facts = Facts::new().set("x", false);
        let r = RuleRuntime::default().execute_rule(&looping_ir(), &facts, at());
        assert_eq!(r.error(), Some("node 7 does not exist"));
    }

    #[test]
    fn batch_preserves_order_in_parallel() {
        let config = EngineConfig::default()
            .with_max_workers(4)
            .with_parallel_threshold(2);
        let runtime = RuleRuntime::new(&config);
        let irs: Vec<RuleIR> = (0..10)
            .map(|i| ratio_rule().with_identity(&format!("r{i}"), 1))
            .collect();
        let facts = Facts::new()
            .set("instrument_type", "art")
            .set("reserve_ratio", 1.5);
        let results = runtime.execute(&irs, &facts, at());
        let ids: Vec<&str> = results.iter().map(DecisionResult::rule_id).collect();
        let expected: Vec<String> = (0..10).map(|i| format!("r{i}")).collect();
        assert_eq!(ids, expected.iter().map(String::as_str).collect::<Vec<_>>());
        assert!(results.iter().all(|r| r.decision() == Some("compliant")));
        assert_eq!(results, RuleRuntime::default().execute(&irs, &facts, at()));
    }
}
