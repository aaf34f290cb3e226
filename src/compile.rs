use tracing::{debug, instrument, warn};

use crate::canonical::content_hash;
use crate::config::{EngineConfig, MAX_TREE_DEPTH_LIMIT};
use crate::parse::parse_condition;
use crate::types::{
    Applicability, ApplicabilityMode, CompilationError, CompiledApplicability, CompiledCheck,
    CompiledPremise, Condition, DeadlineSpec, DecisionEntry, ObligationInput, ObligationSpec,
    Operator, Rule, RuleIR, TreeNode, Value,
};

/// Turns [`Rule`]s into [`RuleIR`].
///
/// Compilation is pure: the same rule content always yields the same IR and
/// the same content hash.
#[derive(Debug, Clone)]
pub struct RuleCompiler {
    max_depth: usize,
}

impl Default for RuleCompiler {
    fn default() -> Self {
        Self::new(&EngineConfig::default())
    }
}

impl RuleCompiler {
    /// The depth limit is capped at [`MAX_TREE_DEPTH_LIMIT`] whatever the
    /// config says.
    #[must_use]
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            max_depth: config.max_tree_depth.min(MAX_TREE_DEPTH_LIMIT),
        }
    }

    #[must_use]
    pub fn max_depth(&self) -> usize {
        self.max_depth
    }

    /// Compile one rule.
    ///
    /// # Errors
    ///
    /// Returns [`CompilationError`] for malformed conditions or nodes,
    /// dangling branch indices, cycles, and trees deeper than the configured
    /// maximum.
    #[instrument(skip_all, fields(rule_id = %rule.rule_id, version = rule.version))]
    pub fn compile_rule(&self, rule: &Rule) -> Result<RuleIR, CompilationError> {
        if rule.decision_tree.is_empty() {
            return Err(CompilationError::EmptyTree {
                rule_id: rule.rule_id.clone(),
            });
        }

        let applicability = compile_applicability(&rule.rule_id, &rule.applies_if)?;

        let mut walker = TreeWalker::new(rule, self.max_depth);
        walker.walk()?;
        let TreeWalker {
            mut checks,
            mut decisions,
            ..
        } = walker;
        checks.sort_by_key(|c| c.node_id);
        decisions.sort_by_key(|d| d.node_id);

        let ir = RuleIR {
            rule_id: rule.rule_id.clone(),
            version: rule.version,
            content_hash: content_hash(rule),
            applicability,
            checks,
            decisions,
        };
        debug!(
            checks = ir.checks.len(),
            decisions = ir.decisions.len(),
            hash = ir.content_hash.short(),
            "compiled rule"
        );
        Ok(ir)
    }

    /// Compile a batch. Every rule is attempted; one failure never blocks
    /// the others. Output order follows input order.
    pub fn compile_rules(&self, rules: &[Rule]) -> Vec<(String, Result<RuleIR, CompilationError>)> {
        rules
            .iter()
            .map(|rule| {
                let result = self.compile_rule(rule);
                if let Err(e) = &result {
                    warn!(rule_id = %rule.rule_id, error = %e, "rule failed to compile");
                }
                (rule.rule_id.clone(), result)
            })
            .collect()
    }
}

fn compile_applicability(
    rule_id: &str,
    applies_if: &Applicability,
) -> Result<CompiledApplicability, CompilationError> {
    let mode = match applies_if {
        Applicability::All(_) => ApplicabilityMode::All,
        Applicability::Any(_) => ApplicabilityMode::Any,
    };
    let premises = applies_if
        .premises()
        .iter()
        .enumerate()
        .map(|(i, p)| {
            let path = || vec![format!("applies_if[{i}]")];
            let operator = parse_operator(rule_id, &path(), &p.operator)?;
            check_operand(rule_id, &path(), operator, &p.value)?;
            Ok(CompiledPremise {
                field: p.field.trim().to_owned(),
                operator,
                operand: p.value.clone(),
            })
        })
        .collect::<Result<Vec<_>, _>>()?;
    Ok(CompiledApplicability { mode, premises })
}

fn parse_operator(
    rule_id: &str,
    path: &[String],
    text: &str,
) -> Result<Operator, CompilationError> {
    text.parse().map_err(|_| CompilationError::UnknownOperator {
        rule_id: rule_id.to_owned(),
        node_path: path.to_vec(),
        operator: text.to_owned(),
    })
}

/// Reject operands the runtime could never compare.
fn check_operand(
    rule_id: &str,
    path: &[String],
    operator: Operator,
    operand: &Value,
) -> Result<(), CompilationError> {
    let problem = if operator.takes_list() && !operand.is_list() {
        Some(format!("'{operator}' requires a list operand, got {}", operand.type_name()))
    } else if operator.is_range() && operand.as_number().is_none() {
        Some(format!("'{operator}' requires a numeric operand, got {}", operand.type_name()))
    } else if operator == Operator::Contains && operand.is_list() {
        Some("'contains' requires a single value, got list".to_owned())
    } else {
        None
    };
    match problem {
        Some(message) => Err(CompilationError::InvalidOperand {
            rule_id: rule_id.to_owned(),
            node_path: path.to_vec(),
            message,
        }),
        None => Ok(()),
    }
}

#[derive(Debug, Clone, Copy)]
enum DfsState {
    Unvisited,
    InStack,
    /// Assigned node id and the height (in nodes) of the subtree below.
    Done { id: usize, height: usize },
}

/// Pending work of the tree walk.
enum Step {
    /// Reach arena slot `index` at `depth` (root = 1).
    Enter { index: usize, depth: usize },
    /// Both branches of a check are done; emit it.
    Finish {
        index: usize,
        id: usize,
        check: (String, Operator, Value),
        branches: (usize, usize),
    },
}

/// Depth-first walk over the node arena with an explicit stack, so tree
/// depth never translates into call depth. Ids are assigned in pre-order:
/// the root is 0 and a check's true branch is numbered before its false
/// branch.
struct TreeWalker<'r> {
    rule: &'r Rule,
    max_depth: usize,
    state: Vec<DfsState>,
    path: Vec<String>,
    next_id: usize,
    checks: Vec<CompiledCheck>,
    decisions: Vec<DecisionEntry>,
}

impl<'r> TreeWalker<'r> {
    fn new(rule: &'r Rule, max_depth: usize) -> Self {
        Self {
            rule,
            max_depth,
            state: vec![DfsState::Unvisited; rule.decision_tree.len()],
            path: Vec::new(),
            next_id: 0,
            checks: Vec::new(),
            decisions: Vec::new(),
        }
    }

    fn rule_id(&self) -> String {
        self.rule.rule_id.clone()
    }

    fn path_with(&self, node: &TreeNode) -> Vec<String> {
        let mut path = self.path.clone();
        path.push(node.node_id.clone());
        path
    }

    fn walk(&mut self) -> Result<(), CompilationError> {
        let mut steps = vec![Step::Enter { index: 0, depth: 1 }];
        while let Some(step) = steps.pop() {
            match step {
                Step::Enter { index, depth } => self.enter(index, depth, &mut steps)?,
                Step::Finish {
                    index,
                    id,
                    check,
                    branches,
                } => self.finish(index, id, check, branches)?,
            }
        }
        Ok(())
    }

    fn enter(
        &mut self,
        index: usize,
        depth: usize,
        steps: &mut Vec<Step>,
    ) -> Result<(), CompilationError> {
        let rule = self.rule;
        let node = &rule.decision_tree.nodes[index];

        match self.state[index] {
            DfsState::InStack => {
                return Err(CompilationError::Cycle {
                    rule_id: self.rule_id(),
                    node_path: self.path_with(node),
                });
            }
            // Shared subtree: its height still counts from this depth.
            DfsState::Done { height, .. } => return self.check_depth(node, depth + height - 1),
            DfsState::Unvisited => {}
        }
        self.check_depth(node, depth)?;

        let id = self.next_id;
        self.next_id += 1;
        self.state[index] = DfsState::InStack;
        self.path.push(node.node_id.clone());

        match (&node.condition, &node.decision) {
            (Some(condition), None) => {
                if !node.obligations.is_empty() {
                    return Err(
                        self.malformed(node, "obligations are only allowed on decision nodes")
                    );
                }
                let t = self.branch(node.true_branch, "true")?;
                let f = self.branch(node.false_branch, "false")?;
                let check = self.compile_condition(condition)?;
                steps.push(Step::Finish {
                    index,
                    id,
                    check,
                    branches: (t, f),
                });
                steps.push(Step::Enter {
                    index: f,
                    depth: depth + 1,
                });
                steps.push(Step::Enter {
                    index: t,
                    depth: depth + 1,
                });
                Ok(())
            }
            (None, Some(decision)) => {
                self.visit_leaf(node, decision, id)?;
                self.path.pop();
                self.state[index] = DfsState::Done { id, height: 1 };
                Ok(())
            }
            (Some(_), Some(_)) => {
                Err(self.malformed(node, "node has both a condition and a decision"))
            }
            (None, None) => {
                Err(self.malformed(node, "node has neither a condition nor a decision"))
            }
        }
    }

    fn finish(
        &mut self,
        index: usize,
        id: usize,
        (field, operator, operand): (String, Operator, Value),
        (t, f): (usize, usize),
    ) -> Result<(), CompilationError> {
        let done = |slot: usize| match self.state[slot] {
            DfsState::Done { id, height } => Some((id, height)),
            DfsState::Unvisited | DfsState::InStack => None,
        };
        let (Some((true_next, true_height)), Some((false_next, false_height))) = (done(t), done(f))
        else {
            let node = &self.rule.decision_tree.nodes[index];
            return Err(self.malformed(node, "branch was not compiled"));
        };

        self.checks.push(CompiledCheck {
            node_id: id,
            field,
            operator,
            operand,
            true_next,
            false_next,
        });
        self.path.pop();
        self.state[index] = DfsState::Done {
            id,
            height: 1 + true_height.max(false_height),
        };
        Ok(())
    }

    fn check_depth(&self, node: &TreeNode, depth: usize) -> Result<(), CompilationError> {
        if depth > self.max_depth {
            return Err(CompilationError::DepthExceeded {
                rule_id: self.rule_id(),
                node_path: self.path_with(node),
                limit: self.max_depth,
            });
        }
        Ok(())
    }

    fn malformed(&self, node: &TreeNode, reason: &str) -> CompilationError {
        CompilationError::MalformedNode {
            rule_id: self.rule_id(),
            node_path: self.path.clone(),
            reason: format!("{reason} (node '{}')", node.node_id),
        }
    }

    fn branch(
        &self,
        target: Option<usize>,
        label: &'static str,
    ) -> Result<usize, CompilationError> {
        let target = target.ok_or_else(|| CompilationError::MissingBranch {
            rule_id: self.rule_id(),
            node_path: self.path.clone(),
            branch: label,
        })?;
        if target >= self.rule.decision_tree.len() {
            return Err(CompilationError::DanglingReference {
                rule_id: self.rule_id(),
                node_path: self.path.clone(),
                target,
            });
        }
        Ok(target)
    }

    fn compile_condition(
        &self,
        condition: &Condition,
    ) -> Result<(String, Operator, Value), CompilationError> {
        let (field, operator, operand) = match condition {
            Condition::Expression(text) => {
                let parsed =
                    parse_condition(text).map_err(|e| CompilationError::MalformedCondition {
                        rule_id: self.rule_id(),
                        node_path: self.path.clone(),
                        message: e.message().to_owned(),
                    })?;
                (parsed.field, parsed.operator, parsed.operand)
            }
            Condition::Structured {
                field,
                operator,
                value,
            } => {
                let field = field.trim();
                if field.is_empty() {
                    return Err(CompilationError::MalformedCondition {
                        rule_id: self.rule_id(),
                        node_path: self.path.clone(),
                        message: "empty field name".into(),
                    });
                }
                let operator = parse_operator(&self.rule.rule_id, &self.path, operator)?;
                (field.to_owned(), operator, value.clone())
            }
        };
        check_operand(&self.rule.rule_id, &self.path, operator, &operand)?;
        Ok((field, operator, operand))
    }

    fn visit_leaf(
        &mut self,
        node: &TreeNode,
        decision: &str,
        id: usize,
    ) -> Result<(), CompilationError> {
        if node.true_branch.is_some() || node.false_branch.is_some() {
            return Err(self.malformed(node, "decision nodes cannot have branches"));
        }
        let obligations = node
            .obligations
            .iter()
            .map(|o| self.compile_obligation(o))
            .collect::<Result<Vec<_>, _>>()?;
        self.decisions.push(DecisionEntry {
            node_id: id,
            outcome: decision.to_owned(),
            obligations,
        });
        Ok(())
    }

    fn compile_obligation(
        &self,
        obligation: &ObligationInput,
    ) -> Result<ObligationSpec, CompilationError> {
        let deadline = obligation
            .deadline
            .as_deref()
            .map(|text| {
                text.parse::<DeadlineSpec>()
                    .map_err(|_| CompilationError::InvalidDeadline {
                        rule_id: self.rule_id(),
                        node_path: self.path.clone(),
                        deadline: text.to_owned(),
                    })
            })
            .transpose()?;
        Ok(ObligationSpec {
            id: obligation.id.clone(),
            description: obligation.description.clone(),
            deadline,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{DecisionTree, IrNode, Node, Premise, TreeNode};

    fn art36() -> Rule {
        Rule::new(
            "mica_art36",
            Applicability::all([Premise::new("activity", "==", "public_offer")]),
            DecisionTree::from_node(Node::check(
                "authorized == true",
                Node::leaf("authorized"),
                Node::check(
                    "is_credit_institution == true",
                    Node::leaf("exempt"),
                    Node::leaf("not_authorized").obligation(
                        ObligationInput::new("obtain_authorization").deadline("60 days"),
                    ),
                ),
            )),
        )
    }

    #[test]
    fn compiles_pre_order_ids() {
        let ir = RuleCompiler::default().compile_rule(&art36()).unwrap();
        assert_eq!(ir.checks.len(), 2);
        assert_eq!(ir.decisions.len(), 3);
        assert_eq!(ir.checks[0].node_id, 0);
        assert_eq!(ir.checks[0].true_next, 1);
        assert_eq!(ir.checks[0].false_next, 2);
        assert_eq!(ir.checks[1].node_id, 2);
        assert_eq!((ir.checks[1].true_next, ir.checks[1].false_next), (3, 4));
        assert!(matches!(ir.node(4), Some(IrNode::Decision(d)) if d.outcome == "not_authorized"));
        assert_eq!(ir.validate(), Ok(()));
    }

    #[test]
    fn deadline_is_a_duration_token() {
        let ir = RuleCompiler::default().compile_rule(&art36()).unwrap();
        let leaf = ir.decisions.iter().find(|d| d.outcome == "not_authorized").unwrap();
        assert_eq!(leaf.obligations[0].deadline, Some("60 days".parse().unwrap()));
    }

    #[test]
    fn compile_is_deterministic() {
        let compiler = RuleCompiler::default();
        assert_eq!(
            compiler.compile_rule(&art36()).unwrap(),
            compiler.compile_rule(&art36()).unwrap()
        );
    }

    #[test]
    fn cycle_reports_node_path() {
        let rule = Rule::new(
            "cyclic",
            Applicability::default(),
            DecisionTree::new(vec![
                TreeNode::check("a", "x == 1", 1, 2),
                TreeNode::check("b", "y == 1", 0, 2),
                TreeNode::leaf("c", "done"),
            ]),
        );
        let err = RuleCompiler::default().compile_rule(&rule).unwrap_err();
        assert_eq!(
            err,
            CompilationError::Cycle {
                rule_id: "cyclic".into(),
                node_path: vec!["a".into(), "b".into(), "a".into()],
            }
        );
    }

    #[test]
    fn self_loop_is_a_cycle() {
        let rule = Rule::new(
            "self",
            Applicability::default(),
            DecisionTree::new(vec![TreeNode::check("a", "x == 1", 0, 1), TreeNode::leaf("b", "b")]),
        );
        assert!(matches!(
            RuleCompiler::default().compile_rule(&rule),
            Err(CompilationError::Cycle { .. })
        ));
    }

    #[test]
    fn shared_leaf_is_not_a_cycle() {
        let rule = Rule::new(
            "dag",
            Applicability::default(),
            DecisionTree::new(vec![
                TreeNode::check("a", "x == 1", 1, 2),
                TreeNode::check("b", "y == 1", 2, 3),
                TreeNode::leaf("c", "shared"),
                TreeNode::leaf("d", "other"),
            ]),
        );
        let ir = RuleCompiler::default().compile_rule(&rule).unwrap();
        assert_eq!(ir.node_count(), 4);
        assert_eq!(ir.validate(), Ok(()));
    }

    #[test]
    fn depth_limit() {
        let config = EngineConfig::default().with_max_tree_depth(2);
        let compiler = RuleCompiler::new(&config);

        let shallow = Rule::new(
            "shallow",
            Applicability::default(),
            DecisionTree::from_node(Node::check("x == 1", Node::leaf("a"), Node::leaf("b"))),
        );
        assert!(compiler.compile_rule(&shallow).is_ok());

        let err = compiler.compile_rule(&art36()).unwrap_err();
        assert!(matches!(err, CompilationError::DepthExceeded { limit: 2, .. }));
        assert_eq!(err.node_path().len(), 3);
    }

    #[test]
    fn shared_subtree_counts_towards_depth() {
        // c is first reached at depth 2 through a, then again at depth 3
        // through b.
        let rule = Rule::new(
            "dag",
            Applicability::default(),
            DecisionTree::new(vec![
                TreeNode::check("a", "x == 1", 2, 1),
                TreeNode::check("b", "y == 1", 2, 4),
                TreeNode::check("c", "z == 1", 3, 4),
                TreeNode::leaf("d", "d"),
                TreeNode::leaf("e", "e"),
            ]),
        );
        let err = RuleCompiler::new(&EngineConfig::default().with_max_tree_depth(3))
            .compile_rule(&rule)
            .unwrap_err();
        assert!(matches!(err, CompilationError::DepthExceeded { limit: 3, .. }));
        assert_eq!(err.node_path(), ["a".to_owned(), "b".to_owned(), "c".to_owned()].as_slice());

        let deeper = RuleCompiler::new(&EngineConfig::default().with_max_tree_depth(4));
        assert!(deeper.compile_rule(&rule).is_ok());
    }

    #[test]
    fn chain_at_the_depth_cap_compiles() {
        let levels = MAX_TREE_DEPTH_LIMIT - 1;
        let mut nodes: Vec<TreeNode> = (0..levels)
            .map(|i| TreeNode::check(format!("n{i}"), "x == 1", i + 1, levels))
            .collect();
        nodes.push(TreeNode::leaf("end", "done"));
        let rule = Rule::new("chain", Applicability::default(), DecisionTree::new(nodes));

        let compiler = RuleCompiler::new(&EngineConfig::default().with_max_tree_depth(usize::MAX));
        assert_eq!(compiler.max_depth(), MAX_TREE_DEPTH_LIMIT);
        let ir = compiler.compile_rule(&rule).unwrap();
        assert_eq!(ir.node_count(), MAX_TREE_DEPTH_LIMIT);
        assert_eq!(ir.validate(), Ok(()));
    }

    #[test]
    fn malformed_condition() {
        let rule = Rule::new(
            "bad",
            Applicability::default(),
            DecisionTree::from_node(Node::check(
                "authorized ===",
                Node::leaf("a"),
                Node::leaf("b"),
            )),
        );
        let err = RuleCompiler::default().compile_rule(&rule).unwrap_err();
        assert!(matches!(err, CompilationError::MalformedCondition { .. }));
        assert_eq!(err.node_path(), ["root".to_owned()].as_slice());
    }

    #[test]
    fn missing_branch() {
        let mut node = TreeNode::check("root", "x == 1", 1, 1);
        node.false_branch = None;
        let rule = Rule::new(
            "r",
            Applicability::default(),
            DecisionTree::new(vec![node, TreeNode::leaf("a", "a")]),
        );
        assert!(matches!(
            RuleCompiler::default().compile_rule(&rule),
            Err(CompilationError::MissingBranch { branch: "false", .. })
        ));
    }

    #[test]
    fn dangling_branch() {
        let rule = Rule::new(
            "r",
            Applicability::default(),
            DecisionTree::new(vec![
                TreeNode::check("root", "x == 1", 1, 9),
                TreeNode::leaf("a", "a"),
            ]),
        );
        assert!(matches!(
            RuleCompiler::default().compile_rule(&rule),
            Err(CompilationError::DanglingReference { target: 9, .. })
        ));
    }

    #[test]
    fn node_without_condition_or_decision() {
        let mut node = TreeNode::leaf("root", "x");
        node.decision = None;
        let rule = Rule::new("r", Applicability::default(), DecisionTree::new(vec![node]));
        assert!(matches!(
            RuleCompiler::default().compile_rule(&rule),
            Err(CompilationError::MalformedNode { .. })
        ));
    }

    #[test]
    fn empty_tree() {
        let rule = Rule::new("r", Applicability::default(), DecisionTree::default());
        assert_eq!(
            RuleCompiler::default().compile_rule(&rule),
            Err(CompilationError::EmptyTree { rule_id: "r".into() })
        );
    }

    #[test]
    fn unknown_premise_operator() {
        let rule = Rule::new(
            "r",
            Applicability::all([Premise::new("activity", "like", "x")]),
            DecisionTree::from_node(Node::leaf("a")),
        );
        let err = RuleCompiler::default().compile_rule(&rule).unwrap_err();
        assert!(matches!(
            &err,
            CompilationError::UnknownOperator { operator, .. } if operator == "like"
        ));
        assert_eq!(err.node_path(), ["applies_if[0]".to_owned()].as_slice());
    }

    #[test]
    fn invalid_operands() {
        for cond in ["x in 'a'", "x >= 'high'", "x contains ['a']", "x not_in 3"] {
            let rule = Rule::new(
                "r",
                Applicability::default(),
                DecisionTree::from_node(Node::check(cond, Node::leaf("a"), Node::leaf("b"))),
            );
            assert!(
                matches!(
                    RuleCompiler::default().compile_rule(&rule),
                    Err(CompilationError::InvalidOperand { .. })
                ),
                "accepted {cond:?}"
            );
        }
    }

    #[test]
    fn invalid_deadline() {
        let rule = Rule::new(
            "r",
            Applicability::default(),
            DecisionTree::from_node(
                Node::leaf("a").obligation(ObligationInput::new("o").deadline("soonish")),
            ),
        );
        assert!(matches!(
            RuleCompiler::default().compile_rule(&rule),
            Err(CompilationError::InvalidDeadline { .. })
        ));
    }

    #[test]
    fn batch_isolates_failures() {
        let bad = Rule::new("bad", Applicability::default(), DecisionTree::default());
        let results =
            RuleCompiler::default().compile_rules(&[art36(), bad, art36().with_version(2)]);
        assert_eq!(results.len(), 3);
        assert!(results[0].1.is_ok());
        assert!(results[1].1.is_err());
        assert_eq!(results[1].0, "bad");
        assert_eq!(results[2].1.as_ref().unwrap().version, 2);
    }
}
