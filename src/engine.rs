use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tracing::{info, instrument, warn};

use crate::cache::IrCache;
use crate::compile::RuleCompiler;
use crate::config::EngineConfig;
use crate::index::{PremiseIndex, PremiseIndexBuilder};
use crate::runtime::RuleRuntime;
use crate::types::{CompilationError, DecisionResult, Facts, Rule, RuleIR};

/// Outcome of [`DecisionEngine::load`].
#[derive(Debug, Default)]
#[must_use]
pub struct LoadReport {
    /// Rule ids now being served, in load order.
    pub loaded: Vec<String>,
    /// Rules that were rejected.
    pub failed: Vec<CompilationError>,
}

impl LoadReport {
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

/// A consistent snapshot: the index and the IR it was built from.
#[derive(Debug, Default)]
struct LoadedRules {
    index: PremiseIndex,
    irs: BTreeMap<String, Arc<RuleIR>>,
}

/// Compiles, indexes and serves a rule set.
///
/// Readers take a snapshot of the loaded rules and never block a reload for
/// longer than an `Arc` clone; a reload builds the new snapshot off to the
/// side and swaps it in.
#[derive(Debug)]
pub struct DecisionEngine {
    compiler: RuleCompiler,
    cache: IrCache,
    index_builder: PremiseIndexBuilder,
    runtime: RuleRuntime,
    loaded: RwLock<Arc<LoadedRules>>,
}

impl Default for DecisionEngine {
    fn default() -> Self {
        Self::new(&EngineConfig::default())
    }
}

impl DecisionEngine {
    #[must_use]
    pub fn new(config: &EngineConfig) -> Self {
        Self::with_parts(
            RuleCompiler::new(config),
            IrCache::new(),
            PremiseIndexBuilder::new(),
            RuleRuntime::new(config),
        )
    }

    #[must_use]
    pub fn with_parts(
        compiler: RuleCompiler,
        cache: IrCache,
        index_builder: PremiseIndexBuilder,
        runtime: RuleRuntime,
    ) -> Self {
        Self {
            compiler,
            cache,
            index_builder,
            runtime,
            loaded: RwLock::new(Arc::new(LoadedRules::default())),
        }
    }

    /// Replace the served rule set.
    ///
    /// Each rule compiles through the cache independently; failures are
    /// reported and skipped. A repeated rule id keeps its first occurrence.
    #[instrument(skip_all, fields(rules = rules.len()))]
    pub fn load(&self, rules: &[Rule]) -> LoadReport {
        let mut report = LoadReport::default();
        let mut seen = HashSet::new();
        let mut irs = BTreeMap::new();

        for rule in rules {
            if !seen.insert(rule.rule_id.as_str()) {
                report.failed.push(CompilationError::DuplicateRule {
                    rule_id: rule.rule_id.clone(),
                });
                continue;
            }
            match self.cache.get_or_compile(rule, &self.compiler) {
                Ok(ir) => {
                    report.loaded.push(rule.rule_id.clone());
                    irs.insert(rule.rule_id.clone(), ir);
                }
                Err(e) => report.failed.push(e),
            }
        }

        let index = self.index_builder.build(irs.values().map(Arc::as_ref));
        *self.loaded.write() = Arc::new(LoadedRules { index, irs });

        if !report.is_clean() {
            warn!(failed = report.failed.len(), "some rules were not loaded");
        }
        info!(loaded = report.loaded.len(), "rule set loaded");
        report
    }

    /// Clear the IR cache, then [`load`](Self::load).
    pub fn reload(&self, rules: &[Rule]) -> LoadReport {
        self.cache.reset();
        self.load(rules)
    }

    fn snapshot(&self) -> Arc<LoadedRules> {
        Arc::clone(&self.loaded.read())
    }

    /// Evaluate every rule the index shortlists for `facts`.
    ///
    /// Returns results for rules that applied (decided or failed), sorted
    /// by rule id. Shortlisted rules whose applicability turned out false
    /// are dropped.
    #[instrument(skip_all, fields(facts = facts.len()))]
    pub fn decide(&self, facts: &Facts, evaluated_at: DateTime<Utc>) -> Vec<DecisionResult> {
        let snapshot = self.snapshot();
        let candidates: Vec<Arc<RuleIR>> = snapshot
            .index
            .candidates_for_facts(facts)
            .iter()
            .filter_map(|id| snapshot.irs.get(id).cloned())
            .collect();

        self.runtime
            .execute(&candidates, facts, evaluated_at)
            .into_iter()
            .filter(|r| r.applicable() || r.is_error())
            .collect()
    }

    /// Evaluate one rule by id, bypassing the index. `None` if the id is
    /// not loaded.
    pub fn decide_rule(
        &self,
        rule_id: &str,
        facts: &Facts,
        evaluated_at: DateTime<Utc>,
    ) -> Option<DecisionResult> {
        let ir = self.ir(rule_id)?;
        Some(self.runtime.execute_rule(&ir, facts, evaluated_at))
    }

    #[must_use]
    pub fn rule_ids(&self) -> Vec<String> {
        self.snapshot().irs.keys().cloned().collect()
    }

    #[must_use]
    pub fn ir(&self, rule_id: &str) -> Option<Arc<RuleIR>> {
        self.snapshot().irs.get(rule_id).cloned()
    }

    /// A copy of the currently published index.
    #[must_use]
    pub fn index(&self) -> PremiseIndex {
        self.snapshot().index.clone()
    }

    #[must_use]
    pub fn cache(&self) -> &IrCache {
        &self.cache
    }

    #[must_use]
    pub fn compiler(&self) -> &RuleCompiler {
        &self.compiler
    }

    #[must_use]
    pub fn runtime(&self) -> &RuleRuntime {
        &self.runtime
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;
    use crate::types::{Applicability, DecisionTree, Node, Premise};

    fn at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
    }

    fn rule(id: &str, activity: &str) -> Rule {
        Rule::new(
            id,
            Applicability::all([Premise::new("activity", "==", activity)]),
            DecisionTree::from_node(Node::check(
                "authorized == true",
                Node::leaf("authorized"),
                Node::leaf("not_authorized"),
            )),
        )
    }

    #[test]
    fn load_reports_duplicates_and_failures() {
        let engine = DecisionEngine::default();
        let broken = Rule::new("broken", Applicability::default(), DecisionTree::default());
        let report = engine.load(&[rule("a", "offer"), rule("a", "custody"), broken]);
        assert_eq!(report.loaded, vec!["a"]);
        assert_eq!(report.failed.len(), 2);
        assert!(!report.is_clean());
        assert_eq!(engine.rule_ids(), vec!["a"]);
    }

    #[test]
    fn decide_drops_inapplicable_candidates() {
        let engine = DecisionEngine::default();
        let _ = engine.load(&[rule("offer", "public_offer"), rule("custody", "custody")]);
        let facts = Facts::new().set("activity", "custody").set("authorized", true);
        let results = engine.decide(&facts, at());
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].rule_id(), "custody");
        assert_eq!(results[0].decision(), Some("authorized"));
    }

    #[test]
    fn decide_rule_by_id() {
        let engine = DecisionEngine::default();
        let _ = engine.load(&[rule("offer", "public_offer")]);
        let facts = Facts::new().set("activity", "custody");
        let r = engine.decide_rule("offer", &facts, at()).unwrap();
        assert!(!r.applicable());
        assert!(engine.decide_rule("missing", &facts, at()).is_none());
    }

    #[test]
    fn load_replaces_previous_set() {
        let engine = DecisionEngine::default();
        let _ = engine.load(&[rule("a", "x"), rule("b", "y")]);
        let _ = engine.load(&[rule("c", "z")]);
        assert_eq!(engine.rule_ids(), vec!["c"]);
        assert_eq!(engine.index().rule_count(), 1);
    }

    #[test]
    fn reload_recompiles() {
        let engine = DecisionEngine::default();
        let rules = [rule("a", "x")];
        let _ = engine.load(&rules);
        let _ = engine.load(&rules);
        assert_eq!(engine.cache().stats().misses, 1);
        let _ = engine.reload(&rules);
        assert_eq!(engine.cache().stats().misses, 1);
        assert_eq!(engine.cache().stats().hits, 0);
    }
}
