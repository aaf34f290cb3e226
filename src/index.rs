//! Inverted index from premise keys to rules.
//!
//! The index is a prefilter. [`PremiseIndex::candidates`] may return rules
//! whose applicability later fails, but never omits a rule whose
//! applicability holds for the facts the keys were derived from. This rests
//! on one property of the runtime: a premise on an absent fact never holds.
//! So an applicable rule with at least one premise tests some present field,
//! and every rule is indexed under all of its premise keys. Rules with an
//! empty `all` predicate apply unconditionally and are always returned.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::types::{Facts, Operator, RuleIR, premise_key};

/// One (premise key, rule version) pairing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PremiseIndexRecord {
    pub premise_key: String,
    pub rule_id: String,
    pub rule_version: u32,
    /// Position of the key's first occurrence in the rule (applicability
    /// premises first, then tree checks in node order).
    pub position: usize,
    /// In `[0, 1]`; lower means the premise is expected to hold less often.
    pub selectivity: f64,
}

/// Estimates how often a premise holds. Pluggable so a deployment can swap
/// in statistics from real fact distributions.
pub trait SelectivityEstimator: Send + Sync {
    fn estimate(&self, premise_key: &str, operator: Operator) -> f64;
}

/// Default heuristic: equality is most selective, negations least.
#[derive(Debug, Clone, Copy, Default)]
pub struct OperatorSelectivity;

impl SelectivityEstimator for OperatorSelectivity {
    fn estimate(&self, _premise_key: &str, operator: Operator) -> f64 {
        match operator {
            Operator::Eq => 0.1,
            Operator::In => 0.2,
            Operator::Contains => 0.3,
            Operator::Gt | Operator::Gte | Operator::Lt | Operator::Lte => 0.5,
            Operator::Neq | Operator::NotIn => 0.9,
        }
    }
}

pub struct PremiseIndexBuilder {
    estimator: Box<dyn SelectivityEstimator>,
}

impl fmt::Debug for PremiseIndexBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PremiseIndexBuilder").finish_non_exhaustive()
    }
}

impl Default for PremiseIndexBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl PremiseIndexBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::with_estimator(OperatorSelectivity)
    }

    #[must_use]
    pub fn with_estimator(estimator: impl SelectivityEstimator + 'static) -> Self {
        Self {
            estimator: Box::new(estimator),
        }
    }

    /// Distinct premise keys of a rule in first-occurrence order.
    #[must_use]
    pub fn extract_premise_keys(&self, ir: &RuleIR) -> Vec<String> {
        key_operators(ir).into_iter().map(|(key, _)| key).collect()
    }

    /// Estimated selectivity, clamped to `[0, 1]`. A NaN estimate counts
    /// as least selective.
    #[must_use]
    pub fn selectivity(&self, premise_key: &str, operator: Operator) -> f64 {
        let raw = self.estimator.estimate(premise_key, operator);
        if raw.is_nan() { 1.0 } else { raw.clamp(0.0, 1.0) }
    }

    /// Index records for one compiled rule, one per distinct premise key.
    #[must_use]
    pub fn records_for(&self, ir: &RuleIR) -> Vec<PremiseIndexRecord> {
        key_operators(ir)
            .into_iter()
            .enumerate()
            .map(|(position, (key, operator))| PremiseIndexRecord {
                selectivity: self.selectivity(&key, operator),
                premise_key: key,
                rule_id: ir.rule_id.clone(),
                rule_version: ir.version,
                position,
            })
            .collect()
    }

    #[instrument(skip_all)]
    pub fn build<'a>(&self, irs: impl IntoIterator<Item = &'a RuleIR>) -> PremiseIndex {
        let mut buckets: BTreeMap<String, Vec<PremiseIndexRecord>> = BTreeMap::new();
        let mut unconditional = BTreeSet::new();
        let mut rules = BTreeSet::new();

        for ir in irs {
            rules.insert(ir.rule_id.clone());
            if ir.applicability.is_unconditional() {
                unconditional.insert(ir.rule_id.clone());
            }
            for record in self.records_for(ir) {
                buckets
                    .entry(record.premise_key.clone())
                    .or_default()
                    .push(record);
            }
        }

        for bucket in buckets.values_mut() {
            bucket.sort_by(|a, b| {
                a.selectivity
                    .total_cmp(&b.selectivity)
                    .then_with(|| a.rule_id.cmp(&b.rule_id))
                    .then_with(|| a.rule_version.cmp(&b.rule_version))
            });
        }

        debug!(
            rules = rules.len(),
            keys = buckets.len(),
            unconditional = unconditional.len(),
            "built premise index"
        );
        PremiseIndex {
            buckets,
            unconditional,
            rules,
        }
    }
}

fn key_operators(ir: &RuleIR) -> Vec<(String, Operator)> {
    let premises = ir
        .applicability
        .premises
        .iter()
        .map(|p| (p.key(), p.operator));
    let checks = ir.checks.iter().map(|c| (c.key(), c.operator));

    let mut seen = HashSet::new();
    premises
        .chain(checks)
        .filter(|(key, _)| seen.insert(key.clone()))
        .collect()
}

/// Immutable once built; rebuild and swap to change it.
#[derive(Debug, Clone, Default)]
pub struct PremiseIndex {
    buckets: BTreeMap<String, Vec<PremiseIndexRecord>>,
    unconditional: BTreeSet<String>,
    rules: BTreeSet<String>,
}

impl PremiseIndex {
    /// Premise keys implied by a fact set: every present field paired with
    /// every operator.
    #[must_use]
    pub fn fact_keys(facts: &Facts) -> Vec<String> {
        facts
            .fields()
            .flat_map(|field| Operator::ALL.iter().map(move |op| premise_key(field, *op)))
            .collect()
    }

    /// Union of the buckets for `fact_keys`, plus every unconditional rule.
    #[must_use]
    pub fn candidates<I>(&self, fact_keys: I) -> BTreeSet<String>
    where
        I: IntoIterator,
        I::Item: AsRef<str>,
    {
        let mut out = self.unconditional.clone();
        for key in fact_keys {
            if let Some(bucket) = self.buckets.get(key.as_ref()) {
                out.extend(bucket.iter().map(|r| r.rule_id.clone()));
            }
        }
        out
    }

    #[must_use]
    pub fn candidates_for_facts(&self, facts: &Facts) -> BTreeSet<String> {
        self.candidates(Self::fact_keys(facts))
    }

    /// Records for one premise key, most selective first.
    #[must_use]
    pub fn bucket(&self, premise_key: &str) -> &[PremiseIndexRecord] {
        self.buckets.get(premise_key).map(Vec::as_slice).unwrap_or_default()
    }

    pub fn records(&self) -> impl Iterator<Item = &PremiseIndexRecord> {
        self.buckets.values().flatten()
    }

    pub fn premise_keys(&self) -> impl Iterator<Item = &str> {
        self.buckets.keys().map(String::as_str)
    }

    /// Number of distinct premise keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty() && self.unconditional.is_empty()
    }

    /// Number of distinct rule ids indexed.
    #[must_use]
    pub fn rule_count(&self) -> usize {
        self.rules.len()
    }
}
