use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;
use tracing::debug;

use crate::canonical::content_hash;
use crate::compile::RuleCompiler;
use crate::types::{CompilationError, ContentHash, Rule, RuleIR};

/// Snapshot of cache counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    pub entries: usize,
    pub hits: u64,
    /// Number of compilations performed, i.e. lookups that missed.
    pub misses: u64,
}

/// Entries are per content hash and per compiler depth limit: IR accepted
/// under a permissive limit is never served to a stricter compiler.
type CacheKey = (ContentHash, usize);

/// Compiled IR memoized by content hash.
///
/// Rules with identical content share one entry regardless of rule id or
/// version; a hit for a different identity is returned re-stamped with the
/// caller's id and version. Entries live until [`reset`](Self::reset).
#[derive(Debug, Default)]
pub struct IrCache {
    entries: RwLock<HashMap<CacheKey, Arc<RuleIR>>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl IrCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the cached IR for `rule`'s content, compiling on a miss.
    ///
    /// Compilation runs outside the lock. If two threads miss on the same
    /// content at once, both compile and the first insert wins.
    ///
    /// # Errors
    ///
    /// Propagates the compiler's [`CompilationError`]. Failures are not cached.
    pub fn get_or_compile(
        &self,
        rule: &Rule,
        compiler: &RuleCompiler,
    ) -> Result<Arc<RuleIR>, CompilationError> {
        let hash = content_hash(rule);
        let key = (hash, compiler.max_depth());

        let cached = self.entries.read().get(&key).cloned();
        if let Some(ir) = cached {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(restamp(ir, rule));
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        debug!(rule_id = %rule.rule_id, hash = key.0.short(), "IR cache miss");
        let compiled = Arc::new(compiler.compile_rule(rule)?);

        let stored = Arc::clone(
            self.entries
                .write()
                .entry(key)
                .or_insert_with(|| Arc::clone(&compiled)),
        );
        Ok(restamp(stored, rule))
    }

    /// Look up IR that `compiler` produced for `hash`, without compiling.
    #[must_use]
    pub fn get(&self, hash: &ContentHash, compiler: &RuleCompiler) -> Option<Arc<RuleIR>> {
        self.entries
            .read()
            .get(&(hash.clone(), compiler.max_depth()))
            .cloned()
    }

    /// Drop every entry and zero the counters.
    pub fn reset(&self) {
        self.entries.write().clear();
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
        debug!("IR cache reset");
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    #[must_use]
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.len(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }
}

fn restamp(ir: Arc<RuleIR>, rule: &Rule) -> Arc<RuleIR> {
    if ir.rule_id == rule.rule_id && ir.version == rule.version {
        ir
    } else {
        Arc::new((*ir).clone().with_identity(&rule.rule_id, rule.version))
    }
}
