use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// What a condition on an absent fact evaluates to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MissingFactPolicy {
    /// The condition is false and the result carries a note.
    #[default]
    TreatAsFalse,
    /// The rule fails with [`ExecutionError::MissingFact`](crate::ExecutionError::MissingFact).
    Error,
}

/// Engine configuration, loaded from TOML or built in code.
///
/// # Example
///
/// ```toml
/// max_tree_depth = 32
/// missing_fact = "error"
/// max_workers = 4
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Deepest decision tree the compiler accepts.
    pub max_tree_depth: usize,
    /// Behaviour for conditions on absent facts.
    pub missing_fact: MissingFactPolicy,
    /// Worker threads for batch execution. `0` uses the available parallelism.
    pub max_workers: usize,
    /// Batches smaller than this run on the calling thread.
    pub parallel_threshold: usize,
    /// Checks one execution may visit before it is aborted.
    pub max_steps: usize,
}

/// Hard ceiling on `max_tree_depth`.
pub const MAX_TREE_DEPTH_LIMIT: usize = 1024;

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_tree_depth: 64,
            missing_fact: MissingFactPolicy::TreatAsFalse,
            max_workers: 0,
            parallel_threshold: 16,
            max_steps: 4096,
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

impl EngineConfig {
    /// Parse and validate a TOML document. Missing keys take their defaults.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] for malformed TOML or unknown enum
    /// values, and [`ConfigError::Invalid`] if validation fails.
    pub fn from_toml_str(input: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(input)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a TOML file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] if the file cannot be read, otherwise as
    /// [`from_toml_str`](Self::from_toml_str).
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] naming the first offending field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_tree_depth == 0 {
            return Err(ConfigError::Invalid("max_tree_depth must be at least 1".into()));
        }
        if self.max_tree_depth > MAX_TREE_DEPTH_LIMIT {
            return Err(ConfigError::Invalid(format!(
                "max_tree_depth must not exceed {MAX_TREE_DEPTH_LIMIT}"
            )));
        }
        if self.max_steps == 0 {
            return Err(ConfigError::Invalid("max_steps must be at least 1".into()));
        }
        Ok(())
    }

    /// Worker count with `0` resolved to the machine's parallelism.
    #[must_use]
    pub fn worker_count(&self) -> usize {
        if self.max_workers > 0 {
            return self.max_workers;
        }
        std::thread::available_parallelism().map_or(1, std::num::NonZeroUsize::get)
    }

    #[must_use]
    pub fn with_missing_fact(mut self, policy: MissingFactPolicy) -> Self {
        self.missing_fact = policy;
        self
    }

    #[must_use]
    pub fn with_max_tree_depth(mut self, depth: usize) -> Self {
        self.max_tree_depth = depth;
        self
    }

    #[must_use]
    pub fn with_max_workers(mut self, workers: usize) -> Self {
        self.max_workers = workers;
        self
    }

    #[must_use]
    pub fn with_parallel_threshold(mut self, threshold: usize) -> Self {
        self.parallel_threshold = threshold;
        self
    }
}
