use thiserror::Error;

use crate::config::ConfigError;
use crate::decoder::DecodeError;
use crate::parse::ConditionParseError;
use crate::temporal::{StorageError, VersioningError};
use crate::types::{CompilationError, ExecutionError};

/// Unified error type for callers that drive several stages and do not
/// need to tell them apart.
#[derive(Debug, Error)]
pub enum RegulaError {
    #[error(transparent)]
    Parse(#[from] ConditionParseError),

    #[error(transparent)]
    Compile(#[from] CompilationError),

    #[error(transparent)]
    Execution(#[from] ExecutionError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error(transparent)]
    Versioning(#[from] VersioningError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[cfg(feature = "binary-cache")]
    #[error(transparent)]
    Serialize(#[from] crate::serial::SerializeError),

    #[cfg(feature = "binary-cache")]
    #[error(transparent)]
    Deserialize(#[from] crate::serial::DeserializeError),
}
