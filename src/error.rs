//! Error types for context budgeting

use thiserror::Error;

use crate::context::models::PoolKind;

/// Crate-wide result alias
pub type Result<T> = std::result::Result<T, ContextError>;

/// Top-level error type
#[derive(Debug, Error)]
pub enum ContextError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Source error: {0}")]
    Source(#[from] SourceError),

    #[error("Allocation error: {0}")]
    Allocation(#[from] AllocationError),
}

impl From<config::ConfigError> for ContextError {
    fn from(err: config::ConfigError) -> Self {
        ContextError::Configuration(err.to_string())
    }
}

/// Failures inside the dynamic allocation algorithm.
///
/// These are the only errors the fallback policy recovers from by
/// substituting the static plan.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum AllocationError {
    #[error("Invalid {name} ratio: {value}")]
    InvalidRatio { name: &'static str, value: f64 },

    #[error("History floor unsatisfiable: need {needed} tokens, have {available} tokens")]
    HistoryFloorUnsatisfiable { needed: usize, available: usize },

    #[error("Plan overflow: {used} tokens selected, {ceiling} tokens allowed")]
    PlanOverflow { used: usize, ceiling: usize },

    #[error("Pool kind mismatch: expected {expected}, found {found}")]
    PoolKindMismatch { expected: PoolKind, found: PoolKind },
}

/// Exact tokenizer failures. Never surfaced past the exact counter.
#[derive(Debug, Clone, Error)]
pub enum EncodeError {
    #[error("Tokenizer unavailable: {0}")]
    Unavailable(String),

    #[error("Encoding failed: {0}")]
    Failed(String),
}

/// Collaborator (history, examples, retrieval) failures
#[derive(Debug, Clone, Error)]
pub enum SourceError {
    #[error("History unavailable: {0}")]
    History(String),

    #[error("Examples unavailable: {0}")]
    Examples(String),

    #[error("Retrieval failed: {0}")]
    Retrieval(String),
}
