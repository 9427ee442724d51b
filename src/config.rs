//! Configuration for context budgeting
//!
//! Every field carries a documented default, so a missing file, a missing
//! section or a missing key all resolve to the built-in values. Unknown keys
//! are rejected.

use crate::error::{ContextError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Environment variable prefix (`CONTEXT_BUDGET_ALLOCATION__HISTORY_RATIO=0.4`)
pub const ENV_PREFIX: &str = "CONTEXT_BUDGET";

/// Root configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub allocation: AllocationConstraints,

    #[serde(default)]
    pub tokenizer: TokenizerConfig,

    #[serde(default)]
    pub retrieval: RetrievalConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load from a TOML file, with environment overrides
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        Self::load(Some(path.as_ref()))
    }

    /// Load from an optional TOML file, `.env` and the process environment
    pub fn load(path: Option<&Path>) -> Result<Self> {
        // A missing .env is the common case
        let _ = dotenvy::dotenv();

        let mut builder = ::config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(
                ::config::File::from(path)
                    .format(::config::FileFormat::Toml)
                    .required(true),
            );
        }
        builder = builder.add_source(
            ::config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config: Config = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Parse from a TOML string (no environment overrides)
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Config = ::config::Config::builder()
            .add_source(::config::File::from_str(raw, ::config::FileFormat::Toml))
            .build()?
            .try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Validate every section
    pub fn validate(&self) -> Result<()> {
        self.allocation.validate()?;
        self.retrieval.validate()?;
        Ok(())
    }
}

/// Allocation constraints, loaded once per process and passed by reference
/// into every allocation call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AllocationConstraints {
    /// Dynamic allocation on/off. Off means every turn gets the static plan.
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Generation headroom subtracted before allocation
    #[serde(default = "default_reserved_for_response")]
    pub reserved_for_response: usize,

    #[serde(default = "default_min_history_turns")]
    pub min_history_turns: usize,

    #[serde(default = "default_max_history_turns")]
    pub max_history_turns: usize,

    /// Share of the post-input remainder targeted at history
    #[serde(default = "default_history_ratio")]
    pub history_ratio: f64,

    /// Share of the post-history remainder targeted at examples
    #[serde(default = "default_examples_ratio")]
    pub examples_ratio: f64,

    /// Below this many available tokens the static plan is used
    #[serde(default = "default_minimum_viable_budget")]
    pub minimum_viable_budget: usize,

    /// Average cost of one retrieved chunk, used to size the retrieval request
    #[serde(default = "default_estimated_chunk_tokens")]
    pub estimated_chunk_tokens: usize,

    #[serde(default = "default_min_initial_retrieval")]
    pub min_initial_retrieval: usize,

    /// Hard cap on chunks requested from retrieval
    #[serde(default = "default_max_initial_retrieval")]
    pub max_initial_retrieval: usize,

    #[serde(default = "default_static_retrieved_chunks")]
    pub static_retrieved_chunks: usize,

    #[serde(default = "default_static_history_turns")]
    pub static_history_turns: usize,

    /// Used when the inference engine reports no context window
    #[serde(default = "default_context_window")]
    pub default_context_window: usize,

    /// Log a per-turn allocation report at debug level
    #[serde(default)]
    pub debug_report: bool,
}

fn default_enabled() -> bool {
    true
}

fn default_reserved_for_response() -> usize {
    256
}

fn default_min_history_turns() -> usize {
    1
}

fn default_max_history_turns() -> usize {
    8
}

fn default_history_ratio() -> f64 {
    0.30
}

fn default_examples_ratio() -> f64 {
    0.25
}

fn default_minimum_viable_budget() -> usize {
    500
}

fn default_estimated_chunk_tokens() -> usize {
    150
}

fn default_min_initial_retrieval() -> usize {
    7
}

fn default_max_initial_retrieval() -> usize {
    20
}

fn default_static_retrieved_chunks() -> usize {
    2
}

fn default_static_history_turns() -> usize {
    3
}

fn default_context_window() -> usize {
    4096
}

impl Default for AllocationConstraints {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            reserved_for_response: default_reserved_for_response(),
            min_history_turns: default_min_history_turns(),
            max_history_turns: default_max_history_turns(),
            history_ratio: default_history_ratio(),
            examples_ratio: default_examples_ratio(),
            minimum_viable_budget: default_minimum_viable_budget(),
            estimated_chunk_tokens: default_estimated_chunk_tokens(),
            min_initial_retrieval: default_min_initial_retrieval(),
            max_initial_retrieval: default_max_initial_retrieval(),
            static_retrieved_chunks: default_static_retrieved_chunks(),
            static_history_turns: default_static_history_turns(),
            default_context_window: default_context_window(),
            debug_report: false,
        }
    }
}

impl AllocationConstraints {
    /// Validate that the constraints are consistent
    pub fn validate(&self) -> Result<()> {
        for (name, ratio) in [
            ("history", self.history_ratio),
            ("examples", self.examples_ratio),
        ] {
            if !(0.0..=1.0).contains(&ratio) {
                return Err(ContextError::Configuration(format!(
                    "{}_ratio must be within [0, 1], got {}",
                    name, ratio
                )));
            }
        }

        if self.history_ratio + self.examples_ratio > 1.0 {
            return Err(ContextError::Configuration(format!(
                "history_ratio + examples_ratio must not exceed 1, got {}",
                self.history_ratio + self.examples_ratio
            )));
        }

        if self.min_history_turns > self.max_history_turns {
            return Err(ContextError::Configuration(format!(
                "min_history_turns ({}) exceeds max_history_turns ({})",
                self.min_history_turns, self.max_history_turns
            )));
        }

        if self.estimated_chunk_tokens == 0 {
            return Err(ContextError::Configuration(
                "estimated_chunk_tokens must be positive".to_string(),
            ));
        }

        if self.max_initial_retrieval == 0 {
            return Err(ContextError::Configuration(
                "max_initial_retrieval must be positive".to_string(),
            ));
        }

        Ok(())
    }

    /// Expected share of the budget left to retrieved context
    pub fn retrieval_share(&self) -> f64 {
        (1.0 - self.history_ratio - self.examples_ratio).max(0.0)
    }
}

/// Token counter selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenizerKind {
    Approximate,
    Exact,
}

/// BPE vocabulary used by the exact counter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Encoding {
    Cl100kBase,
    P50kBase,
    R50kBase,
}

/// Tokenizer configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TokenizerConfig {
    #[serde(default = "default_tokenizer_kind")]
    pub kind: TokenizerKind,

    #[serde(default = "default_encoding")]
    pub encoding: Encoding,
}

fn default_tokenizer_kind() -> TokenizerKind {
    TokenizerKind::Approximate
}

fn default_encoding() -> Encoding {
    Encoding::Cl100kBase
}

impl Default for TokenizerConfig {
    fn default() -> Self {
        Self {
            kind: default_tokenizer_kind(),
            encoding: default_encoding(),
        }
    }
}

/// Retrieved chunk filtering
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RetrievalConfig {
    /// Drop exact duplicate chunks
    #[serde(default = "default_dedup")]
    pub dedup: bool,

    /// Case-insensitive regexes marking boilerplate chunks
    #[serde(default)]
    pub low_quality_patterns: Vec<String>,
}

fn default_dedup() -> bool {
    true
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            dedup: default_dedup(),
            low_quality_patterns: Vec::new(),
        }
    }
}

impl RetrievalConfig {
    pub fn validate(&self) -> Result<()> {
        for pattern in &self.low_quality_patterns {
            regex::Regex::new(pattern).map_err(|e| {
                ContextError::Configuration(format!(
                    "invalid low_quality_patterns entry {:?}: {}",
                    pattern, e
                ))
            })?;
        }
        Ok(())
    }
}

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Pretty,
    Json,
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoggingConfig {
    /// Default filter directive, overridden by `RUST_LOG`
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default = "default_log_format")]
    pub format: LogFormat,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> LogFormat {
    LogFormat::Pretty
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_constraints() {
        let constraints = AllocationConstraints::default();
        assert!(constraints.enabled);
        assert_eq!(constraints.reserved_for_response, 256);
        assert_eq!(constraints.min_history_turns, 1);
        assert_eq!(constraints.max_history_turns, 8);
        assert_eq!(constraints.minimum_viable_budget, 500);
        assert_eq!(constraints.estimated_chunk_tokens, 150);
        assert!(constraints.validate().is_ok());
    }

    #[test]
    fn test_retrieval_share() {
        let constraints = AllocationConstraints::default();
        assert!((constraints.retrieval_share() - 0.45).abs() < 1e-9);
    }

    #[test]
    fn test_rejects_ratio_out_of_range() {
        let constraints = AllocationConstraints {
            history_ratio: 1.5,
            ..Default::default()
        };
        assert!(constraints.validate().is_err());

        let constraints = AllocationConstraints {
            examples_ratio: f64::NAN,
            ..Default::default()
        };
        assert!(constraints.validate().is_err());
    }

    #[test]
    fn test_rejects_ratio_sum_above_one() {
        let constraints = AllocationConstraints {
            history_ratio: 0.6,
            examples_ratio: 0.5,
            ..Default::default()
        };
        assert!(constraints.validate().is_err());
    }

    #[test]
    fn test_rejects_inverted_history_bounds() {
        let constraints = AllocationConstraints {
            min_history_turns: 5,
            max_history_turns: 2,
            ..Default::default()
        };
        assert!(constraints.validate().is_err());
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config = Config::from_toml_str(
            r#"
            [allocation]
            reserved_for_response = 512
            history_ratio = 0.4

            [tokenizer]
            kind = "exact"
            "#,
        )
        .unwrap();

        assert_eq!(config.allocation.reserved_for_response, 512);
        assert_eq!(config.allocation.history_ratio, 0.4);
        assert_eq!(config.allocation.examples_ratio, 0.25);
        assert_eq!(config.tokenizer.kind, TokenizerKind::Exact);
        assert_eq!(config.tokenizer.encoding, Encoding::Cl100kBase);
        assert_eq!(config.logging, LoggingConfig::default());
    }

    #[test]
    fn test_unknown_key_rejected() {
        let result = Config::from_toml_str(
            r#"
            [allocation]
            reserved_tokens = 512
            "#,
        );
        assert!(matches!(result, Err(ContextError::Configuration(_))));
    }

    #[test]
    fn test_invalid_pattern_rejected() {
        let result = Config::from_toml_str(
            r#"
            [retrieval]
            low_quality_patterns = ["(unclosed"]
            "#,
        );
        assert!(result.is_err());
    }
}
