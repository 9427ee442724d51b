//! Token counting: a conservative character heuristic and an exact
//! tokenizer-backed counter that falls back to the heuristic on failure.

use crate::config::{Encoding, TokenizerConfig, TokenizerKind};
use crate::error::EncodeError;
use crate::metrics::METRICS;
use once_cell::sync::OnceCell;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use tiktoken_rs::CoreBPE;
use tracing::{debug, warn};

/// Token counter trait shared by the approximate and exact strategies
pub trait TokenCounter: Send + Sync {
    /// Count the tokens in the given text. Never fails.
    fn count(&self, text: &str) -> usize;

    /// Short label for diagnostics
    fn name(&self) -> &str;

    /// Count tokens for multiple texts
    fn count_batch(&self, texts: &[&str]) -> Vec<usize> {
        texts.iter().map(|t| self.count(t)).collect()
    }
}

/// Character-based estimator, biased toward overestimating.
///
/// Roughly one token per four bytes, plus a surcharge for line breaks and
/// common chat-template markers.
#[derive(Debug, Clone, Copy, Default)]
pub struct ApproximateCounter;

impl ApproximateCounter {
    pub fn new() -> Self {
        Self
    }

    /// The heuristic itself, usable without an instance
    pub fn estimate(text: &str) -> usize {
        if text.is_empty() {
            return 0;
        }

        let base = text.len().div_ceil(4);
        let newlines = text.matches('\n').count() / 2;
        let markers = text.matches("<|").count()
            + text.matches("[INST]").count() * 2
            + text.matches("<s>").count();

        (base + newlines + markers).max(1)
    }
}

impl TokenCounter for ApproximateCounter {
    fn count(&self, text: &str) -> usize {
        Self::estimate(text)
    }

    fn name(&self) -> &str {
        "approximate"
    }
}

/// A real tokenizer's encode operation
pub trait TokenEncoder: Send + Sync {
    fn encode(&self, text: &str) -> Result<Vec<usize>, EncodeError>;
}

type EncoderLoader = Box<dyn Fn() -> Result<Box<dyn TokenEncoder>, EncodeError> + Send + Sync>;

/// Exact counter backed by a lazily loaded tokenizer.
///
/// The tokenizer is loaded at most once per counter, on first use. A failed
/// load is remembered and every later call uses the approximate estimate. A
/// failed encode falls back for that call only.
pub struct ExactCounter {
    label: String,
    loader: EncoderLoader,
    encoder: OnceCell<Option<Box<dyn TokenEncoder>>>,
}

impl ExactCounter {
    /// Create with a custom encoder loader
    pub fn with_loader<F>(label: impl Into<String>, loader: F) -> Self
    where
        F: Fn() -> Result<Box<dyn TokenEncoder>, EncodeError> + Send + Sync + 'static,
    {
        Self {
            label: label.into(),
            loader: Box::new(loader),
            encoder: OnceCell::new(),
        }
    }

    /// Create a tiktoken-backed counter for the given vocabulary
    pub fn tiktoken(encoding: Encoding) -> Self {
        Self::with_loader(format!("tiktoken:{:?}", encoding), move || {
            TiktokenEncoder::load(encoding).map(|e| Box::new(e) as Box<dyn TokenEncoder>)
        })
    }

    /// Whether the tokenizer loaded successfully (forces the load)
    pub fn is_available(&self) -> bool {
        self.encoder().is_some()
    }

    fn encoder(&self) -> Option<&dyn TokenEncoder> {
        self.encoder
            .get_or_init(|| match (self.loader)() {
                Ok(encoder) => {
                    debug!(tokenizer = %self.label, "Exact tokenizer loaded");
                    Some(encoder)
                }
                Err(e) => {
                    warn!(
                        tokenizer = %self.label,
                        error = %e,
                        "Exact tokenizer unavailable, using approximate counts"
                    );
                    None
                }
            })
            .as_deref()
    }
}

impl TokenCounter for ExactCounter {
    fn count(&self, text: &str) -> usize {
        if text.is_empty() {
            return 0;
        }

        let Some(encoder) = self.encoder() else {
            return ApproximateCounter::estimate(text);
        };

        match encoder.encode(text) {
            Ok(ids) => ids.len(),
            Err(e) => {
                warn!(
                    tokenizer = %self.label,
                    error = %e,
                    "Failed to count tokens with exact tokenizer, falling back"
                );
                METRICS.record_tokenizer_fallback();
                ApproximateCounter::estimate(text)
            }
        }
    }

    fn name(&self) -> &str {
        &self.label
    }
}

/// tiktoken BPE encoder
pub struct TiktokenEncoder {
    bpe: CoreBPE,
}

impl TiktokenEncoder {
    pub fn load(encoding: Encoding) -> Result<Self, EncodeError> {
        let bpe = match encoding {
            Encoding::Cl100kBase => tiktoken_rs::cl100k_base(),
            Encoding::P50kBase => tiktoken_rs::p50k_base(),
            Encoding::R50kBase => tiktoken_rs::r50k_base(),
        }
        .map_err(|e| EncodeError::Unavailable(e.to_string()))?;

        Ok(Self { bpe })
    }
}

impl TokenEncoder for TiktokenEncoder {
    fn encode(&self, text: &str) -> Result<Vec<usize>, EncodeError> {
        panic::catch_unwind(AssertUnwindSafe(|| self.bpe.encode_with_special_tokens(text)))
            .map_err(|_| EncodeError::Failed("tokenizer panicked during encode".to_string()))
    }
}

/// Build the configured counter
pub fn counter_from_config(config: &TokenizerConfig) -> Arc<dyn TokenCounter> {
    match config.kind {
        TokenizerKind::Approximate => Arc::new(ApproximateCounter),
        TokenizerKind::Exact => Arc::new(ExactCounter::tiktoken(config.encoding)),
    }
}
