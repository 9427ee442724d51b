//! Data models for context allocation

use super::token_counter::TokenCounter;
use serde::{Deserialize, Serialize};
use std::fmt;

/// The four competing kinds of dynamic content
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PoolKind {
    UserInput,
    History,
    Examples,
    RetrievedContext,
}

impl PoolKind {
    /// All kinds in allocation priority order
    pub const ALL: [PoolKind; 4] = [
        PoolKind::UserInput,
        PoolKind::History,
        PoolKind::Examples,
        PoolKind::RetrievedContext,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PoolKind::UserInput => "user_input",
            PoolKind::History => "history",
            PoolKind::Examples => "examples",
            PoolKind::RetrievedContext => "retrieved_context",
        }
    }
}

impl fmt::Display for PoolKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One atomic, never-split unit of content with its measured cost
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentUnit {
    pub text: String,
    pub tokens: usize,
}

impl ContentUnit {
    pub fn measure(text: impl Into<String>, counter: &dyn TokenCounter) -> Self {
        let text = text.into();
        let tokens = counter.count(&text);
        Self { text, tokens }
    }

    /// Blank units carry no content and cannot be meaningfully measured
    pub fn is_measurable(&self) -> bool {
        !self.text.trim().is_empty()
    }
}

/// An ordered sequence of units of one kind.
///
/// History units are oldest first, examples are in priority order, and
/// retrieved chunks are in rank order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentPool {
    pub kind: PoolKind,
    pub units: Vec<ContentUnit>,
}

impl ContentPool {
    pub fn new(kind: PoolKind, units: Vec<ContentUnit>) -> Self {
        Self { kind, units }
    }

    pub fn empty(kind: PoolKind) -> Self {
        Self::new(kind, Vec::new())
    }

    /// Measure each text with the given counter
    pub fn measure<I, S>(kind: PoolKind, texts: I, counter: &dyn TokenCounter) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let units = texts
            .into_iter()
            .map(|t| ContentUnit::measure(t, counter))
            .collect();
        Self::new(kind, units)
    }

    /// Cost if every measurable unit were included
    pub fn total_tokens(&self) -> usize {
        self.units
            .iter()
            .filter(|u| u.is_measurable())
            .map(|u| u.tokens)
            .sum()
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }
}

/// The four pools handed to the allocator for one turn
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentPools {
    pub user_input: ContentPool,
    pub history: ContentPool,
    pub examples: ContentPool,
    pub retrieved: ContentPool,
}

impl ContentPools {
    pub fn new(
        user_input: ContentPool,
        history: ContentPool,
        examples: ContentPool,
        retrieved: ContentPool,
    ) -> Self {
        Self {
            user_input,
            history,
            examples,
            retrieved,
        }
    }
}

/// One user message and the character's reply
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryTurn {
    pub user: String,
    pub reply: String,
}

impl HistoryTurn {
    pub fn new(user: impl Into<String>, reply: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            reply: reply.into(),
        }
    }

    /// Render as transcript lines
    pub fn render(&self, character_name: &str) -> String {
        format!("User: {}\n{}: {}\n", self.user, character_name, self.reply)
    }
}

/// A ranked chunk returned by retrieval
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievedChunk {
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score: Option<f32>,
}

impl RetrievedChunk {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            score: None,
        }
    }

    pub fn with_score(mut self, score: f32) -> Self {
        self.score = Some(score);
        self
    }
}

/// Units selected from one pool
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolAllocation {
    pub units: Vec<String>,
    pub tokens: usize,
}

impl PoolAllocation {
    pub fn push(&mut self, unit: &ContentUnit) {
        self.units.push(unit.text.clone());
        self.tokens += unit.tokens;
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    /// Concatenate the selected units with the given separator
    pub fn joined(&self, separator: &str) -> String {
        self.units.join(separator)
    }
}

/// Why the static plan was used
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "cause", rename_all = "snake_case")]
pub enum FallbackCause {
    /// Dynamic allocation switched off
    Disabled,
    /// Opening exchange of the conversation
    FirstTurn,
    LowBudget { available: usize, minimum: usize },
    AllocationFailed { reason: String },
}

impl FallbackCause {
    /// Metric label
    pub fn as_label(&self) -> &'static str {
        match self {
            FallbackCause::Disabled => "disabled",
            FallbackCause::FirstTurn => "first_turn",
            FallbackCause::LowBudget { .. } => "low_budget",
            FallbackCause::AllocationFailed { .. } => "allocation_failed",
        }
    }

    /// Low budget and allocation failures are abnormal; the rest are policy
    pub fn is_degraded(&self) -> bool {
        matches!(
            self,
            FallbackCause::LowBudget { .. } | FallbackCause::AllocationFailed { .. }
        )
    }
}

impl fmt::Display for FallbackCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FallbackCause::Disabled => write!(f, "dynamic allocation disabled"),
            FallbackCause::FirstTurn => write!(f, "first turn"),
            FallbackCause::LowBudget { available, minimum } => write!(
                f,
                "available budget ({} tokens) below minimum ({} tokens)",
                available, minimum
            ),
            FallbackCause::AllocationFailed { reason } => {
                write!(f, "allocation failed: {}", reason)
            }
        }
    }
}

/// How a plan was produced
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum PlanMode {
    Dynamic,
    Static { cause: FallbackCause },
}

/// Per-turn content plan consumed by prompt assembly
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocationPlan {
    pub mode: PlanMode,
    pub user_input: PoolAllocation,
    pub history: PoolAllocation,
    pub examples: PoolAllocation,
    pub retrieved: PoolAllocation,
    pub total_used: usize,
    pub total_budget: usize,
}

impl AllocationPlan {
    pub fn pool(&self, kind: PoolKind) -> &PoolAllocation {
        match kind {
            PoolKind::UserInput => &self.user_input,
            PoolKind::History => &self.history,
            PoolKind::Examples => &self.examples,
            PoolKind::RetrievedContext => &self.retrieved,
        }
    }

    pub fn is_static(&self) -> bool {
        matches!(self.mode, PlanMode::Static { .. })
    }

    pub fn fallback_cause(&self) -> Option<&FallbackCause> {
        match &self.mode {
            PlanMode::Static { cause } => Some(cause),
            PlanMode::Dynamic => None,
        }
    }

    /// Tokens spent on everything except user input
    pub fn dynamic_tokens(&self) -> usize {
        self.history.tokens + self.examples.tokens + self.retrieved.tokens
    }

    pub(crate) fn recompute_total(&mut self) {
        self.total_used = self.user_input.tokens + self.dynamic_tokens();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::token_counter::ApproximateCounter;

    #[test]
    fn test_pool_measure_and_total() {
        let pool = ContentPool::measure(
            PoolKind::Examples,
            vec!["a".repeat(40), "   ".to_string(), "b".repeat(8)],
            &ApproximateCounter,
        );
        assert_eq!(pool.len(), 3);
        // The blank unit is not counted
        assert_eq!(pool.total_tokens(), 12);
        assert!(!pool.units[1].is_measurable());
    }

    #[test]
    fn test_history_turn_render() {
        let turn = HistoryTurn::new("Hello?", "Who goes there?");
        assert_eq!(turn.render("Mara"), "User: Hello?\nMara: Who goes there?\n");
    }

    #[test]
    fn test_fallback_cause_labels() {
        assert_eq!(FallbackCause::FirstTurn.as_label(), "first_turn");
        assert!(!FallbackCause::Disabled.is_degraded());
        assert!(FallbackCause::LowBudget {
            available: 10,
            minimum: 500
        }
        .is_degraded());
    }

    #[test]
    fn test_plan_serializes_mode() {
        let plan = AllocationPlan {
            mode: PlanMode::Static {
                cause: FallbackCause::FirstTurn,
            },
            user_input: PoolAllocation::default(),
            history: PoolAllocation::default(),
            examples: PoolAllocation::default(),
            retrieved: PoolAllocation::default(),
            total_used: 0,
            total_budget: 100,
        };
        let json = serde_json::to_value(&plan).unwrap();
        assert_eq!(json["mode"]["mode"], "static");
        assert_eq!(json["mode"]["cause"]["cause"], "first_turn");
    }
}
