//! Turn planning facade
//!
//! Combines budget calculation, retrieval sizing, pool assembly and the
//! fallback-wrapped allocator behind a single `plan_turn` call. Holds no state
//! across turns beyond the immutable constraints.

use super::budget::{BudgetCalculator, ContextBudget};
use super::fallback;
use super::models::{AllocationPlan, ContentPool, ContentPools, FallbackCause, PoolKind};
use super::report::ContextReport;
use super::sources::{ChunkFilter, ExampleSource, HistorySource, RetrievalSource};
use super::token_counter::{counter_from_config, ApproximateCounter, TokenCounter};
use crate::config::{AllocationConstraints, Config};
use crate::error::Result;
use crate::metrics::METRICS;
use std::sync::Arc;
use tracing::{debug, warn};

/// Context manager
pub struct ContextManager {
    constraints: AllocationConstraints,
    counter: Arc<dyn TokenCounter>,
    calculator: BudgetCalculator,
    chunk_filter: ChunkFilter,
}

impl ContextManager {
    /// Create a new context manager
    pub fn new(constraints: AllocationConstraints, counter: Arc<dyn TokenCounter>) -> Self {
        Self {
            calculator: BudgetCalculator::new(counter.clone()),
            constraints,
            counter,
            chunk_filter: ChunkFilter::default(),
        }
    }

    /// Create from validated configuration
    pub fn from_config(config: &Config) -> Result<Self> {
        config.validate()?;
        let counter = counter_from_config(&config.tokenizer);
        let chunk_filter = ChunkFilter::from_config(&config.retrieval)?;
        Ok(Self::new(config.allocation.clone(), counter).with_chunk_filter(chunk_filter))
    }

    /// Replace the retrieved-chunk filter
    pub fn with_chunk_filter(mut self, chunk_filter: ChunkFilter) -> Self {
        self.chunk_filter = chunk_filter;
        self
    }

    pub fn constraints(&self) -> &AllocationConstraints {
        &self.constraints
    }

    pub fn counter(&self) -> &dyn TokenCounter {
        self.counter.as_ref()
    }

    /// Budget for a system prompt in the given window.
    ///
    /// A zero window means the engine reported none; the configured default
    /// is used instead.
    pub fn calculate_budget(&self, context_window: usize, system_prompt: &str) -> ContextBudget {
        let window = if context_window == 0 {
            self.constraints.default_context_window
        } else {
            context_window
        };
        self.calculator.calculate(window, system_prompt, &self.constraints)
    }

    /// Number of chunks to request for a dynamic plan, proportional to budget
    pub fn initial_retrieval_k(&self, budget: &ContextBudget) -> usize {
        let c = &self.constraints;
        let share = budget.available_tokens as f64 * c.retrieval_share();
        let estimate = (share / c.estimated_chunk_tokens.max(1) as f64).floor() as usize;
        estimate
            .max(c.min_initial_retrieval)
            .min(c.max_initial_retrieval)
    }

    /// Plan this turn's content. Never fails; degraded paths return the
    /// static plan.
    pub fn plan_turn(
        &self,
        context_window: usize,
        system_prompt: &str,
        user_input: &str,
        history: &dyn HistorySource,
        examples: &dyn ExampleSource,
        retrieval: &dyn RetrievalSource,
    ) -> AllocationPlan {
        let budget = self.calculate_budget(context_window, system_prompt);

        let (turns, mut cause) = match history.turns() {
            Ok(turns) => {
                let cause = fallback::precheck(&budget, &self.constraints, turns.is_empty());
                (turns, cause)
            }
            Err(e) => {
                warn!(error = %e, "History unavailable");
                let cause = FallbackCause::AllocationFailed {
                    reason: e.to_string(),
                };
                (Vec::new(), Some(cause))
            }
        };

        let k = match cause {
            None => self.initial_retrieval_k(&budget),
            Some(_) => self.constraints.static_retrieved_chunks,
        };
        debug!(k, available = budget.available_tokens, "Requesting retrieved context");

        let chunks = match retrieval.retrieve(user_input, k) {
            Ok(chunks) => self.chunk_filter.filter(chunks),
            Err(e) => {
                warn!(error = %e, "Retrieval failed");
                if cause.is_none() {
                    cause = Some(FallbackCause::AllocationFailed {
                        reason: e.to_string(),
                    });
                }
                Vec::new()
            }
        };

        let example_blocks = examples.examples(user_input).unwrap_or_else(|e| {
            warn!(error = %e, "Examples unavailable");
            Vec::new()
        });

        let counter = self.counter.as_ref();
        let pools = ContentPools::new(
            ContentPool::measure(PoolKind::UserInput, [user_input], counter),
            ContentPool::measure(PoolKind::History, turns, counter),
            ContentPool::measure(PoolKind::Examples, example_blocks, counter),
            ContentPool::measure(
                PoolKind::RetrievedContext,
                chunks.into_iter().map(|c| c.text),
                counter,
            ),
        );

        let plan = match cause {
            Some(cause) => fallback::fallback_plan(&budget, &pools, &self.constraints, cause),
            None => fallback::allocate_or_fallback(&budget, &pools, &self.constraints),
        };

        METRICS.record_plan(&plan, &budget);
        if self.constraints.debug_report {
            debug!("{}", ContextReport::new(&budget, &plan));
        }

        plan
    }
}

impl Default for ContextManager {
    fn default() -> Self {
        Self::new(AllocationConstraints::default(), Arc::new(ApproximateCounter))
    }
}
