//! Per-turn token budget
//!
//! The response reservation and the system prompt are subtracted from the
//! context window before anything else, so dynamic content never competes
//! with them.

use super::token_counter::TokenCounter;
use crate::config::AllocationConstraints;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::warn;

/// Read-only budget snapshot for one turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextBudget {
    pub context_window: usize,
    pub reserved_for_response: usize,
    pub system_prompt_tokens: usize,
    pub available_tokens: usize,
}

impl ContextBudget {
    /// Build from already-measured parts, clamping at zero
    pub fn from_parts(
        context_window: usize,
        reserved_for_response: usize,
        system_prompt_tokens: usize,
    ) -> Self {
        let available_tokens = context_window
            .saturating_sub(reserved_for_response)
            .saturating_sub(system_prompt_tokens);

        Self {
            context_window,
            reserved_for_response,
            system_prompt_tokens,
            available_tokens,
        }
    }

    /// Fixed costs already exceed the window
    pub fn is_exhausted(&self) -> bool {
        self.available_tokens == 0
    }

    /// Whether dynamic allocation is worth attempting
    pub fn is_viable(&self, minimum_viable_budget: usize) -> bool {
        self.available_tokens >= minimum_viable_budget
    }
}

/// Measures the system prompt and derives the budget
#[derive(Clone)]
pub struct BudgetCalculator {
    counter: Arc<dyn TokenCounter>,
}

impl BudgetCalculator {
    pub fn new(counter: Arc<dyn TokenCounter>) -> Self {
        Self { counter }
    }

    pub fn calculate(
        &self,
        context_window: usize,
        system_prompt: &str,
        constraints: &AllocationConstraints,
    ) -> ContextBudget {
        let system_prompt_tokens = self.counter.count(system_prompt);
        let budget = ContextBudget::from_parts(
            context_window,
            constraints.reserved_for_response,
            system_prompt_tokens,
        );

        if system_prompt_tokens + constraints.reserved_for_response > context_window {
            warn!(
                system_prompt_tokens,
                reserved_for_response = constraints.reserved_for_response,
                context_window,
                "System prompt plus response buffer exceeds context window"
            );
        }

        budget
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::token_counter::ApproximateCounter;

    fn calculator() -> BudgetCalculator {
        BudgetCalculator::new(Arc::new(ApproximateCounter))
    }

    #[test]
    fn test_budget_from_parts() {
        let budget = ContextBudget::from_parts(4096, 256, 850);
        assert_eq!(budget.available_tokens, 2990);
        assert!(!budget.is_exhausted());
        assert!(budget.is_viable(500));
    }

    #[test]
    fn test_budget_clamps_at_zero() {
        let budget = ContextBudget::from_parts(512, 256, 850);
        assert_eq!(budget.available_tokens, 0);
        assert!(budget.is_exhausted());
        assert!(!budget.is_viable(500));
    }

    #[test]
    fn test_calculate_measures_system_prompt() {
        let constraints = AllocationConstraints::default();
        // 3400 bytes -> 850 tokens
        let system_prompt = "x".repeat(3400);

        let budget = calculator().calculate(4096, &system_prompt, &constraints);
        assert_eq!(budget.system_prompt_tokens, 850);
        assert_eq!(budget.reserved_for_response, 256);
        assert_eq!(budget.available_tokens, 2990);
    }

    #[test]
    fn test_calculate_is_non_negative() {
        let constraints = AllocationConstraints::default();
        let system_prompt = "x".repeat(3400);

        for window in [0, 1, 255, 256, 1000, 1106, 1107, 16384] {
            let budget = calculator().calculate(window, &system_prompt, &constraints);
            assert!(budget.available_tokens <= window);
        }
        let budget = calculator().calculate(512, &system_prompt, &constraints);
        assert_eq!(budget.available_tokens, 0);
    }

    #[test]
    fn test_larger_window_never_shrinks_budget() {
        let constraints = AllocationConstraints::default();
        let system_prompt = "You are Mara, keeper of the northern light.";

        let mut previous = 0;
        for window in (0..20_000).step_by(512) {
            let budget = calculator().calculate(window, system_prompt, &constraints);
            assert!(budget.available_tokens >= previous);
            previous = budget.available_tokens;
        }
    }
}
