//! Human-readable allocation summary

use super::budget::ContextBudget;
use super::models::{AllocationPlan, PlanMode};
use std::fmt;

/// Budget and plan breakdown, rendered with `Display`
pub struct ContextReport<'a> {
    budget: &'a ContextBudget,
    plan: &'a AllocationPlan,
}

impl<'a> ContextReport<'a> {
    pub fn new(budget: &'a ContextBudget, plan: &'a AllocationPlan) -> Self {
        Self { budget, plan }
    }
}

impl fmt::Display for ContextReport<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let budget = self.budget;
        let plan = self.plan;

        writeln!(f, "Context Window: {} tokens", budget.context_window)?;
        writeln!(f, "  Response Buffer: {} tokens", budget.reserved_for_response)?;
        writeln!(f, "  System Prompt: {} tokens", budget.system_prompt_tokens)?;
        writeln!(f, "  Available: {} tokens", budget.available_tokens)?;
        match &plan.mode {
            PlanMode::Dynamic => writeln!(f, "Allocation (dynamic):")?,
            PlanMode::Static { cause } => writeln!(f, "Allocation (static, {}):", cause)?,
        }
        writeln!(f, "  Input: {} tokens", plan.user_input.tokens)?;
        writeln!(
            f,
            "  History: {} tokens ({} turns)",
            plan.history.tokens,
            plan.history.len()
        )?;
        writeln!(
            f,
            "  Examples: {} tokens ({} blocks)",
            plan.examples.tokens,
            plan.examples.len()
        )?;
        writeln!(
            f,
            "  Context: {} tokens ({} chunks)",
            plan.retrieved.tokens,
            plan.retrieved.len()
        )?;
        write!(f, "  Total: {} / {}", plan.total_used, plan.total_budget)
    }
}
