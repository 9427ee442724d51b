//! Static fallback policy
//!
//! Per turn: `PreCheck -> DynamicAllocation -> Success`, or
//! `DynamicAllocation -> AllocationError -> StaticFallback`, or
//! `PreCheckFailed -> StaticFallback`. Every path yields a plan.

use super::allocator::{allocate, select_prefix};
use super::budget::ContextBudget;
use super::models::{
    AllocationPlan, ContentPools, ContentUnit, FallbackCause, PlanMode, PoolAllocation,
};
use crate::config::AllocationConstraints;
use tracing::{debug, warn};

/// Reasons to skip dynamic allocation before attempting it
pub fn precheck(
    budget: &ContextBudget,
    constraints: &AllocationConstraints,
    is_first_turn: bool,
) -> Option<FallbackCause> {
    if !constraints.enabled {
        return Some(FallbackCause::Disabled);
    }
    if !budget.is_viable(constraints.minimum_viable_budget) {
        return Some(FallbackCause::LowBudget {
            available: budget.available_tokens,
            minimum: constraints.minimum_viable_budget,
        });
    }
    if is_first_turn {
        return Some(FallbackCause::FirstTurn);
    }
    None
}

/// Run the whole policy: pre-check, then dynamic allocation with recovery
pub fn plan(
    budget: &ContextBudget,
    pools: &ContentPools,
    constraints: &AllocationConstraints,
    is_first_turn: bool,
) -> AllocationPlan {
    match precheck(budget, constraints, is_first_turn) {
        Some(cause) => fallback_plan(budget, pools, constraints, cause),
        None => allocate_or_fallback(budget, pools, constraints),
    }
}

/// Dynamic allocation, recovering from `AllocationError` with the static plan
pub fn allocate_or_fallback(
    budget: &ContextBudget,
    pools: &ContentPools,
    constraints: &AllocationConstraints,
) -> AllocationPlan {
    match allocate(budget, pools, constraints) {
        Ok(plan) => plan,
        Err(e) => fallback_plan(
            budget,
            pools,
            constraints,
            FallbackCause::AllocationFailed {
                reason: e.to_string(),
            },
        ),
    }
}

/// Log the cause and build the static plan
pub fn fallback_plan(
    budget: &ContextBudget,
    pools: &ContentPools,
    constraints: &AllocationConstraints,
    cause: FallbackCause,
) -> AllocationPlan {
    if cause.is_degraded() {
        warn!(
            cause = cause.as_label(),
            available = budget.available_tokens,
            "Using static context plan: {}",
            cause
        );
    } else {
        debug!(cause = cause.as_label(), "Using static context plan");
    }
    static_plan(budget, pools, constraints, cause)
}

/// Fixed, non-adaptive plan.
///
/// Up to `static_history_turns` of the newest turns (none on the first turn),
/// every example when they all fit, then up to `static_retrieved_chunks`
/// top-ranked chunks. Each pool draws on what the previous one left of the
/// budget after user input, so the plan never exceeds it.
pub fn static_plan(
    budget: &ContextBudget,
    pools: &ContentPools,
    constraints: &AllocationConstraints,
    cause: FallbackCause,
) -> AllocationPlan {
    let mut user_input = PoolAllocation::default();
    for unit in pools.user_input.units.iter().filter(|u| u.is_measurable()) {
        user_input.push(unit);
    }
    let mut remaining = budget.available_tokens.saturating_sub(user_input.tokens);

    let mut history = PoolAllocation::default();
    if cause != FallbackCause::FirstTurn {
        let newest = take_fitting(
            pools.history.units.iter().rev(),
            constraints.static_history_turns,
            &mut remaining,
        );
        for unit in newest.into_iter().rev() {
            history.push(unit);
        }
    }

    let examples = if pools.examples.total_tokens() <= remaining {
        let examples = select_prefix(&pools.examples, remaining);
        remaining -= examples.tokens;
        examples
    } else {
        PoolAllocation::default()
    };

    let mut retrieved = PoolAllocation::default();
    for unit in take_fitting(
        pools.retrieved.units.iter(),
        constraints.static_retrieved_chunks,
        &mut remaining,
    ) {
        retrieved.push(unit);
    }

    let mut plan = AllocationPlan {
        mode: PlanMode::Static { cause },
        user_input,
        history,
        examples,
        retrieved,
        total_used: 0,
        total_budget: budget.available_tokens,
    };
    plan.recompute_total();
    plan
}

/// At most `limit` measurable units, stopping at the first that does not fit
fn take_fitting<'a>(
    units: impl Iterator<Item = &'a ContentUnit>,
    limit: usize,
    remaining: &mut usize,
) -> Vec<&'a ContentUnit> {
    let mut taken = Vec::new();
    for unit in units.filter(|u| u.is_measurable()).take(limit) {
        if unit.tokens > *remaining {
            break;
        }
        *remaining -= unit.tokens;
        taken.push(unit);
    }
    taken
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::models::{ContentPool, PoolKind};

    fn pool(kind: PoolKind, costs: &[usize]) -> ContentPool {
        ContentPool::new(
            kind,
            costs
                .iter()
                .enumerate()
                .map(|(i, &tokens)| ContentUnit {
                    text: format!("{}-{}", kind, i),
                    tokens,
                })
                .collect(),
        )
    }

    fn sample_pools() -> ContentPools {
        ContentPools::new(
            pool(PoolKind::UserInput, &[20]),
            pool(PoolKind::History, &[100, 100, 100, 100, 100]),
            pool(PoolKind::Examples, &[150, 150]),
            pool(PoolKind::RetrievedContext, &[150; 10]),
        )
    }

    #[test]
    fn test_precheck_order() {
        let constraints = AllocationConstraints::default();
        let ample = ContextBudget::from_parts(8192, 256, 500);
        let tiny = ContextBudget::from_parts(1024, 256, 500);

        assert_eq!(precheck(&ample, &constraints, false), None);
        assert_eq!(
            precheck(&ample, &constraints, true),
            Some(FallbackCause::FirstTurn)
        );
        assert_eq!(
            precheck(&tiny, &constraints, false),
            Some(FallbackCause::LowBudget {
                available: 268,
                minimum: 500
            })
        );
        // A cramped first turn reports the low budget
        assert_eq!(
            precheck(&tiny, &constraints, true),
            Some(FallbackCause::LowBudget {
                available: 268,
                minimum: 500
            })
        );

        let disabled = AllocationConstraints {
            enabled: false,
            ..Default::default()
        };
        assert_eq!(
            precheck(&ample, &disabled, false),
            Some(FallbackCause::Disabled)
        );
    }

    #[test]
    fn test_static_plan_contents() {
        let constraints = AllocationConstraints::default();
        let budget = ContextBudget::from_parts(4096, 256, 850);
        let plan = static_plan(
            &budget,
            &sample_pools(),
            &constraints,
            FallbackCause::Disabled,
        );

        assert!(plan.is_static());
        assert_eq!(plan.retrieved.len(), 2);
        assert_eq!(plan.history.units, vec!["history-2", "history-3", "history-4"]);
        assert_eq!(plan.examples.len(), 2);
        assert_eq!(plan.total_used, 20 + 300 + 300 + 300);
    }

    #[test]
    fn test_static_plan_first_turn_has_no_history() {
        let constraints = AllocationConstraints::default();
        let budget = ContextBudget::from_parts(4096, 256, 850);
        let plan = static_plan(
            &budget,
            &sample_pools(),
            &constraints,
            FallbackCause::FirstTurn,
        );
        assert!(plan.history.is_empty());
        assert_eq!(plan.examples.len(), 2);
    }

    #[test]
    fn test_static_plan_drops_examples_that_do_not_fit() {
        let constraints = AllocationConstraints::default();
        let budget = ContextBudget::from_parts(1000, 256, 500);
        let plan = static_plan(
            &budget,
            &sample_pools(),
            &constraints,
            FallbackCause::LowBudget {
                available: 244,
                minimum: 500,
            },
        );
        // 224 left after input: two turns fit, nothing else does
        assert_eq!(plan.history.units, vec!["history-3", "history-4"]);
        assert!(plan.examples.is_empty());
        assert!(plan.retrieved.is_empty());
        assert_eq!(plan.total_used, 220);
    }

    #[test]
    fn test_static_plan_fits_when_newest_turn_is_oversized() {
        let constraints = AllocationConstraints::default();
        // 600 available, 550 after input; the newest turn alone needs 600
        let budget = ContextBudget::from_parts(1356, 256, 500);
        let pools = ContentPools::new(
            pool(PoolKind::UserInput, &[50]),
            pool(PoolKind::History, &[600; 4]),
            pool(PoolKind::Examples, &[]),
            pool(PoolKind::RetrievedContext, &[150; 10]),
        );

        let plan = plan(&budget, &pools, &constraints, false);

        assert!(matches!(
            plan.fallback_cause(),
            Some(FallbackCause::AllocationFailed { .. })
        ));
        assert!(plan.history.is_empty());
        assert_eq!(plan.retrieved.len(), 2);
        assert_eq!(plan.total_used, 350);
        assert!(plan.total_used <= budget.available_tokens);
    }

    #[test]
    fn test_low_budget_ignores_pool_contents() {
        let constraints = AllocationConstraints::default();
        let budget = ContextBudget::from_parts(900, 256, 300);

        let with_content = plan(&budget, &sample_pools(), &constraints, false);
        let empty = ContentPools::new(
            ContentPool::empty(PoolKind::UserInput),
            ContentPool::empty(PoolKind::History),
            ContentPool::empty(PoolKind::Examples),
            ContentPool::empty(PoolKind::RetrievedContext),
        );
        let without_content = plan(&budget, &empty, &constraints, false);

        assert_eq!(with_content.mode, without_content.mode);
        assert!(matches!(
            with_content.fallback_cause(),
            Some(FallbackCause::LowBudget { .. })
        ));
    }

    #[test]
    fn test_allocation_error_recovers_with_static_plan() {
        let constraints = AllocationConstraints {
            min_history_turns: 5,
            ..Default::default()
        };
        // 500 available, 480 after input; five floor turns need 500
        let budget = ContextBudget::from_parts(800, 100, 200);
        let plan = plan(&budget, &sample_pools(), &constraints, false);

        match plan.fallback_cause() {
            Some(FallbackCause::AllocationFailed { reason }) => {
                assert!(reason.contains("History floor unsatisfiable"));
            }
            other => panic!("expected allocation failure, got {:?}", other),
        }
        assert_eq!(plan.history.len(), 3);
    }

    #[test]
    fn test_dynamic_plan_when_checks_pass() {
        let constraints = AllocationConstraints::default();
        let budget = ContextBudget::from_parts(4096, 256, 850);
        let plan = plan(&budget, &sample_pools(), &constraints, false);
        assert_eq!(plan.mode, PlanMode::Dynamic);
    }
}
