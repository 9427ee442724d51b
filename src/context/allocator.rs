//! Dynamic content allocation
//!
//! Pools are served in strict priority order from a shrinking remainder:
//!
//! 1. User input, always in full
//! 2. History, newest turns first, up to `history_ratio` of the remainder
//! 3. Examples, in priority order, up to `examples_ratio` of what is left
//! 4. Retrieved context, in rank order, from everything that remains
//!
//! Units are never split. A pool stops at the first unit that does not fit.

use super::budget::ContextBudget;
use super::models::{
    AllocationPlan, ContentPool, ContentPools, ContentUnit, PlanMode, PoolAllocation, PoolKind,
};
use crate::config::AllocationConstraints;
use crate::error::AllocationError;
use crate::metrics::METRICS;
use tracing::{debug, warn};

/// Allocate the budget across the four pools.
///
/// Pure: identical inputs always produce an identical plan.
pub fn allocate(
    budget: &ContextBudget,
    pools: &ContentPools,
    constraints: &AllocationConstraints,
) -> Result<AllocationPlan, AllocationError> {
    check_kind(&pools.user_input, PoolKind::UserInput)?;
    check_kind(&pools.history, PoolKind::History)?;
    check_kind(&pools.examples, PoolKind::Examples)?;
    check_kind(&pools.retrieved, PoolKind::RetrievedContext)?;
    let history_ratio = check_ratio("history", constraints.history_ratio)?;
    let examples_ratio = check_ratio("examples", constraints.examples_ratio)?;

    let user_input = select_all(&pools.user_input);
    let ceiling = budget.available_tokens.saturating_sub(user_input.tokens);
    let mut remaining = ceiling;

    let history_target = ratio_share(remaining, history_ratio);
    let history = select_history(&pools.history, history_target, remaining, constraints)?;
    remaining -= history.tokens;

    let examples_target = ratio_share(remaining, examples_ratio);
    let examples = select_prefix(&pools.examples, examples_target);
    remaining -= examples.tokens;

    let retrieved = select_prefix(&pools.retrieved, remaining);

    let mut plan = AllocationPlan {
        mode: PlanMode::Dynamic,
        user_input,
        history,
        examples,
        retrieved,
        total_used: 0,
        total_budget: budget.available_tokens,
    };
    plan.recompute_total();

    if plan.dynamic_tokens() > ceiling {
        return Err(AllocationError::PlanOverflow {
            used: plan.dynamic_tokens(),
            ceiling,
        });
    }

    debug!(
        input = plan.user_input.tokens,
        history = plan.history.tokens,
        history_turns = plan.history.len(),
        examples = plan.examples.tokens,
        chunks = plan.retrieved.len(),
        context = plan.retrieved.tokens,
        total = plan.total_used,
        available = budget.available_tokens,
        "Context allocation"
    );

    Ok(plan)
}

/// `floor(remaining * ratio)`, never above `remaining`
pub(crate) fn ratio_share(remaining: usize, ratio: f64) -> usize {
    // Ratios are decimal literals; absorb their binary representation error
    let share = (remaining as f64 * ratio + 1e-9).floor() as usize;
    share.min(remaining)
}

fn check_kind(pool: &ContentPool, expected: PoolKind) -> Result<(), AllocationError> {
    if pool.kind != expected {
        return Err(AllocationError::PoolKindMismatch {
            expected,
            found: pool.kind,
        });
    }
    Ok(())
}

fn check_ratio(name: &'static str, value: f64) -> Result<f64, AllocationError> {
    if !(0.0..=1.0).contains(&value) {
        return Err(AllocationError::InvalidRatio { name, value });
    }
    Ok(value)
}

fn skip_unmeasurable(kind: PoolKind, index: usize, unit: &ContentUnit) -> bool {
    if unit.is_measurable() {
        return false;
    }
    warn!(pool = %kind, index, "Skipping unmeasurable content unit");
    METRICS.record_skipped_unit(kind);
    true
}

fn select_all(pool: &ContentPool) -> PoolAllocation {
    let mut selected = PoolAllocation::default();
    for (index, unit) in pool.units.iter().enumerate() {
        if !skip_unmeasurable(pool.kind, index, unit) {
            selected.push(unit);
        }
    }
    selected
}

/// Take units in order while they fit within `limit`
pub(crate) fn select_prefix(pool: &ContentPool, limit: usize) -> PoolAllocation {
    let mut selected = PoolAllocation::default();
    for (index, unit) in pool.units.iter().enumerate() {
        if skip_unmeasurable(pool.kind, index, unit) {
            continue;
        }
        if selected.tokens + unit.tokens > limit {
            break;
        }
        selected.push(unit);
    }
    selected
}

/// Walk back from the newest turn.
///
/// The first `min_history_turns` turns are taken even past `target`, as long
/// as they fit in `remaining`. Output is oldest-first.
fn select_history(
    pool: &ContentPool,
    target: usize,
    remaining: usize,
    constraints: &AllocationConstraints,
) -> Result<PoolAllocation, AllocationError> {
    let mut picked: Vec<&ContentUnit> = Vec::new();
    let mut used = 0;

    for (index, unit) in pool.units.iter().enumerate().rev() {
        if skip_unmeasurable(pool.kind, index, unit) {
            continue;
        }
        if picked.len() >= constraints.max_history_turns {
            break;
        }

        let needed = used + unit.tokens;
        if picked.len() < constraints.min_history_turns {
            if needed > remaining {
                return Err(AllocationError::HistoryFloorUnsatisfiable {
                    needed,
                    available: remaining,
                });
            }
        } else if needed > target {
            break;
        }

        picked.push(unit);
        used = needed;
    }

    let mut selected = PoolAllocation::default();
    for unit in picked.into_iter().rev() {
        selected.push(unit);
    }
    Ok(selected)
}
