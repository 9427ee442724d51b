//! Token budgeting for retrieval-augmented character chat.
//!
//! The prompt sent to a local model must fit its context window. For every
//! turn, [`context::ContextManager::plan_turn`] measures the fixed costs,
//! decides how many tokens go to history, examples and retrieved text, and
//! falls back to a small static plan whenever dynamic allocation is unsafe.

pub mod config;
pub mod context;
pub mod error;
pub mod logging;
pub mod metrics;

pub use config::{AllocationConstraints, Config};
pub use context::{AllocationPlan, ContextBudget, ContextManager};
pub use error::{AllocationError, ContextError, Result};
