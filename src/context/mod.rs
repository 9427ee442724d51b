//! Context-window budgeting for character chat
//!
//! Each turn the system prompt and response reservation are subtracted from
//! the model's context window, and what remains is apportioned between user
//! input, conversation history, style examples and retrieved background text.

pub mod allocator;
pub mod budget;
pub mod fallback;
pub mod manager;
pub mod models;
pub mod report;
pub mod sources;
pub mod token_counter;

pub use allocator::allocate;
pub use budget::{BudgetCalculator, ContextBudget};
pub use manager::ContextManager;
pub use models::{
    AllocationPlan, ContentPool, ContentPools, ContentUnit, FallbackCause, HistoryTurn, PlanMode,
    PoolAllocation, PoolKind, RetrievedChunk,
};
pub use report::ContextReport;
pub use sources::{
    CardExamples, ChunkFilter, ConversationLog, ExampleSource, HistorySource, RetrievalSource,
};
pub use token_counter::{
    counter_from_config, ApproximateCounter, ExactCounter, TiktokenEncoder, TokenCounter,
    TokenEncoder,
};
