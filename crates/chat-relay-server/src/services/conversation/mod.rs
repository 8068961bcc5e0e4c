//! Conversation history and the relay pipeline
//!
//! - Per-conversation rolling history (DashMap or PostgreSQL)
//! - Per-conversation serialization of exchanges
//! - Orchestration of one exchange with atomic pair commit

mod history;
mod locks;
pub mod orchestrator;

pub use history::{HistoryStore, InMemoryHistoryStore};
pub use locks::{ConversationGuard, ConversationLocks};
pub use orchestrator::{ConversationOrchestrator, ExchangeStage};

#[cfg(test)]
pub use history::MockHistoryStore;
