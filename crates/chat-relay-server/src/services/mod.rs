pub mod conversation;
pub mod retention;
pub mod upstream;

pub use conversation::{ConversationOrchestrator, HistoryStore, InMemoryHistoryStore};
pub use retention::RetentionSweeper;
pub use upstream::{HttpTransport, RetryPolicy, UpstreamClient};
