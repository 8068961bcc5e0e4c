pub mod chat;

pub use chat::{ConversationHistory, ConversationId, Role, Turn};
