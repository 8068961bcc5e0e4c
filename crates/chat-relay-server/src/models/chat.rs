use serde::{Deserialize, Serialize};
use std::fmt;

use crate::utils::error::RelayError;

const MAX_CONVERSATION_ID_LEN: usize = 128;

// ===== DOMAIN MODELS =====

/// Speaker of a turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "user" => Some(Role::User),
            "assistant" => Some(Role::Assistant),
            _ => None,
        }
    }
}

/// One message exchanged in a conversation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub content: String,
}

impl Turn {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Correlation key that scopes a conversation history
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConversationId(String);

impl ConversationId {
    pub fn parse(raw: &str) -> Result<Self, RelayError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(RelayError::Validation(
                "conversation id must not be empty".to_string(),
            ));
        }
        if !trimmed.chars().all(|c| c.is_ascii_graphic()) {
            return Err(RelayError::Validation(
                "conversation id must be printable ASCII without spaces".to_string(),
            ));
        }
        if trimmed.len() > MAX_CONVERSATION_ID_LEN {
            return Err(RelayError::Validation(format!(
                "conversation id must be at most {} characters",
                MAX_CONVERSATION_ID_LEN
            )));
        }
        Ok(Self(trimmed.to_string()))
    }

    /// Fresh identity for callers that did not send one
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConversationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Rolling window of the most recent turns, oldest first.
///
/// Never holds more than `limit` turns: every push drops from the front
/// once the window is full.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct ConversationHistory {
    turns: Vec<Turn>,
    #[serde(skip)]
    limit: usize,
}

impl ConversationHistory {
    pub fn new(limit: usize) -> Self {
        let limit = limit.max(1);
        Self {
            turns: Vec::with_capacity(limit),
            limit,
        }
    }

    /// Build a window from stored turns, keeping only the newest `limit`
    pub fn from_turns(turns: impl IntoIterator<Item = Turn>, limit: usize) -> Self {
        let mut history = Self::new(limit);
        for turn in turns {
            history.push(turn);
        }
        history
    }

    pub fn push(&mut self, turn: Turn) {
        self.turns.push(turn);
        if self.turns.len() > self.limit {
            let overflow = self.turns.len() - self.limit;
            self.turns.drain(0..overflow);
        }
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn into_turns(self) -> Vec<Turn> {
        self.turns
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }
}

// ===== REQUEST MODELS =====

/// Fields accepted on `/chat`, from the JSON body or the query string
#[derive(Debug, Default, Deserialize)]
pub struct ChatParams {
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub conversation_id: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct HistoryParams {
    #[serde(default)]
    pub conversation_id: Option<String>,
}

// ===== RESPONSE MODELS =====

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OutcomeStatus {
    Success,
    Error,
}

/// Outward result of one chat exchange
#[derive(Debug, Serialize)]
pub struct ChatOutcome {
    pub status: OutcomeStatus,
    #[serde(rename = "messages", skip_serializing_if = "Option::is_none")]
    pub reply: Option<Turn>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl ChatOutcome {
    pub fn success(reply: Turn) -> Self {
        Self {
            status: OutcomeStatus::Success,
            reply: Some(reply),
            message: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: OutcomeStatus::Error,
            reply: None,
            message: Some(message.into()),
        }
    }
}

impl From<&Result<Turn, RelayError>> for ChatOutcome {
    fn from(result: &Result<Turn, RelayError>) -> Self {
        match result {
            Ok(reply) => Self::success(reply.clone()),
            Err(e) => Self::error(e.public_message()),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct HistoryResponse {
    pub status: OutcomeStatus,
    pub history: Vec<Turn>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_history_never_exceeds_limit() {
        for limit in 1..=6 {
            let mut history = ConversationHistory::new(limit);
            for i in 0..20 {
                history.push(Turn::user(format!("m{}", i)));
                assert!(history.len() <= limit);
            }
            // Newest kept, oldest dropped
            let first_kept = 20 - limit;
            assert_eq!(history.turns()[0].content, format!("m{}", first_kept));
            assert_eq!(history.turns().last().unwrap().content, "m19");
        }
    }

    #[test]
    fn test_from_turns_keeps_newest() {
        let turns = (0..7).map(|i| Turn::assistant(i.to_string()));
        let history = ConversationHistory::from_turns(turns, 3);
        let contents: Vec<_> = history.turns().iter().map(|t| t.content.as_str()).collect();
        assert_eq!(contents, vec!["4", "5", "6"]);
    }

    #[test]
    fn test_zero_limit_is_clamped() {
        let mut history = ConversationHistory::new(0);
        history.push(Turn::user("a"));
        history.push(Turn::user("b"));
        assert_eq!(history.limit(), 1);
        assert_eq!(history.turns(), &[Turn::user("b")]);
    }

    #[test]
    fn test_conversation_id_validation() {
        assert!(ConversationId::parse("   ").is_err());
        assert!(ConversationId::parse(&"x".repeat(129)).is_err());
        assert!(ConversationId::parse("has space").is_err());
        assert!(ConversationId::parse("é").is_err());
        assert_eq!(ConversationId::parse(" abc ").unwrap().as_str(), "abc");
    }

    #[test]
    fn test_outcome_shape() {
        let ok = serde_json::to_value(ChatOutcome::success(Turn::assistant("hi"))).unwrap();
        assert_eq!(
            ok,
            serde_json::json!({"status": "success", "messages": {"role": "assistant", "content": "hi"}})
        );

        let err = serde_json::to_value(ChatOutcome::error("boom")).unwrap();
        assert_eq!(err, serde_json::json!({"status": "error", "message": "boom"}));

        let failed: Result<Turn, RelayError> = Err(RelayError::Validation("The message field is required.".into()));
        let outcome = ChatOutcome::from(&failed);
        assert_eq!(outcome.status, OutcomeStatus::Error);
        assert_eq!(outcome.message.as_deref(), Some("The message field is required."));
    }

    #[test]
    fn test_history_serializes_as_array() {
        let history = ConversationHistory::from_turns([Turn::user("q"), Turn::assistant("a")], 5);
        let value = serde_json::to_value(&history).unwrap();
        assert_eq!(
            value,
            serde_json::json!([
                {"role": "user", "content": "q"},
                {"role": "assistant", "content": "a"}
            ])
        );
    }
}
