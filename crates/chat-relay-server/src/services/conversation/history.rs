use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::sync::Arc;
use tracing::{debug, info};

use crate::models::chat::{ConversationHistory, ConversationId, Turn};
use crate::utils::error::PersistenceError;

/// Rolling per-conversation history storage.
///
/// Implementations only move data: no network calls to the completion
/// endpoint and no knowledge of the relay pipeline. Callers serialize access
/// per conversation (see `ConversationLocks`).
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait HistoryStore: Send + Sync {
    /// Current window; empty if the conversation was never seen
    async fn load(&self, id: &ConversationId) -> Result<ConversationHistory, PersistenceError>;

    /// Append several turns as one unit: either all are stored or none are.
    /// Returns the new window truncated to the history limit.
    async fn append_all(
        &self,
        id: &ConversationId,
        turns: Vec<Turn>,
    ) -> Result<ConversationHistory, PersistenceError>;

    /// Append one turn and return the new window
    async fn append(
        &self,
        id: &ConversationId,
        turn: Turn,
    ) -> Result<ConversationHistory, PersistenceError> {
        self.append_all(id, vec![turn]).await
    }

    /// Delete every turn created before `cutoff`, returning how many went
    async fn delete_created_before(&self, cutoff: DateTime<Utc>) -> Result<u64, PersistenceError>;

    fn history_limit(&self) -> usize;
}

#[derive(Debug, Clone)]
struct StoredTurn {
    turn: Turn,
    created_at: DateTime<Utc>,
}

/// Thread-safe in-memory history store backed by DashMap
#[derive(Clone)]
pub struct InMemoryHistoryStore {
    /// conversation_id -> stored turns, oldest first, never longer than `limit`
    storage: Arc<DashMap<ConversationId, Vec<StoredTurn>>>,
    limit: usize,
}

impl InMemoryHistoryStore {
    pub fn new(limit: usize) -> Self {
        info!("Initializing in-memory history store (limit={})", limit);
        Self {
            storage: Arc::new(DashMap::new()),
            limit: limit.max(1),
        }
    }

    /// Number of conversations with at least one stored turn
    pub fn len(&self) -> usize {
        self.storage.len()
    }

    pub fn is_empty(&self) -> bool {
        self.storage.is_empty()
    }

    fn window(&self, stored: &[StoredTurn]) -> ConversationHistory {
        ConversationHistory::from_turns(stored.iter().map(|s| s.turn.clone()), self.limit)
    }
}

#[async_trait]
impl HistoryStore for InMemoryHistoryStore {
    async fn load(&self, id: &ConversationId) -> Result<ConversationHistory, PersistenceError> {
        let history = match self.storage.get(id) {
            Some(entry) => self.window(entry.value()),
            None => ConversationHistory::new(self.limit),
        };
        debug!("Loaded {} turns for conversation {}", history.len(), id);
        Ok(history)
    }

    async fn append_all(
        &self,
        id: &ConversationId,
        turns: Vec<Turn>,
    ) -> Result<ConversationHistory, PersistenceError> {
        let now = Utc::now();
        // The entry guard holds the shard lock, so the whole batch lands at once
        let mut entry = self.storage.entry(id.clone()).or_default();
        entry.extend(turns.into_iter().map(|turn| StoredTurn {
            turn,
            created_at: now,
        }));

        if entry.len() > self.limit {
            let overflow = entry.len() - self.limit;
            entry.drain(0..overflow);
            debug!("Dropped {} oldest turns for conversation {}", overflow, id);
        }

        Ok(self.window(entry.value()))
    }

    async fn delete_created_before(&self, cutoff: DateTime<Utc>) -> Result<u64, PersistenceError> {
        let mut deleted = 0u64;
        self.storage.retain(|_, turns| {
            let before = turns.len();
            turns.retain(|stored| stored.created_at >= cutoff);
            deleted += (before - turns.len()) as u64;
            !turns.is_empty()
        });

        if deleted > 0 {
            info!("Deleted {} turns created before {}", deleted, cutoff);
        }
        Ok(deleted)
    }

    fn history_limit(&self) -> usize {
        self.limit
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn id(raw: &str) -> ConversationId {
        ConversationId::parse(raw).unwrap()
    }

    #[tokio::test]
    async fn test_unseen_conversation_is_empty() {
        let store = InMemoryHistoryStore::new(5);
        let history = store.load(&id("nobody")).await.unwrap();
        assert!(history.is_empty());
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_append_truncates_from_front() {
        let store = InMemoryHistoryStore::new(4);
        let conv = id("c1");
        for i in 0..9 {
            let history = store.append(&conv, Turn::user(format!("m{}", i))).await.unwrap();
            assert!(history.len() <= 4);
        }

        let history = store.load(&conv).await.unwrap();
        let contents: Vec<_> = history.turns().iter().map(|t| t.content.clone()).collect();
        assert_eq!(contents, vec!["m5", "m6", "m7", "m8"]);
    }

    #[tokio::test]
    async fn test_append_all_keeps_pair_order() {
        let store = InMemoryHistoryStore::new(5);
        let conv = id("c1");
        let history = store
            .append_all(&conv, vec![Turn::user("hi"), Turn::assistant("hello")])
            .await
            .unwrap();
        assert_eq!(history.turns(), &[Turn::user("hi"), Turn::assistant("hello")]);
    }

    #[tokio::test]
    async fn test_conversations_are_independent() {
        let store = InMemoryHistoryStore::new(5);
        store.append(&id("a"), Turn::user("for a")).await.unwrap();
        store.append(&id("b"), Turn::user("for b")).await.unwrap();

        assert_eq!(store.load(&id("a")).await.unwrap().turns(), &[Turn::user("for a")]);
        assert_eq!(store.load(&id("b")).await.unwrap().turns(), &[Turn::user("for b")]);
        assert_eq!(store.len(), 2);
    }

    #[tokio::test]
    async fn test_delete_created_before() {
        let store = InMemoryHistoryStore::new(5);
        store.append(&id("old"), Turn::user("x")).await.unwrap();
        store.append(&id("old"), Turn::user("y")).await.unwrap();

        // Nothing is older than an hour ago
        let removed = store
            .delete_created_before(Utc::now() - Duration::hours(1))
            .await
            .unwrap();
        assert_eq!(removed, 0);

        let removed = store
            .delete_created_before(Utc::now() + Duration::seconds(1))
            .await
            .unwrap();
        assert_eq!(removed, 2);
        assert!(store.is_empty());
        assert!(store.load(&id("old")).await.unwrap().is_empty());
    }
}
