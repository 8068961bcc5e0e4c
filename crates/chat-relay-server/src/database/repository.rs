use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::FromRow;
use tracing::debug;

use super::DbPool;
use crate::models::chat::{ConversationHistory, ConversationId, Role, Turn};
use crate::services::conversation::HistoryStore;
use crate::utils::error::PersistenceError;

#[derive(Debug, Clone, FromRow)]
struct TurnRow {
    role: String,
    content: String,
}

impl TurnRow {
    fn into_turn(self) -> Result<Turn, PersistenceError> {
        let role = Role::parse(&self.role)
            .ok_or_else(|| PersistenceError::CorruptRecord(format!("unknown role '{}'", self.role)))?;
        Ok(Turn {
            role,
            content: self.content,
        })
    }
}

/// History store over the `conversation_turns` table
pub struct PgHistoryStore {
    pool: DbPool,
    limit: usize,
}

impl PgHistoryStore {
    pub fn new(pool: DbPool, limit: usize) -> Self {
        Self {
            pool,
            limit: limit.max(1),
        }
    }

    pub async fn ensure_schema(&self) -> Result<(), PersistenceError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS conversation_turns (
                id BIGSERIAL PRIMARY KEY,
                conversation_id TEXT NOT NULL,
                role TEXT NOT NULL,
                content TEXT NOT NULL,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
            "#,
        )
        .execute(self.pool.get_pool())
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_conversation_turns_conv \
             ON conversation_turns (conversation_id, id)",
        )
        .execute(self.pool.get_pool())
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_conversation_turns_created \
             ON conversation_turns (created_at)",
        )
        .execute(self.pool.get_pool())
        .await?;

        Ok(())
    }

    async fn fetch_window<'e, E>(&self, executor: E, id: &ConversationId) -> Result<ConversationHistory, PersistenceError>
    where
        E: sqlx::PgExecutor<'e>,
    {
        // Newest N, then flipped back to chronological order
        let mut rows = sqlx::query_as::<_, TurnRow>(
            r#"SELECT role, content
               FROM conversation_turns
               WHERE conversation_id = $1
               ORDER BY id DESC
               LIMIT $2"#,
        )
        .bind(id.as_str())
        .bind(self.limit as i64)
        .fetch_all(executor)
        .await?;
        rows.reverse();

        let turns = rows
            .into_iter()
            .map(TurnRow::into_turn)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(ConversationHistory::from_turns(turns, self.limit))
    }
}

#[async_trait]
impl HistoryStore for PgHistoryStore {
    async fn load(&self, id: &ConversationId) -> Result<ConversationHistory, PersistenceError> {
        self.fetch_window(self.pool.get_pool(), id).await
    }

    async fn append_all(
        &self,
        id: &ConversationId,
        turns: Vec<Turn>,
    ) -> Result<ConversationHistory, PersistenceError> {
        let mut tx = self.pool.get_pool().begin().await?;
        let now = Utc::now();

        for turn in &turns {
            sqlx::query(
                "INSERT INTO conversation_turns (conversation_id, role, content, created_at) \
                 VALUES ($1, $2, $3, $4)",
            )
            .bind(id.as_str())
            .bind(turn.role.as_str())
            .bind(&turn.content)
            .bind(now)
            .execute(&mut *tx)
            .await?;
        }

        // Rows outside the window are never read again
        let pruned = sqlx::query(
            r#"DELETE FROM conversation_turns
               WHERE conversation_id = $1
                 AND id NOT IN (
                     SELECT id FROM conversation_turns
                     WHERE conversation_id = $1
                     ORDER BY id DESC
                     LIMIT $2
                 )"#,
        )
        .bind(id.as_str())
        .bind(self.limit as i64)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        let history = self.fetch_window(&mut *tx, id).await?;
        tx.commit().await?;

        debug!(
            "Committed {} turns for {} (pruned {})",
            turns.len(),
            id,
            pruned
        );
        Ok(history)
    }

    async fn delete_created_before(&self, cutoff: DateTime<Utc>) -> Result<u64, PersistenceError> {
        let result = sqlx::query("DELETE FROM conversation_turns WHERE created_at < $1")
            .bind(cutoff)
            .execute(self.pool.get_pool())
            .await?;
        Ok(result.rows_affected())
    }

    fn history_limit(&self) -> usize {
        self.limit
    }
}
