//! SQLite turn store.
//!
//! Schema: one `chatbox` table. `id` is an autoincrement primary key, so
//! recency queries never depend on wall-clock time. `summarized_response`
//! is NULL for turns whose response fit the output budget.

use async_trait::async_trait;
use chatbox_core::error::StoreError;
use chatbox_core::store::{NewTurn, TurnStore};
use chatbox_core::turn::{ConversationTurn, SessionId};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Row, SqlitePool};
use std::str::FromStr;
use tracing::{debug, info};

/// The production SQLite turn store.
pub struct SqliteTurnStore {
    pool: SqlitePool,
}

impl SqliteTurnStore {
    /// Open (or create) the database at the given connection string.
    ///
    /// The schema is created automatically. Pass `"sqlite::memory:"` for an
    /// in-process ephemeral database (useful for tests).
    pub async fn new(url: &str) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str(url)
            .map_err(|e| StoreError::Storage(format!("Invalid SQLite URL: {e}")))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal);

        // Each connection to an in-memory database gets its own database,
        // so the pool must stay at a single connection for those.
        let max_connections = if url.contains(":memory:") { 1 } else { 4 };

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await
            .map_err(|e| StoreError::Storage(format!("Failed to open SQLite: {e}")))?;

        let store = Self { pool };
        store.run_migrations().await?;
        info!("SQLite turn store initialized at {url}");
        Ok(store)
    }

    /// Create from an existing pool (useful for testing).
    pub async fn from_pool(pool: SqlitePool) -> Result<Self, StoreError> {
        let store = Self { pool };
        store.run_migrations().await?;
        Ok(store)
    }

    async fn run_migrations(&self) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS chatbox (
                id                  INTEGER PRIMARY KEY AUTOINCREMENT,
                session_id          TEXT NOT NULL,
                user_prompt         TEXT NOT NULL,
                response            TEXT NOT NULL,
                summarized_response TEXT
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::MigrationFailed(format!("chatbox table: {e}")))?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_chatbox_session_id ON chatbox(session_id)",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::MigrationFailed(format!("session index: {e}")))?;

        debug!("SQLite migrations complete");
        Ok(())
    }

    fn row_to_turn(row: &sqlx::sqlite::SqliteRow) -> Result<ConversationTurn, StoreError> {
        let sequence_id: i64 = row
            .try_get("id")
            .map_err(|e| StoreError::QueryFailed(format!("id column: {e}")))?;
        let session_id: String = row
            .try_get("session_id")
            .map_err(|e| StoreError::QueryFailed(format!("session_id column: {e}")))?;
        let user_text: String = row
            .try_get("user_prompt")
            .map_err(|e| StoreError::QueryFailed(format!("user_prompt column: {e}")))?;
        let response_text: String = row
            .try_get("response")
            .map_err(|e| StoreError::QueryFailed(format!("response column: {e}")))?;
        let condensed_response_text: Option<String> = row
            .try_get("summarized_response")
            .map_err(|e| StoreError::QueryFailed(format!("summarized_response column: {e}")))?;

        Ok(ConversationTurn {
            session_id: SessionId(session_id),
            sequence_id,
            user_text,
            response_text,
            condensed_response_text,
        })
    }
}

#[async_trait]
impl TurnStore for SqliteTurnStore {
    fn name(&self) -> &str {
        "sqlite"
    }

    async fn record(&self, turn: NewTurn) -> Result<ConversationTurn, StoreError> {
        let result = sqlx::query(
            r#"
            INSERT INTO chatbox (session_id, user_prompt, response, summarized_response)
            VALUES (?1, ?2, ?3, ?4)
            "#,
        )
        .bind(turn.session_id.as_str())
        .bind(&turn.user_text)
        .bind(&turn.response_text)
        .bind(&turn.condensed_response_text)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Storage(format!("INSERT failed: {e}")))?;

        let sequence_id = result.last_insert_rowid();
        debug!(
            session_id = %turn.session_id,
            sequence_id,
            "Recorded conversation turn"
        );

        Ok(ConversationTurn {
            session_id: turn.session_id,
            sequence_id,
            user_text: turn.user_text,
            response_text: turn.response_text,
            condensed_response_text: turn.condensed_response_text,
        })
    }

    async fn fetch_context(
        &self,
        session_id: &SessionId,
        limit: usize,
    ) -> Result<Vec<ConversationTurn>, StoreError> {
        // Most recent `limit` rows, then reversed to chronological order.
        let rows = sqlx::query(
            "SELECT * FROM chatbox WHERE session_id = ?1 ORDER BY id DESC LIMIT ?2",
        )
        .bind(session_id.as_str())
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::QueryFailed(format!("context query: {e}")))?;

        let mut turns: Vec<ConversationTurn> = rows
            .iter()
            .map(Self::row_to_turn)
            .collect::<Result<_, _>>()?;
        turns.reverse();

        Ok(turns
            .into_iter()
            .map(ConversationTurn::into_context_form)
            .collect())
    }

    async fn history(
        &self,
        session_id: &SessionId,
    ) -> Result<Vec<ConversationTurn>, StoreError> {
        let rows = sqlx::query("SELECT * FROM chatbox WHERE session_id = ?1 ORDER BY id ASC")
            .bind(session_id.as_str())
            .fetch_all(&self.pool)
            .await
            .map_err(|e| StoreError::QueryFailed(format!("history query: {e}")))?;

        rows.iter().map(Self::row_to_turn).collect()
    }

    async fn delete_session(&self, session_id: &SessionId) -> Result<u64, StoreError> {
        let result = sqlx::query("DELETE FROM chatbox WHERE session_id = ?1")
            .bind(session_id.as_str())
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Storage(format!("DELETE failed: {e}")))?;

        let removed = result.rows_affected();
        debug!(session_id = %session_id, removed, "Deleted session turns");
        Ok(removed)
    }
}
