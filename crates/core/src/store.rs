//! TurnStore trait — persistence of conversation turns.
//!
//! One flat table of immutable turns, filtered and ordered by session.
//! Implementations: SQLite (production), in-memory stubs for tests.

use crate::error::StoreError;
use crate::turn::{ConversationTurn, SessionId};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// A turn about to be recorded. `sequence_id` is assigned by the store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewTurn {
    pub session_id: SessionId,
    pub user_text: String,
    pub response_text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condensed_response_text: Option<String>,
}

/// The core persistence trait.
#[async_trait]
pub trait TurnStore: Send + Sync {
    /// The backend name (e.g., "sqlite").
    fn name(&self) -> &str;

    /// Append one immutable turn. Atomic: either the whole row is recorded
    /// or nothing is. Returns the turn with its assigned `sequence_id`.
    async fn record(&self, turn: NewTurn) -> std::result::Result<ConversationTurn, StoreError>;

    /// The `limit` most recent turns of a session, oldest first, in the
    /// form replayed as context: condensed responses substituted in (see
    /// [`ConversationTurn::into_context_form`]). Read-only.
    async fn fetch_context(
        &self,
        session_id: &SessionId,
        limit: usize,
    ) -> std::result::Result<Vec<ConversationTurn>, StoreError>;

    /// All turns of a session in chronological order, raw — condensed
    /// responses are reported alongside, not substituted.
    async fn history(
        &self,
        session_id: &SessionId,
    ) -> std::result::Result<Vec<ConversationTurn>, StoreError>;

    /// Delete every turn of a session. Returns the number of rows removed
    /// (zero when the session has no turns).
    async fn delete_session(
        &self,
        session_id: &SessionId,
    ) -> std::result::Result<u64, StoreError>;
}
