//! ConversationTurn and SessionId domain types.
//!
//! A turn is one user-request/model-response exchange within a session.
//! Turns are immutable once recorded: the store supports append and bulk
//! delete-by-session, never update.

use serde::{Deserialize, Serialize};

/// Opaque identifier grouping an ordered sequence of turns.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub String);

impl SessionId {
    pub fn from(s: &str) -> Self {
        Self(s.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One recorded exchange within a session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationTurn {
    /// The session this turn belongs to.
    pub session_id: SessionId,

    /// Monotonically increasing per-session identifier, assigned by the
    /// store at insertion time. The sole ordering key — no wall-clock
    /// timestamp is kept.
    pub sequence_id: i64,

    /// The request text as actually sent to the model (post-condensation
    /// if condensation occurred).
    pub user_text: String,

    /// The raw model output for this turn.
    pub response_text: String,

    /// Shortened form of `response_text`, present only when the response
    /// exceeded the output budget at recording time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condensed_response_text: Option<String>,
}

impl ConversationTurn {
    /// Convert this turn into the form replayed as conversation context.
    ///
    /// When a condensed response exists it substitutes for the raw
    /// response and the condensed field is cleared — context consumers
    /// never see both forms of the same response.
    pub fn into_context_form(mut self) -> Self {
        if let Some(condensed) = self.condensed_response_text.take() {
            self.response_text = condensed;
        }
        self
    }
}
