use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::state::session_machine::SessionStatus;

/// Server snapshot of a live game session as returned by `get_live_game_state`
/// and carried in `sessions` change events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameSession {
    /// Primary key of the session.
    pub id: Uuid,
    /// Current phase of the session.
    pub status: SessionStatus,
    /// Zero-based index of the question being played or last played.
    #[serde(default)]
    pub current_question_index: u32,
    /// Seconds left in the current phase (waiting room or question timer).
    #[serde(default)]
    pub countdown_seconds: u32,
    /// When the first question was shown, if the session has started.
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub started_at: Option<OffsetDateTime>,
    /// Last server-side mutation of the row.
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl GameSession {
    /// Whether the two snapshots differ in a field that matters to consumers.
    pub fn differs_meaningfully(&self, other: &GameSession) -> bool {
        self.status != other.status
            || self.current_question_index != other.current_question_index
            || self.countdown_seconds != other.countdown_seconds
    }
}

/// Payload of the server time endpoint.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct ServerTime {
    /// Server wall clock in milliseconds since the Unix epoch.
    pub server_time_ms: i64,
}
