use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Outcome of a player's most recent answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnswerResult {
    /// The last answer was right.
    Correct,
    /// The last answer was wrong.
    Incorrect,
}

/// Row returned by `get_leaderboard`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LeaderboardRow {
    /// Player identifier.
    pub user_id: Uuid,
    /// Display name.
    pub name: String,
    /// Accumulated points for the session.
    pub total_points: i64,
    /// Outcome of the last recorded answer, if any.
    #[serde(default)]
    pub last_answer_outcome: Option<AnswerResult>,
}

/// Ranked leaderboard line exposed to the presentation layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LeaderboardEntry {
    /// Player identifier.
    pub user_id: Uuid,
    /// Display name.
    pub name: String,
    /// Accumulated points for the session.
    pub points: i64,
    /// One-based position in the ranking.
    pub rank: u32,
    /// Outcome of the last recorded answer, if any.
    pub last_answer_outcome: Option<AnswerResult>,
}
