use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Phases a live session goes through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// Waiting room before the first question.
    Waiting,
    /// A question is open for answers.
    Question,
    /// The correct answer of the current question is shown.
    Result,
    /// Intermediate ranking between two questions.
    Leaderboard,
    /// The session is over.
    Finished,
}

impl SessionStatus {
    /// Position of the status inside one question round.
    ///
    /// `Finished` ranks above everything so it is never regressed from.
    pub fn rank(self) -> u8 {
        match self {
            SessionStatus::Waiting => 0,
            SessionStatus::Question => 1,
            SessionStatus::Result => 2,
            SessionStatus::Leaderboard => 3,
            SessionStatus::Finished => 4,
        }
    }

    /// Whether the session is running a question round.
    pub fn is_in_progress(self) -> bool {
        matches!(
            self,
            SessionStatus::Question | SessionStatus::Result | SessionStatus::Leaderboard
        )
    }

    /// Whether `next` is a regular forward step from `self`.
    pub fn can_advance_to(self, next: SessionStatus) -> bool {
        matches!(
            (self, next),
            (SessionStatus::Waiting, SessionStatus::Question)
                | (SessionStatus::Question, SessionStatus::Result)
                | (SessionStatus::Result, SessionStatus::Leaderboard)
                | (SessionStatus::Result, SessionStatus::Finished)
                | (SessionStatus::Leaderboard, SessionStatus::Question)
                | (SessionStatus::Leaderboard, SessionStatus::Finished)
        )
    }

    /// Wire name of the status.
    pub fn as_str(self) -> &'static str {
        match self {
            SessionStatus::Waiting => "waiting",
            SessionStatus::Question => "question",
            SessionStatus::Result => "result",
            SessionStatus::Leaderboard => "leaderboard",
            SessionStatus::Finished => "finished",
        }
    }
}

/// Progress marker used to order snapshots that share a timestamp.
///
/// Compared lexicographically: a later question always wins, then the later phase.
pub fn progress(question_index: u32, status: SessionStatus) -> (u32, u8) {
    match status {
        SessionStatus::Finished => (u32::MAX, status.rank()),
        other => (question_index, other.rank()),
    }
}

/// Status change accepted by the game state store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusTransition {
    /// Status before the change, `None` for the first snapshot.
    pub previous: Option<SessionStatus>,
    /// Status after the change.
    pub current: SessionStatus,
    /// Question index carried by the new snapshot.
    pub question_index: u32,
}

impl StatusTransition {
    /// Whether the change follows the regular flow (or is the first snapshot).
    pub fn is_forward(&self) -> bool {
        self.previous
            .is_none_or(|previous| previous.can_advance_to(self.current))
    }
}

/// Error returned when a status name cannot be parsed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown session status `{0}`")]
pub struct UnknownStatus(pub String);

impl std::str::FromStr for SessionStatus {
    type Err = UnknownStatus;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "waiting" => Ok(SessionStatus::Waiting),
            "question" => Ok(SessionStatus::Question),
            "result" => Ok(SessionStatus::Result),
            "leaderboard" => Ok(SessionStatus::Leaderboard),
            "finished" => Ok(SessionStatus::Finished),
            other => Err(UnknownStatus(other.to_string())),
        }
    }
}
