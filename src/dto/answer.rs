use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

/// Longest answer time (milliseconds) a client may report for one question.
pub const MAX_ANSWER_TIME_MS: i64 = 60_000;

/// Body of the `submit_answer` call.
#[derive(Debug, Clone, Serialize, Validate)]
pub struct SubmitAnswerRequest {
    /// Session the answer belongs to.
    pub game_id: Uuid,
    /// Player submitting the answer.
    pub user_id: Uuid,
    /// Position of the question inside the session.
    pub question_position: u32,
    /// Option chosen by the player.
    pub option_id: Uuid,
    /// Time the player took to answer, measured client side.
    #[validate(range(min = 0, max = 60000))]
    pub answer_time_ms: i64,
}

/// Result of an accepted answer, as computed by the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnswerOutcome {
    /// Whether the chosen option was the right one.
    pub is_correct: bool,
    /// Points credited for this answer.
    pub points_awarded: i32,
    /// The correct option for the question.
    pub correct_option_id: Uuid,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(answer_time_ms: i64) -> SubmitAnswerRequest {
        SubmitAnswerRequest {
            game_id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            question_position: 0,
            option_id: Uuid::new_v4(),
            answer_time_ms,
        }
    }

    #[test]
    fn answer_time_bounds_are_inclusive() {
        assert!(request(0).validate().is_ok());
        assert!(request(MAX_ANSWER_TIME_MS).validate().is_ok());
        assert!(request(-1).validate().is_err());
        assert!(request(MAX_ANSWER_TIME_MS + 1).validate().is_err());
    }
}
