use thiserror::Error;

use crate::dao::error::BackendError;

/// Local reasons for refusing an answer before it reaches the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum RejectionReason {
    /// An attempt for the same game, player and question is already recorded.
    #[error("an answer was already submitted for this question")]
    AlreadyAnswered,
    /// The attempt followed the previous one faster than a human could.
    #[error("answer attempts are too close together")]
    SuspiciousTiming,
    /// Reported answer time is outside the accepted range.
    #[error("answer time is outside the accepted range")]
    InvalidTiming,
}

/// Errors surfaced by the sync engine operations.
#[derive(Debug, Error)]
pub enum SyncError {
    /// The service could not be reached; a later refresh or reconnection retries.
    #[error("live game service unreachable")]
    TransientNetwork(#[source] BackendError),
    /// The service answered but the call failed for a non-network reason.
    #[error("live game service call failed")]
    Service(#[source] BackendError),
    /// The answer was refused locally and never sent.
    #[error("answer refused: {0}")]
    Rejected(#[from] RejectionReason),
    /// The server refused the answer; it must not be retried.
    #[error("server rejected the answer: {message}")]
    ServerRejectedAnswer { message: String },
}

impl SyncError {
    /// Local rejection reason, when the error is one.
    pub fn rejection(&self) -> Option<RejectionReason> {
        match self {
            SyncError::Rejected(reason) => Some(*reason),
            _ => None,
        }
    }

    /// Whether retrying later may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, SyncError::TransientNetwork(_))
    }
}

impl From<BackendError> for SyncError {
    fn from(err: BackendError) -> Self {
        if err.is_transient() {
            SyncError::TransientNetwork(err)
        } else {
            SyncError::Service(err)
        }
    }
}
