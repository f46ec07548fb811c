//! Access to the external live game service and its realtime feed.

pub mod error;
#[cfg(feature = "http-backend")]
pub mod http;
pub mod realtime;

use futures::future::BoxFuture;
use uuid::Uuid;

use crate::{
    dto::{
        answer::{AnswerOutcome, SubmitAnswerRequest},
        leaderboard::LeaderboardRow,
        session::GameSession,
    },
    state::session_machine::SessionStatus,
};

pub use self::error::{BackendError, BackendResult};

/// Abstraction over the server functions the sync engine relies on.
///
/// The server stays authoritative: every call here either reads its state or
/// asks it to act; nothing is decided locally.
pub trait LiveGameBackend: Send + Sync {
    /// Server wall clock in epoch milliseconds.
    fn server_time(&self) -> BoxFuture<'static, BackendResult<i64>>;
    /// Current snapshot of a session, `None` when it does not exist.
    fn get_live_game_state(
        &self,
        game_id: Uuid,
    ) -> BoxFuture<'static, BackendResult<Option<GameSession>>>;
    /// Administrative manual start.
    fn start_game(&self, game_id: Uuid) -> BoxFuture<'static, BackendResult<bool>>;
    /// Move a session to its next status, or to `force_state` when given.
    fn advance_game_state(
        &self,
        game_id: Uuid,
        force_state: Option<SessionStatus>,
    ) -> BoxFuture<'static, BackendResult<bool>>;
    /// Server-side sweep over all active sessions.
    fn run_state_manager_sweep(&self) -> BoxFuture<'static, BackendResult<bool>>;
    /// Server-side sweep starting sessions whose scheduled time has arrived.
    fn check_scheduled_games(&self) -> BoxFuture<'static, BackendResult<bool>>;
    /// Record an answer and return its evaluation.
    fn submit_answer(
        &self,
        request: SubmitAnswerRequest,
    ) -> BoxFuture<'static, BackendResult<AnswerOutcome>>;
    /// Players of a session with their points.
    fn get_leaderboard(&self, game_id: Uuid)
    -> BoxFuture<'static, BackendResult<Vec<LeaderboardRow>>>;
}
