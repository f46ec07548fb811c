//! In-memory doubles shared by the unit tests.

use std::{
    collections::HashMap,
    io,
    sync::Mutex,
};

use futures::{
    FutureExt,
    future::{BoxFuture, ready},
};
use time::{Duration as TimeDuration, OffsetDateTime, macros::datetime};
use uuid::Uuid;

use crate::{
    dao::{BackendError, BackendResult, LiveGameBackend},
    dto::{
        answer::{AnswerOutcome, SubmitAnswerRequest},
        leaderboard::LeaderboardRow,
        session::GameSession,
    },
    state::session_machine::SessionStatus,
};

pub(crate) const BASE_TIME: OffsetDateTime = datetime!(2026-03-01 18:00 UTC);

/// Session snapshot whose `updated_at` is `BASE_TIME + updated_secs`.
pub(crate) fn session(
    id: Uuid,
    status: SessionStatus,
    question_index: u32,
    countdown_seconds: u32,
    updated_secs: i64,
) -> GameSession {
    GameSession {
        id,
        status,
        current_question_index: question_index,
        countdown_seconds,
        started_at: None,
        updated_at: BASE_TIME + TimeDuration::seconds(updated_secs),
    }
}

pub(crate) fn row(name: &str, total_points: i64) -> LeaderboardRow {
    LeaderboardRow {
        user_id: Uuid::new_v4(),
        name: name.into(),
        total_points,
        last_answer_outcome: None,
    }
}

#[derive(Debug, Clone)]
pub(crate) enum SubmitBehaviour {
    Accept,
    Reject(String),
    Fail,
}

/// Scriptable [`LiveGameBackend`] recording every call.
pub(crate) struct FakeBackend {
    pub server_time: Mutex<Option<i64>>,
    pub session: Mutex<Option<GameSession>>,
    pub state_fails: Mutex<bool>,
    pub leaderboard: Mutex<Vec<LeaderboardRow>>,
    /// Number of upcoming leaderboard fetches that fail.
    pub leaderboard_failures: Mutex<u32>,
    pub submit: Mutex<SubmitBehaviour>,
    pub submissions: Mutex<Vec<SubmitAnswerRequest>>,
    pub forced: Mutex<Vec<Option<SessionStatus>>>,
    calls: Mutex<HashMap<&'static str, usize>>,
}

impl Default for FakeBackend {
    fn default() -> Self {
        Self {
            server_time: Mutex::new(Some(0)),
            session: Mutex::new(None),
            state_fails: Mutex::new(false),
            leaderboard: Mutex::new(Vec::new()),
            leaderboard_failures: Mutex::new(0),
            submit: Mutex::new(SubmitBehaviour::Accept),
            submissions: Mutex::new(Vec::new()),
            forced: Mutex::new(Vec::new()),
            calls: Mutex::new(HashMap::new()),
        }
    }
}

impl FakeBackend {
    pub fn calls(&self, name: &str) -> usize {
        self.calls.lock().unwrap().get(name).copied().unwrap_or(0)
    }

    pub fn set_session(&self, session: Option<GameSession>) {
        *self.session.lock().unwrap() = session;
    }

    fn record(&self, name: &'static str) {
        *self.calls.lock().unwrap().entry(name).or_default() += 1;
    }

    fn down(path: &str) -> BackendError {
        BackendError::transport(path, io::Error::other("connection refused"))
    }
}

impl LiveGameBackend for FakeBackend {
    fn server_time(&self) -> BoxFuture<'static, BackendResult<i64>> {
        self.record("server_time");
        let result = self
            .server_time
            .lock()
            .unwrap()
            .ok_or_else(|| Self::down("rpc/get_server_time"));
        ready(result).boxed()
    }

    fn get_live_game_state(
        &self,
        _game_id: Uuid,
    ) -> BoxFuture<'static, BackendResult<Option<GameSession>>> {
        self.record("get_live_game_state");
        let result = if *self.state_fails.lock().unwrap() {
            Err(Self::down("rpc/get_live_game_state"))
        } else {
            Ok(self.session.lock().unwrap().clone())
        };
        ready(result).boxed()
    }

    fn start_game(&self, _game_id: Uuid) -> BoxFuture<'static, BackendResult<bool>> {
        self.record("start_game");
        ready(Ok(true)).boxed()
    }

    fn advance_game_state(
        &self,
        _game_id: Uuid,
        force_state: Option<SessionStatus>,
    ) -> BoxFuture<'static, BackendResult<bool>> {
        self.record("advance_game_state");
        self.forced.lock().unwrap().push(force_state);
        ready(Ok(true)).boxed()
    }

    fn run_state_manager_sweep(&self) -> BoxFuture<'static, BackendResult<bool>> {
        self.record("run_state_manager_sweep");
        ready(Ok(true)).boxed()
    }

    fn check_scheduled_games(&self) -> BoxFuture<'static, BackendResult<bool>> {
        self.record("check_scheduled_games");
        ready(Ok(true)).boxed()
    }

    fn submit_answer(
        &self,
        request: SubmitAnswerRequest,
    ) -> BoxFuture<'static, BackendResult<AnswerOutcome>> {
        self.record("submit_answer");
        let option_id = request.option_id;
        self.submissions.lock().unwrap().push(request);
        let result = match self.submit.lock().unwrap().clone() {
            SubmitBehaviour::Accept => Ok(AnswerOutcome {
                is_correct: true,
                points_awarded: 900,
                correct_option_id: option_id,
            }),
            SubmitBehaviour::Reject(message) => Err(BackendError::Rejected {
                path: "rpc/submit_answer".into(),
                status: 409,
                message,
            }),
            SubmitBehaviour::Fail => Err(Self::down("rpc/submit_answer")),
        };
        ready(result).boxed()
    }

    fn get_leaderboard(
        &self,
        _game_id: Uuid,
    ) -> BoxFuture<'static, BackendResult<Vec<LeaderboardRow>>> {
        self.record("get_leaderboard");
        let mut failures = self.leaderboard_failures.lock().unwrap();
        let result = if *failures > 0 {
            *failures -= 1;
            Err(Self::down("rpc/get_leaderboard"))
        } else {
            Ok(self.leaderboard.lock().unwrap().clone())
        };
        ready(result).boxed()
    }
}
