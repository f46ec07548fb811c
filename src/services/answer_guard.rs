use std::{sync::Arc, time::Duration};

use dashmap::{DashMap, mapref::entry::Entry};
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;
use validator::Validate;

use crate::{
    dao::{BackendError, LiveGameBackend},
    dto::answer::{AnswerOutcome, SubmitAnswerRequest},
    error::{RejectionReason, SyncError},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct AttemptKey {
    game_id: Uuid,
    user_id: Uuid,
    question_position: u32,
}

#[derive(Debug, Clone, Copy)]
struct AttemptRecord {
    first_attempt_at: Instant,
    last_attempt_at: Instant,
    attempt_count: u32,
}

/// Local replay and bot-timing defense in front of `submit_answer`.
///
/// Checks run in order: an attempt already recorded for the same game, player
/// and question, then an attempt following the previous one too fast, then an
/// answer time out of range. The attempt is recorded before the call so an
/// attempt made while one is in flight is refused. The server re-validates
/// everything; this only spares it obvious duplicates.
pub struct AnswerSubmissionGuard {
    backend: Arc<dyn LiveGameBackend>,
    min_interval: Duration,
    records: DashMap<AttemptKey, AttemptRecord>,
}

impl AnswerSubmissionGuard {
    /// Guard refusing attempts closer than `min_interval` to the previous one.
    pub fn new(backend: Arc<dyn LiveGameBackend>, min_interval: Duration) -> Self {
        Self {
            backend,
            min_interval,
            records: DashMap::new(),
        }
    }

    /// Validate the attempt locally and forward it to the server.
    ///
    /// A network failure releases the attempt so it may be retried; a server
    /// rejection keeps it recorded.
    pub async fn try_submit(
        &self,
        game_id: Uuid,
        user_id: Uuid,
        question_position: u32,
        option_id: Uuid,
        answer_time_ms: i64,
    ) -> Result<AnswerOutcome, SyncError> {
        let key = AttemptKey {
            game_id,
            user_id,
            question_position,
        };
        let request = SubmitAnswerRequest {
            game_id,
            user_id,
            question_position,
            option_id,
            answer_time_ms,
        };

        if let Err(reason) = self.record_attempt(key, &request) {
            warn!(%game_id, %user_id, question_position, answer_time_ms, %reason, "answer refused locally");
            return Err(reason.into());
        }

        match self.backend.submit_answer(request).await {
            Ok(outcome) => {
                info!(
                    %game_id,
                    %user_id,
                    question_position,
                    is_correct = outcome.is_correct,
                    points = outcome.points_awarded,
                    "answer accepted"
                );
                Ok(outcome)
            }
            Err(BackendError::Rejected { message, .. }) => {
                warn!(%game_id, %user_id, question_position, %message, "server rejected answer");
                Err(SyncError::ServerRejectedAnswer { message })
            }
            Err(err) => {
                if err.is_transient() {
                    self.release_attempt(key);
                }
                warn!(%game_id, %user_id, question_position, error = %err, "answer submission failed");
                Err(err.into())
            }
        }
    }

    /// Recorded attempts for the key; 0 when none or released.
    pub fn attempt_count(&self, game_id: Uuid, user_id: Uuid, question_position: u32) -> u32 {
        let key = AttemptKey {
            game_id,
            user_id,
            question_position,
        };
        self.records
            .get(&key)
            .map_or(0, |record| record.attempt_count)
    }

    /// Forget every attempt of a session.
    pub fn clear_game(&self, game_id: Uuid) {
        self.records.retain(|key, _| key.game_id != game_id);
    }

    fn record_attempt(
        &self,
        key: AttemptKey,
        request: &SubmitAnswerRequest,
    ) -> Result<(), RejectionReason> {
        let now = Instant::now();
        match self.records.entry(key) {
            Entry::Occupied(mut entry) => {
                let record = entry.get_mut();
                if record.attempt_count >= 1 {
                    return Err(RejectionReason::AlreadyAnswered);
                }
                let since_last = now.saturating_duration_since(record.last_attempt_at);
                record.last_attempt_at = now;
                if since_last < self.min_interval {
                    return Err(RejectionReason::SuspiciousTiming);
                }
                request
                    .validate()
                    .map_err(|_| RejectionReason::InvalidTiming)?;
                record.attempt_count = 1;
            }
            Entry::Vacant(entry) => {
                let valid = request.validate().is_ok();
                entry.insert(AttemptRecord {
                    first_attempt_at: now,
                    last_attempt_at: now,
                    attempt_count: u32::from(valid),
                });
                if !valid {
                    return Err(RejectionReason::InvalidTiming);
                }
            }
        }
        Ok(())
    }

    fn release_attempt(&self, key: AttemptKey) {
        if let Some(mut record) = self.records.get_mut(&key) {
            record.attempt_count = 0;
            debug!(
                question_position = key.question_position,
                pending_for_ms = record.first_attempt_at.elapsed().as_millis() as u64,
                "answer attempt released after network failure"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::testing::{FakeBackend, SubmitBehaviour};

    use super::*;

    const GAME: Uuid = Uuid::from_u128(10);
    const USER: Uuid = Uuid::from_u128(11);
    const OPTION: Uuid = Uuid::from_u128(12);

    fn guard(backend: &Arc<FakeBackend>) -> AnswerSubmissionGuard {
        AnswerSubmissionGuard::new(
            Arc::clone(backend) as Arc<dyn LiveGameBackend>,
            Duration::from_millis(300),
        )
    }

    async fn pause(millis: u64) {
        tokio::time::advance(Duration::from_millis(millis)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn second_attempt_is_already_answered() {
        for gap in [100, 1_000] {
            let backend = Arc::new(FakeBackend::default());
            let guard = guard(&backend);

            let outcome = guard.try_submit(GAME, USER, 1, OPTION, 4_200).await.unwrap();
            assert_eq!(outcome.points_awarded, 900);

            pause(gap).await;
            let err = guard.try_submit(GAME, USER, 1, OPTION, 4_300).await.unwrap_err();
            assert_eq!(err.rejection(), Some(RejectionReason::AlreadyAnswered));
            assert_eq!(backend.calls("submit_answer"), 1);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn out_of_range_times_never_reach_the_server() {
        let backend = Arc::new(FakeBackend::default());
        let guard = guard(&backend);

        for (question, time) in [(1, -5), (2, 70_000)] {
            let err = guard.try_submit(GAME, USER, question, OPTION, time).await.unwrap_err();
            assert_eq!(err.rejection(), Some(RejectionReason::InvalidTiming));
        }
        assert_eq!(backend.calls("submit_answer"), 0);

        for (question, time) in [(3, 0), (4, 60_000)] {
            guard.try_submit(GAME, USER, question, OPTION, time).await.unwrap();
        }
        assert_eq!(backend.calls("submit_answer"), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn rapid_retry_after_refusal_is_suspicious() {
        let backend = Arc::new(FakeBackend::default());
        let guard = guard(&backend);

        guard.try_submit(GAME, USER, 1, OPTION, -5).await.unwrap_err();
        pause(120).await;
        let err = guard.try_submit(GAME, USER, 1, OPTION, 900).await.unwrap_err();
        assert_eq!(err.rejection(), Some(RejectionReason::SuspiciousTiming));

        pause(300).await;
        guard.try_submit(GAME, USER, 1, OPTION, 900).await.unwrap();
        assert_eq!(backend.calls("submit_answer"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn network_failure_releases_the_attempt() {
        let backend = Arc::new(FakeBackend::default());
        *backend.submit.lock().unwrap() = SubmitBehaviour::Fail;
        let guard = guard(&backend);

        let err = guard.try_submit(GAME, USER, 2, OPTION, 1_500).await.unwrap_err();
        assert!(err.is_transient());
        assert_eq!(guard.attempt_count(GAME, USER, 2), 0);

        *backend.submit.lock().unwrap() = SubmitBehaviour::Accept;
        let err = guard.try_submit(GAME, USER, 2, OPTION, 1_500).await.unwrap_err();
        assert_eq!(err.rejection(), Some(RejectionReason::SuspiciousTiming));

        pause(400).await;
        guard.try_submit(GAME, USER, 2, OPTION, 1_500).await.unwrap();
        assert_eq!(guard.attempt_count(GAME, USER, 2), 1);
        assert_eq!(backend.calls("submit_answer"), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn server_rejection_is_final() {
        let backend = Arc::new(FakeBackend::default());
        *backend.submit.lock().unwrap() = SubmitBehaviour::Reject("duplicate answer".into());
        let guard = guard(&backend);

        let err = guard.try_submit(GAME, USER, 3, OPTION, 2_000).await.unwrap_err();
        assert!(matches!(
            err,
            SyncError::ServerRejectedAnswer { ref message } if message == "duplicate answer"
        ));

        pause(1_000).await;
        let err = guard.try_submit(GAME, USER, 3, OPTION, 2_000).await.unwrap_err();
        assert_eq!(err.rejection(), Some(RejectionReason::AlreadyAnswered));
        assert_eq!(backend.calls("submit_answer"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn players_and_questions_are_independent() {
        let backend = Arc::new(FakeBackend::default());
        let guard = guard(&backend);

        guard.try_submit(GAME, USER, 1, OPTION, 800).await.unwrap();
        guard.try_submit(GAME, USER, 2, OPTION, 800).await.unwrap();
        guard.try_submit(GAME, Uuid::from_u128(99), 1, OPTION, 800).await.unwrap();
        assert_eq!(backend.calls("submit_answer"), 3);

        guard.clear_game(GAME);
        assert_eq!(guard.attempt_count(GAME, USER, 1), 0);
    }
}
