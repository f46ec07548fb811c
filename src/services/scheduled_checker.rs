use std::{
    sync::{Arc, Mutex, PoisonError, Weak},
    time::Duration,
};

use rand::Rng;
use tracing::{debug, info, warn};

use crate::{
    dao::LiveGameBackend,
    error::SyncError,
    services::game_state_store::GameStateStore,
    state::{
        scheduler::{Scheduler, TaskHandle},
        session_machine::SessionStatus,
        throttle::Throttle,
    },
};

/// Result of one [`ScheduledGameChecker::check_now`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckOutcome {
    /// Another check ran inside the throttle window.
    Throttled,
    /// The server was asked to advance and the snapshot refreshed.
    Completed {
        /// What the server reported.
        advanced: bool,
    },
}

/// How long to wait before the next check given the seconds left before the
/// scheduled start. Unknown countdowns poll at the slowest pace.
pub fn polling_interval(countdown_seconds: Option<u64>) -> Duration {
    match countdown_seconds {
        None => Duration::from_secs(30),
        Some(600..) => Duration::from_secs(30),
        Some(300..600) => Duration::from_secs(15),
        Some(60..300) => Duration::from_secs(5),
        Some(15..60) => Duration::from_secs(2),
        Some(_) => Duration::from_millis(rand::rng().random_range(2_000..=3_000)),
    }
}

/// Pull-side safety net asking the server to advance due sessions.
pub struct ScheduledGameChecker {
    backend: Arc<dyn LiveGameBackend>,
    store: Arc<GameStateStore>,
    throttle: Throttle,
    scheduler: Scheduler,
    poller: Mutex<Option<TaskHandle>>,
}

impl ScheduledGameChecker {
    /// Checker refreshing `store` after every successful check.
    pub fn new(
        backend: Arc<dyn LiveGameBackend>,
        store: Arc<GameStateStore>,
        throttle: Throttle,
    ) -> Arc<Self> {
        Arc::new(Self {
            backend,
            store,
            throttle,
            scheduler: Scheduler::new(),
            poller: Mutex::new(None),
        })
    }

    /// Ask the server to advance, then force a snapshot refresh.
    ///
    /// A waiting (or unknown) session triggers the scheduled-start sweep; a
    /// running one triggers the state manager sweep.
    pub async fn check_now(&self) -> Result<CheckOutcome, SyncError> {
        if !self.throttle.try_acquire() {
            debug!(game_id = %self.store.game_id(), "scheduled check throttled");
            return Ok(CheckOutcome::Throttled);
        }

        let in_progress = self
            .store
            .snapshot()
            .is_some_and(|session| session.status.is_in_progress());

        let swept = if in_progress {
            self.backend.run_state_manager_sweep().await
        } else {
            self.backend.check_scheduled_games().await
        };

        let advanced = match swept {
            Ok(advanced) => advanced,
            Err(err) => {
                warn!(game_id = %self.store.game_id(), in_progress, error = %err, "scheduled check failed");
                return Err(err.into());
            }
        };

        debug!(game_id = %self.store.game_id(), in_progress, advanced, "scheduled check done");
        self.store.refresh(true).await?;
        Ok(CheckOutcome::Completed { advanced })
    }

    /// Poll until the session finishes, pacing checks with [`polling_interval`].
    ///
    /// `countdown` reports the seconds left before the scheduled start.
    pub fn run_periodically<F>(self: &Arc<Self>, countdown: F)
    where
        F: Fn() -> Option<u64> + Send + 'static,
    {
        let weak: Weak<Self> = Arc::downgrade(self);
        let handle = self.scheduler.spawn(async move {
            loop {
                let wait = {
                    let Some(this) = weak.upgrade() else { break };
                    if this.is_finished() {
                        info!(game_id = %this.store.game_id(), "session finished; scheduled checks stop");
                        break;
                    }
                    polling_interval(countdown())
                };

                tokio::time::sleep(wait).await;

                let Some(this) = weak.upgrade() else { break };
                let _ = this.check_now().await;
            }
        });

        let mut poller = self.poller.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(previous) = poller.replace(handle) {
            previous.cancel();
        }
    }

    /// Whether a polling loop is currently active.
    pub fn is_polling(&self) -> bool {
        self.poller
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Stop polling. Safe to call repeatedly.
    pub fn teardown(&self) {
        if let Some(handle) = self
            .poller
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            handle.cancel();
        }
        self.scheduler.shutdown();
    }

    fn is_finished(&self) -> bool {
        self.store
            .snapshot()
            .is_some_and(|session| session.status == SessionStatus::Finished)
    }
}
