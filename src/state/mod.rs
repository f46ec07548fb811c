pub mod clock;
pub mod notifications;
pub mod scheduler;
pub mod session_machine;
pub mod throttle;

use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use tokio::sync::{
    broadcast::{self, error::RecvError},
    watch,
};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    config::SyncConfig,
    dao::{LiveGameBackend, realtime::RealtimeTransport},
    dto::{
        answer::AnswerOutcome,
        leaderboard::LeaderboardEntry,
        realtime::{RowFilter, Topic},
        session::GameSession,
    },
    error::SyncError,
    services::{
        answer_guard::AnswerSubmissionGuard,
        connection_registry::{ConnectionRegistry, ConnectionStatus},
        countdown::{CountdownEngine, CountdownEvent},
        game_state_store::GameStateStore,
        leaderboard_sync::LeaderboardSync,
        scheduled_checker::{CheckOutcome, ScheduledGameChecker},
        time_sync::TimeSynchronizer,
    },
};

use self::{
    clock::Clock,
    notifications::{Notification, NotificationHub},
    scheduler::Scheduler,
    session_machine::{SessionStatus, StatusTransition},
    throttle::Throttle,
};

/// Shared handle on one live game.
pub type SharedGame = Arc<LiveGame>;

/// Table carrying session rows.
pub const SESSIONS_TABLE: &str = "sessions";
/// Table carrying session participants.
pub const PARTICIPANTS_TABLE: &str = "participants";
/// Table carrying recorded answers.
pub const ANSWERS_TABLE: &str = "answers";

/// Everything a client needs to follow one live game.
///
/// Owns one instance of every component, wires realtime events to them and
/// tears them all down in [`LiveGame::destroy`]. Several games may be followed
/// at once; nothing here is process-wide.
pub struct LiveGame {
    game_id: Uuid,
    config: SyncConfig,
    backend: Arc<dyn LiveGameBackend>,
    notifications: NotificationHub,
    time_sync: Arc<TimeSynchronizer>,
    registry: Arc<ConnectionRegistry>,
    store: Arc<GameStateStore>,
    countdown: Arc<CountdownEngine>,
    checker: Arc<ScheduledGameChecker>,
    guard: AnswerSubmissionGuard,
    leaderboard: Arc<LeaderboardSync>,
    scheduler: Scheduler,
    destroyed: AtomicBool,
}

impl LiveGame {
    /// Build and start every component for `game_id`.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn create(
        game_id: Uuid,
        backend: Arc<dyn LiveGameBackend>,
        transport: Arc<dyn RealtimeTransport>,
        config: SyncConfig,
        clock: Arc<dyn Clock>,
    ) -> SharedGame {
        let notifications = NotificationHub::default();
        let time_sync =
            TimeSynchronizer::new(Arc::clone(&backend), clock, config.time_sync.clone());
        let registry = ConnectionRegistry::new(
            transport,
            config.connection.clone(),
            notifications.clone(),
        );
        let store = GameStateStore::new(
            game_id,
            Arc::clone(&backend),
            notifications.clone(),
            Throttle::new(config.state_refresh_throttle),
        );
        let countdown = CountdownEngine::new(
            Arc::clone(&time_sync),
            notifications.clone(),
            config.countdown_tick,
        );
        let checker = ScheduledGameChecker::new(
            Arc::clone(&backend),
            Arc::clone(&store),
            Throttle::new(config.checker_throttle),
        );
        let guard = AnswerSubmissionGuard::new(Arc::clone(&backend), config.min_answer_interval);
        let leaderboard = LeaderboardSync::new(
            game_id,
            Arc::clone(&backend),
            Throttle::new(config.leaderboard_throttle),
        );

        let game = Arc::new(Self {
            game_id,
            config,
            backend,
            notifications,
            time_sync,
            registry,
            store,
            countdown,
            checker,
            guard,
            leaderboard,
            scheduler: Scheduler::new(),
            destroyed: AtomicBool::new(false),
        });

        game.start();
        info!(%game_id, auto_start = game.config.auto_start, "live game sync started");
        game
    }

    fn start(&self) {
        self.time_sync.run_periodically();
        self.registry.start_heartbeat();

        self.pump_state_snapshots();
        self.pump_countdown();
        self.pump_notifications();
        self.subscribe_realtime();

        let store = Arc::clone(&self.store);
        let leaderboard = Arc::clone(&self.leaderboard);
        self.scheduler.spawn(async move {
            let _ = store.refresh(true).await;
            let _ = leaderboard.refresh().await;
        });

        let countdown = Arc::clone(&self.countdown);
        let store = Arc::clone(&self.store);
        self.checker.run_periodically(move || {
            countdown.remaining().or_else(|| {
                store
                    .snapshot()
                    .filter(|session| session.status == SessionStatus::Waiting)
                    .map(|session| u64::from(session.countdown_seconds))
            })
        });
    }

    fn subscribe_realtime(&self) {
        let sessions = Topic::table(SESSIONS_TABLE).with_filter(RowFilter::eq("id", self.game_id));
        let by_game = RowFilter::eq("game_id", self.game_id);
        let participants = Topic::table(PARTICIPANTS_TABLE).with_filter(by_game.clone());
        let answers = Topic::table(ANSWERS_TABLE).with_filter(by_game);

        let mut session_changes = self.registry.subscribe(sessions);
        let store = Arc::clone(&self.store);
        self.scheduler.spawn(async move {
            while let Some(change) = session_changes.recv().await {
                store.apply_change(&change);
            }
        });

        for topic in [participants, answers] {
            let mut changes = self.registry.subscribe(topic);
            let leaderboard = Arc::clone(&self.leaderboard);
            self.scheduler.spawn(async move {
                while changes.recv().await.is_some() {
                    leaderboard.notify_change();
                }
            });
        }
    }

    /// Keep the countdown anchored on waiting-room snapshots.
    fn pump_state_snapshots(&self) {
        let mut snapshots = self.store.watch();
        let countdown = Arc::clone(&self.countdown);
        self.scheduler.spawn(async move {
            let mut ticking = false;
            while snapshots.changed().await.is_ok() {
                let latest = snapshots.borrow_and_update().clone();
                let Some(session) = latest else {
                    continue;
                };

                countdown.sync_from_server(&session).await;
                if session.status == SessionStatus::Waiting {
                    if !ticking {
                        countdown.run();
                        ticking = true;
                    }
                } else {
                    ticking = false;
                }
            }
        });
    }

    /// Start the game, or nudge the server, when the countdown reaches zero.
    fn pump_countdown(&self) {
        let mut events = self.countdown.subscribe();
        let game_id = self.game_id;
        let auto_start = self.config.auto_start;
        let backend = Arc::clone(&self.backend);
        let store = Arc::clone(&self.store);
        let checker = Arc::clone(&self.checker);

        self.scheduler.spawn(async move {
            loop {
                match events.recv().await {
                    Ok(CountdownEvent::GameStart) if auto_start => {
                        info!(%game_id, "countdown over; starting game");
                        match backend.start_game(game_id).await {
                            Ok(started) => debug!(%game_id, started, "start requested"),
                            Err(err) => warn!(%game_id, error = %err, "failed to start game"),
                        }
                        let _ = store.refresh(true).await;
                    }
                    Ok(CountdownEvent::GameStart) => {
                        debug!(%game_id, "countdown over; waiting for the server to start");
                        let _ = checker.check_now().await;
                    }
                    Ok(_) | Err(RecvError::Lagged(_)) => {}
                    Err(RecvError::Closed) => break,
                }
            }
        });
    }

    /// Recover from connectivity notifications.
    fn pump_notifications(&self) {
        let mut notifications = self.notifications.subscribe();
        let store = Arc::clone(&self.store);
        let leaderboard = Arc::clone(&self.leaderboard);
        let time_sync = Arc::clone(&self.time_sync);

        self.scheduler.spawn(async move {
            loop {
                match notifications.recv().await {
                    Ok(Notification::StaleState { topic }) => {
                        debug!(%topic, "stale channel; forcing state refresh");
                        let _ = store.refresh(true).await;
                    }
                    Ok(Notification::ConnectionRestored) => {
                        time_sync.reset_attempts().await;
                        time_sync.sync().await;
                        let _ = store.refresh(true).await;
                        let _ = leaderboard.refresh().await;
                    }
                    Ok(_) => {}
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "notification listener lagged");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        });
    }

    /// Session followed by this handle.
    pub fn game_id(&self) -> Uuid {
        self.game_id
    }

    /// Configuration in use.
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Latest accepted session snapshot.
    pub fn snapshot(&self) -> Option<GameSession> {
        self.store.snapshot()
    }

    /// Receiver notified on every accepted snapshot.
    pub fn watch_state(&self) -> watch::Receiver<Option<GameSession>> {
        self.store.watch()
    }

    /// Receiver of status changes.
    pub fn on_transition(&self) -> broadcast::Receiver<StatusTransition> {
        self.store.on_transition()
    }

    /// Receiver of user-facing notifications.
    pub fn notifications(&self) -> broadcast::Receiver<Notification> {
        self.notifications.subscribe()
    }

    /// Whether the last state fetch failed.
    pub fn has_error(&self) -> bool {
        self.store.has_error()
    }

    /// Aggregate realtime connectivity.
    pub fn connection_status(&self) -> ConnectionStatus {
        self.registry.status()
    }

    /// Receiver of aggregate connectivity changes.
    pub fn watch_connection(&self) -> watch::Receiver<ConnectionStatus> {
        self.registry.watch_status()
    }

    /// Server-corrected current time in epoch milliseconds.
    pub fn now_ms(&self) -> i64 {
        self.time_sync.now_ms()
    }

    /// Seconds left before the scheduled start, while in the waiting room.
    pub fn countdown_remaining(&self) -> Option<u64> {
        self.countdown.remaining()
    }

    /// Receiver of countdown events.
    pub fn countdown_events(&self) -> broadcast::Receiver<CountdownEvent> {
        self.countdown.subscribe()
    }

    /// Current ranking.
    pub fn leaderboard(&self) -> Vec<LeaderboardEntry> {
        self.leaderboard.entries()
    }

    /// Receiver notified whenever the ranking changes.
    pub fn watch_leaderboard(&self) -> watch::Receiver<Vec<LeaderboardEntry>> {
        self.leaderboard.watch()
    }

    /// Fetch the session snapshot (throttled unless `force`).
    pub async fn refresh(&self, force: bool) -> Result<Option<GameSession>, SyncError> {
        self.store.refresh(force).await
    }

    /// Fetch the ranking (throttled).
    pub async fn refresh_leaderboard(&self) -> Result<Vec<LeaderboardEntry>, SyncError> {
        self.leaderboard.refresh().await
    }

    /// Ask the server to advance the session now (throttled).
    pub async fn check_now(&self) -> Result<CheckOutcome, SyncError> {
        self.checker.check_now().await
    }

    /// Submit an answer for `user_id`; a successful submission refreshes the
    /// snapshot and the ranking.
    pub async fn submit_answer(
        &self,
        user_id: Uuid,
        question_position: u32,
        option_id: Uuid,
        answer_time_ms: i64,
    ) -> Result<AnswerOutcome, SyncError> {
        let outcome = self
            .guard
            .try_submit(
                self.game_id,
                user_id,
                question_position,
                option_id,
                answer_time_ms,
            )
            .await?;

        if let Err(err) = self.store.refresh(false).await {
            debug!(error = %err, "state refresh after answer failed");
        }
        if let Err(err) = self.leaderboard.refresh().await {
            debug!(error = %err, "leaderboard refresh after answer failed");
        }
        Ok(outcome)
    }

    /// Administrative manual start.
    pub async fn start_game(&self) -> Result<bool, SyncError> {
        let started = self.backend.start_game(self.game_id).await?;
        info!(game_id = %self.game_id, started, "manual start requested");
        self.store.refresh(true).await?;
        Ok(started)
    }

    /// Move the session to its next status, or to `force_state`.
    pub async fn advance(&self, force_state: Option<SessionStatus>) -> Result<bool, SyncError> {
        let advanced = self
            .backend
            .advance_game_state(self.game_id, force_state)
            .await?;
        info!(
            game_id = %self.game_id,
            forced = force_state.map(SessionStatus::as_str),
            advanced,
            "advance requested"
        );
        self.store.refresh(true).await?;
        Ok(advanced)
    }

    /// Manual retry of every realtime channel, including exhausted ones.
    pub fn reconnect_all(&self) {
        self.registry.reconnect_all();
    }

    /// Stop every timer, close every realtime channel and forget local answer
    /// records.
    /// Safe to call repeatedly.
    pub fn destroy(&self) {
        if self.destroyed.swap(true, Ordering::AcqRel) {
            return;
        }

        self.scheduler.shutdown();
        self.checker.teardown();
        self.countdown.teardown();
        self.leaderboard.teardown();
        self.time_sync.teardown();
        self.registry.teardown();
        self.guard.clear_game(self.game_id);
        info!(game_id = %self.game_id, "live game sync destroyed");
    }

    /// Whether [`LiveGame::destroy`] has run.
    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::Acquire)
    }
}

impl Drop for LiveGame {
    fn drop(&mut self) {
        self.destroy();
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::json;

    use crate::{
        dao::realtime::LocalTransport,
        dto::realtime::{ChangeEvent, ChangeKind},
        error::RejectionReason,
        state::clock::{SystemClock, unix_ms},
        testing::{BASE_TIME, FakeBackend, row, session},
    };

    use super::*;

    const GAME: Uuid = Uuid::from_u128(0x5e55);
    const PLAYER: Uuid = Uuid::from_u128(0xa11ce);

    fn backend_waiting(countdown_seconds: u32) -> Arc<FakeBackend> {
        let backend = Arc::new(FakeBackend::default());
        *backend.server_time.lock().unwrap() = Some(unix_ms(BASE_TIME));
        backend.set_session(Some(session(
            GAME,
            SessionStatus::Waiting,
            0,
            countdown_seconds,
            0,
        )));
        backend
    }

    fn create(backend: &Arc<FakeBackend>, transport: &LocalTransport, auto_start: bool) -> SharedGame {
        LiveGame::create(
            GAME,
            Arc::clone(backend) as Arc<dyn LiveGameBackend>,
            Arc::new(transport.clone()),
            SyncConfig {
                auto_start,
                ..SyncConfig::default()
            },
            Arc::new(SystemClock::new()),
        )
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn create_loads_state_and_opens_channels() {
        let backend = backend_waiting(120);
        *backend.leaderboard.lock().unwrap() = vec![row("ada", 10), row("bob", 40)];
        let transport = LocalTransport::default();

        let game = create(&backend, &transport, false);
        settle().await;

        assert_eq!(
            game.snapshot().map(|session| session.status),
            Some(SessionStatus::Waiting)
        );
        assert_eq!(game.connection_status(), ConnectionStatus::Connected);
        assert_eq!(transport.open_count(), 3);
        assert_eq!(game.leaderboard().len(), 2);
        assert_eq!(game.leaderboard()[0].name, "bob");

        let remaining = game.countdown_remaining().unwrap();
        assert!((119..=120).contains(&remaining));

        game.destroy();
    }

    #[tokio::test(start_paused = true)]
    async fn countdown_end_starts_game_when_auto_start() {
        let backend = backend_waiting(5);
        let transport = LocalTransport::default();

        let game = create(&backend, &transport, true);
        tokio::time::sleep(Duration::from_secs(6)).await;

        assert_eq!(backend.calls("start_game"), 1);
        game.destroy();
    }

    #[tokio::test(start_paused = true)]
    async fn countdown_end_waits_for_server_without_auto_start() {
        let backend = backend_waiting(5);
        let transport = LocalTransport::default();

        let game = create(&backend, &transport, false);
        tokio::time::sleep(Duration::from_secs(6)).await;

        assert_eq!(backend.calls("start_game"), 0);
        assert!(backend.calls("check_scheduled_games") >= 1);
        game.destroy();
    }

    #[tokio::test(start_paused = true)]
    async fn pushed_session_change_moves_the_game_forward() {
        let backend = backend_waiting(300);
        let transport = LocalTransport::default();
        let game = create(&backend, &transport, false);
        settle().await;
        let mut notifications = game.notifications();

        transport.publish(ChangeEvent {
            table: SESSIONS_TABLE.into(),
            kind: ChangeKind::Update,
            record: Some(json!({
                "id": GAME,
                "status": "question",
                "current_question_index": 0,
                "countdown_seconds": 20,
                "started_at": "2026-03-01T18:00:10Z",
                "updated_at": "2026-03-01T18:00:10Z"
            })),
            old_record: None,
        });
        settle().await;

        assert_eq!(
            game.snapshot().map(|session| session.status),
            Some(SessionStatus::Question)
        );
        assert_eq!(notifications.recv().await.unwrap(), Notification::GameStarted);
        assert_eq!(game.countdown_remaining(), None);

        game.destroy();
    }

    #[tokio::test(start_paused = true)]
    async fn answer_events_refresh_the_leaderboard() {
        let backend = backend_waiting(300);
        let transport = LocalTransport::default();
        let game = create(&backend, &transport, false);
        settle().await;
        assert!(game.leaderboard().is_empty());

        *backend.leaderboard.lock().unwrap() = vec![row("cyd", 900)];
        transport.publish(ChangeEvent {
            table: ANSWERS_TABLE.into(),
            kind: ChangeKind::Insert,
            record: Some(json!({ "game_id": GAME, "user_id": PLAYER })),
            old_record: None,
        });
        tokio::time::sleep(Duration::from_millis(1_100)).await;

        assert_eq!(game.leaderboard().len(), 1);
        assert_eq!(game.leaderboard()[0].rank, 1);
        game.destroy();
    }

    #[tokio::test(start_paused = true)]
    async fn answers_go_through_the_guard() {
        let backend = backend_waiting(300);
        let transport = LocalTransport::default();
        let game = create(&backend, &transport, false);
        settle().await;

        let option = Uuid::from_u128(1);
        let outcome = game.submit_answer(PLAYER, 0, option, 3_200).await.unwrap();
        assert!(outcome.is_correct);

        let err = game.submit_answer(PLAYER, 0, option, 3_300).await.unwrap_err();
        assert_eq!(err.rejection(), Some(RejectionReason::AlreadyAnswered));
        assert_eq!(backend.calls("submit_answer"), 1);

        game.destroy();
    }

    #[tokio::test(start_paused = true)]
    async fn admin_calls_force_a_refresh() {
        let backend = backend_waiting(300);
        let transport = LocalTransport::default();
        let game = create(&backend, &transport, false);
        settle().await;
        let fetches = backend.calls("get_live_game_state");

        assert!(game.start_game().await.unwrap());
        assert!(game.advance(Some(SessionStatus::Finished)).await.unwrap());

        assert_eq!(backend.calls("get_live_game_state"), fetches + 2);
        assert_eq!(
            *backend.forced.lock().unwrap(),
            vec![Some(SessionStatus::Finished)]
        );
        game.destroy();
    }

    #[tokio::test(start_paused = true)]
    async fn destroy_is_idempotent_and_closes_everything() {
        let backend = backend_waiting(300);
        let transport = LocalTransport::default();
        let game = create(&backend, &transport, false);
        settle().await;

        game.destroy();
        game.destroy();
        assert!(game.is_destroyed());
        assert_eq!(game.connection_status(), ConnectionStatus::Disconnected);

        let polls = backend.calls("check_scheduled_games");
        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(backend.calls("check_scheduled_games"), polls);
    }
}
