use std::sync::{
    Arc, Weak,
    atomic::{AtomicBool, Ordering},
};

use indexmap::IndexMap;
use tokio::sync::watch;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    dao::LiveGameBackend,
    dto::leaderboard::{LeaderboardEntry, LeaderboardRow},
    error::SyncError,
    state::{scheduler::Scheduler, throttle::Throttle},
};

/// Rank a full player set: points descending, ties kept in input order,
/// ranks contiguous from 1. A player listed twice keeps its first position
/// and its last values.
pub fn build_leaderboard(rows: Vec<LeaderboardRow>) -> Vec<LeaderboardEntry> {
    let mut players: IndexMap<Uuid, LeaderboardRow> = IndexMap::with_capacity(rows.len());
    for row in rows {
        players.insert(row.user_id, row);
    }

    let mut ordered: Vec<LeaderboardRow> = players.into_values().collect();
    ordered.sort_by(|a, b| b.total_points.cmp(&a.total_points));

    ordered
        .into_iter()
        .zip(1u32..)
        .map(|(row, rank)| LeaderboardEntry {
            user_id: row.user_id,
            name: row.name,
            points: row.total_points,
            rank,
            last_answer_outcome: row.last_answer_outcome,
        })
        .collect()
}

/// Ranked player list of one session, rebuilt wholesale on every fetch.
///
/// Realtime answer events only trigger a fetch; rank depends on the whole
/// player set so events never patch the list.
pub struct LeaderboardSync {
    game_id: Uuid,
    backend: Arc<dyn LiveGameBackend>,
    throttle: Throttle,
    entries: watch::Sender<Vec<LeaderboardEntry>>,
    trailing: AtomicBool,
    scheduler: Scheduler,
}

impl LeaderboardSync {
    /// Empty leaderboard for `game_id`.
    pub fn new(game_id: Uuid, backend: Arc<dyn LiveGameBackend>, throttle: Throttle) -> Arc<Self> {
        let (entries, _rx) = watch::channel(Vec::new());
        Arc::new(Self {
            game_id,
            backend,
            throttle,
            entries,
            trailing: AtomicBool::new(false),
            scheduler: Scheduler::new(),
        })
    }

    /// Current ranking.
    pub fn entries(&self) -> Vec<LeaderboardEntry> {
        self.entries.borrow().clone()
    }

    /// Receiver notified whenever the ranking changes.
    pub fn watch(&self) -> watch::Receiver<Vec<LeaderboardEntry>> {
        self.entries.subscribe()
    }

    /// Fetch and rank the players; inside the throttle window the current
    /// ranking is returned untouched.
    pub async fn refresh(&self) -> Result<Vec<LeaderboardEntry>, SyncError> {
        if !self.throttle.try_acquire() {
            debug!(game_id = %self.game_id, "leaderboard refresh throttled");
            return Ok(self.entries());
        }

        let rows = match self.backend.get_leaderboard(self.game_id).await {
            Ok(rows) => rows,
            Err(err) => {
                warn!(game_id = %self.game_id, error = %err, "failed to fetch leaderboard");
                return Err(err.into());
            }
        };

        let ranked = build_leaderboard(rows);
        let players = ranked.len();
        let changed = self.entries.send_if_modified(|current| {
            if *current == ranked {
                return false;
            }
            current.clone_from(&ranked);
            true
        });
        if changed {
            info!(game_id = %self.game_id, players, "leaderboard updated");
        }

        Ok(ranked)
    }

    /// React to a pushed change: refresh once the throttle window allows.
    ///
    /// Bursts collapse into a single trailing refresh. A trailing refresh
    /// lost to a network failure is retried once.
    pub fn notify_change(self: &Arc<Self>) {
        self.schedule_trailing(true);
    }

    fn schedule_trailing(self: &Arc<Self>, retry_on_failure: bool) {
        if self.trailing.swap(true, Ordering::AcqRel) {
            return;
        }

        let delay = self.throttle.remaining();
        debug!(game_id = %self.game_id, delay_ms = delay.as_millis() as u64, "leaderboard refresh scheduled");

        let weak: Weak<Self> = Arc::downgrade(self);
        self.scheduler.schedule_after(delay, async move {
            let Some(this) = weak.upgrade() else {
                return;
            };
            this.trailing.store(false, Ordering::Release);
            if let Err(err) = this.refresh().await {
                if retry_on_failure && err.is_transient() {
                    debug!(game_id = %this.game_id, "retrying failed leaderboard refresh");
                    this.schedule_trailing(false);
                }
            }
        });
    }

    /// Drop any pending refresh. Safe to call repeatedly.
    pub fn teardown(&self) {
        self.scheduler.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use crate::testing::{FakeBackend, row};

    use super::*;

    const GAME: Uuid = Uuid::from_u128(21);

    fn sync(backend: &Arc<FakeBackend>) -> Arc<LeaderboardSync> {
        LeaderboardSync::new(
            GAME,
            Arc::clone(backend) as Arc<dyn LiveGameBackend>,
            Throttle::new(Duration::from_secs(1)),
        )
    }

    fn names(entries: &[LeaderboardEntry]) -> Vec<&str> {
        entries.iter().map(|entry| entry.name.as_str()).collect()
    }

    #[test]
    fn ranking_is_sorted_with_contiguous_ranks() {
        let entries = build_leaderboard(vec![
            row("ada", 300),
            row("bob", 900),
            row("cyd", 300),
            row("dee", 0),
            row("eve", 1200),
        ]);

        assert_eq!(names(&entries), vec!["eve", "bob", "ada", "cyd", "dee"]);
        let ranks: Vec<u32> = entries.iter().map(|entry| entry.rank).collect();
        assert_eq!(ranks, vec![1, 2, 3, 4, 5]);
        assert!(entries.windows(2).all(|pair| pair[0].points >= pair[1].points));
    }

    #[test]
    fn empty_player_set_yields_empty_ranking() {
        assert!(build_leaderboard(Vec::new()).is_empty());
    }

    #[test]
    fn duplicated_player_keeps_latest_points() {
        let first = row("ada", 100);
        let mut again = first.clone();
        again.total_points = 700;

        let entries = build_leaderboard(vec![first, row("bob", 400), again]);
        assert_eq!(names(&entries), vec!["ada", "bob"]);
        assert_eq!(entries[0].points, 700);
    }

    #[tokio::test(start_paused = true)]
    async fn refresh_is_throttled_to_one_per_second() {
        let backend = Arc::new(FakeBackend::default());
        *backend.leaderboard.lock().unwrap() = vec![row("ada", 10), row("bob", 20)];
        let sync = sync(&backend);
        let mut watcher = sync.watch();

        let entries = sync.refresh().await.unwrap();
        assert_eq!(names(&entries), vec!["bob", "ada"]);
        assert!(watcher.has_changed().unwrap());

        sync.refresh().await.unwrap();
        assert_eq!(backend.calls("get_leaderboard"), 1);

        tokio::time::advance(Duration::from_secs(1)).await;
        sync.refresh().await.unwrap();
        assert_eq!(backend.calls("get_leaderboard"), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn pushed_changes_collapse_into_one_trailing_refresh() {
        let backend = Arc::new(FakeBackend::default());
        let sync = sync(&backend);

        sync.refresh().await.unwrap();
        *backend.leaderboard.lock().unwrap() = vec![row("ada", 500)];
        for _ in 0..5 {
            sync.notify_change();
        }

        tokio::time::sleep(Duration::from_millis(1_100)).await;
        assert_eq!(backend.calls("get_leaderboard"), 2);
        assert_eq!(names(&sync.entries()), vec!["ada"]);

        sync.notify_change();
        tokio::time::sleep(Duration::from_millis(1_100)).await;
        assert_eq!(backend.calls("get_leaderboard"), 3);

        sync.teardown();
        sync.notify_change();
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(backend.calls("get_leaderboard"), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_trailing_refresh_is_retried_once() {
        let backend = Arc::new(FakeBackend::default());
        let sync = sync(&backend);

        sync.refresh().await.unwrap();
        *backend.leaderboard.lock().unwrap() = vec![row("ada", 500)];
        *backend.leaderboard_failures.lock().unwrap() = 1;
        sync.notify_change();

        tokio::time::sleep(Duration::from_millis(1_100)).await;
        assert_eq!(backend.calls("get_leaderboard"), 2);
        assert!(sync.entries().is_empty());

        tokio::time::sleep(Duration::from_millis(1_100)).await;
        assert_eq!(backend.calls("get_leaderboard"), 3);
        assert_eq!(names(&sync.entries()), vec!["ada"]);
    }

    #[tokio::test(start_paused = true)]
    async fn repeated_failures_stop_after_one_retry() {
        let backend = Arc::new(FakeBackend::default());
        let sync = sync(&backend);
        *backend.leaderboard_failures.lock().unwrap() = 10;

        sync.notify_change();
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(backend.calls("get_leaderboard"), 2);
    }
}
