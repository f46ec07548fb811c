use std::sync::{
    Arc, Weak,
    atomic::{AtomicI64, Ordering},
};

use tokio::{sync::Mutex, time::Instant};
use tracing::{debug, info, warn};

use crate::{
    config::TimeSyncConfig,
    dao::LiveGameBackend,
    state::{clock::Clock, scheduler::Scheduler},
};

/// Snapshot of the synchronizer bookkeeping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClockOffset {
    /// Server clock minus local clock, in milliseconds.
    pub offset_ms: i64,
    /// When the last successful round trip completed.
    pub last_sync_at: Option<Instant>,
    /// Failed round trips since the last success.
    pub attempts_since_success: u32,
}

#[derive(Debug, Default)]
struct Bookkeeping {
    last_attempt_at: Option<Instant>,
    last_sync_at: Option<Instant>,
    attempts_since_success: u32,
}

/// Estimates the offset between the local and the server clock.
///
/// The offset comes from a single round trip:
/// `offset = server_time - local_time_at_request`. Failures never surface to
/// callers; [`TimeSynchronizer::now_ms`] keeps using the last known offset.
pub struct TimeSynchronizer {
    backend: Arc<dyn LiveGameBackend>,
    clock: Arc<dyn Clock>,
    config: TimeSyncConfig,
    offset_ms: AtomicI64,
    bookkeeping: Mutex<Bookkeeping>,
    scheduler: Scheduler,
}

impl TimeSynchronizer {
    /// Build a synchronizer starting with a zero offset.
    pub fn new(
        backend: Arc<dyn LiveGameBackend>,
        clock: Arc<dyn Clock>,
        config: TimeSyncConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            backend,
            clock,
            config,
            offset_ms: AtomicI64::new(0),
            bookkeeping: Mutex::new(Bookkeeping::default()),
            scheduler: Scheduler::new(),
        })
    }

    /// Server-corrected current time in epoch milliseconds.
    pub fn now_ms(&self) -> i64 {
        self.clock.now_ms() + self.offset_ms()
    }

    /// Last known offset in milliseconds.
    pub fn offset_ms(&self) -> i64 {
        self.offset_ms.load(Ordering::Acquire)
    }

    /// Current bookkeeping values.
    pub async fn offset(&self) -> ClockOffset {
        let book = self.bookkeeping.lock().await;
        ClockOffset {
            offset_ms: self.offset_ms(),
            last_sync_at: book.last_sync_at,
            attempts_since_success: book.attempts_since_success,
        }
    }

    /// Refresh the offset with one round trip and return the offset in use.
    ///
    /// Skipped (returning the current offset) when the previous attempt is
    /// younger than the minimum interval or when the attempt cap is reached.
    pub async fn sync(&self) -> i64 {
        let mut book = self.bookkeeping.lock().await;
        let current = self.offset_ms();

        if book
            .last_attempt_at
            .is_some_and(|last| last.elapsed() < self.config.min_interval)
        {
            debug!(offset_ms = current, "clock sync skipped; last attempt too recent");
            return current;
        }

        if book.attempts_since_success >= self.config.max_attempts {
            debug!(
                offset_ms = current,
                attempts = book.attempts_since_success,
                "clock sync skipped; attempt cap reached"
            );
            return current;
        }

        book.attempts_since_success += 1;
        book.last_attempt_at = Some(Instant::now());
        let local_ms = self.clock.now_ms();

        match self.backend.server_time().await {
            Ok(server_ms) => {
                let offset = server_ms - local_ms;
                self.offset_ms.store(offset, Ordering::Release);
                book.attempts_since_success = 0;
                book.last_sync_at = Some(Instant::now());
                info!(offset_ms = offset, "clock offset synchronized");
                offset
            }
            Err(err) => {
                warn!(
                    error = %err,
                    attempt = book.attempts_since_success,
                    offset_ms = current,
                    "clock sync failed; keeping previous offset"
                );
                current
            }
        }
    }

    /// Lift the attempt cap so the next [`TimeSynchronizer::sync`] may run.
    pub async fn reset_attempts(&self) {
        let mut book = self.bookkeeping.lock().await;
        book.attempts_since_success = 0;
    }

    /// Sync now, then keep the offset fresh in the background.
    pub fn run_periodically(self: &Arc<Self>) {
        let weak: Weak<Self> = Arc::downgrade(self);
        let first = weak.clone();
        self.scheduler.spawn(async move {
            if let Some(this) = first.upgrade() {
                this.sync().await;
            }
        });
        self.scheduler
            .schedule_every(self.config.refresh_interval, move || {
                let weak = weak.clone();
                async move {
                    if let Some(this) = weak.upgrade() {
                        this.sync().await;
                    }
                }
            });
    }

    /// Stop the background refresh. Safe to call repeatedly.
    pub fn teardown(&self) {
        self.scheduler.shutdown();
    }
}
