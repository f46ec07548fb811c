//! Local time sources used by the synchronizer and the countdown.

use std::sync::atomic::{AtomicI64, Ordering};

use time::OffsetDateTime;
use tokio::time::Instant;

/// Source of local wall-clock time in milliseconds since the Unix epoch.
pub trait Clock: Send + Sync {
    /// Current local time in epoch milliseconds.
    fn now_ms(&self) -> i64;
}

/// Wall clock sampled once, then advanced with the monotonic Tokio clock.
///
/// Local clock adjustments after construction do not move it, and paused Tokio
/// time drives it deterministically.
#[derive(Debug, Clone)]
pub struct SystemClock {
    anchor_ms: i64,
    anchor: Instant,
}

impl SystemClock {
    /// Anchor a new clock on the current wall-clock time.
    pub fn new() -> Self {
        let now = OffsetDateTime::now_utc();
        Self {
            anchor_ms: unix_ms(now),
            anchor: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now_ms(&self) -> i64 {
        let elapsed = Instant::now().saturating_duration_since(self.anchor);
        self.anchor_ms + i64::try_from(elapsed.as_millis()).unwrap_or(i64::MAX - self.anchor_ms)
    }
}

/// Clock whose value only changes when told to.
#[derive(Debug, Default)]
pub struct ManualClock {
    now_ms: AtomicI64,
}

impl ManualClock {
    /// Start the clock at `now_ms`.
    pub fn new(now_ms: i64) -> Self {
        Self {
            now_ms: AtomicI64::new(now_ms),
        }
    }

    /// Jump to an absolute time.
    pub fn set(&self, now_ms: i64) {
        self.now_ms.store(now_ms, Ordering::SeqCst);
    }

    /// Move forward (or backward for negative values).
    pub fn advance_ms(&self, delta_ms: i64) {
        self.now_ms.fetch_add(delta_ms, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> i64 {
        self.now_ms.load(Ordering::SeqCst)
    }
}

/// Milliseconds since the Unix epoch for `at`.
pub fn unix_ms(at: OffsetDateTime) -> i64 {
    i64::try_from(at.unix_timestamp_nanos() / 1_000_000).unwrap_or(i64::MAX)
}
