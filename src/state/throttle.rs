use std::{
    sync::{Mutex, PoisonError},
    time::Duration,
};

use tokio::time::Instant;

/// "At most once per window" gate shared by the refresh paths.
#[derive(Debug)]
pub struct Throttle {
    window: Duration,
    last: Mutex<Option<Instant>>,
}

impl Throttle {
    /// Gate allowing one pass per `window`.
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            last: Mutex::new(None),
        }
    }

    /// Length of the window.
    pub fn window(&self) -> Duration {
        self.window
    }

    /// Claim the gate if the window since the last pass has elapsed.
    pub fn try_acquire(&self) -> bool {
        let now = Instant::now();
        let mut last = self.last.lock().unwrap_or_else(PoisonError::into_inner);
        match *last {
            Some(previous) if now.saturating_duration_since(previous) < self.window => false,
            _ => {
                *last = Some(now);
                true
            }
        }
    }

    /// Claim the gate unconditionally, restarting the window.
    pub fn force_acquire(&self) {
        let mut last = self.last.lock().unwrap_or_else(PoisonError::into_inner);
        *last = Some(Instant::now());
    }

    /// Time left before the gate opens again.
    pub fn remaining(&self) -> Duration {
        let last = self.last.lock().unwrap_or_else(PoisonError::into_inner);
        match *last {
            Some(previous) => self
                .window
                .saturating_sub(Instant::now().saturating_duration_since(previous)),
            None => Duration::ZERO,
        }
    }
}
