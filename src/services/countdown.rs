use std::{
    collections::HashSet,
    sync::{Arc, Mutex, PoisonError, Weak},
    time::Duration,
};

use tokio::sync::broadcast;
use tracing::{debug, info};

use crate::{
    dto::session::GameSession,
    services::time_sync::TimeSynchronizer,
    state::{
        notifications::{CountdownThreshold, Notification, NotificationHub},
        scheduler::{Scheduler, TaskHandle},
        session_machine::SessionStatus,
    },
};

const THRESHOLDS: [CountdownThreshold; 3] = [
    CountdownThreshold::FiveMinutes,
    CountdownThreshold::OneMinute,
    CountdownThreshold::Imminent,
];

/// Output of the waiting-room countdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CountdownEvent {
    /// Whole seconds left, emitted when the value changes.
    Remaining(u64),
    /// A threshold was crossed.
    Threshold(CountdownThreshold),
    /// The countdown reached zero.
    GameStart,
}

#[derive(Debug, Default)]
struct CountdownState {
    target_ms: Option<i64>,
    last_remaining: Option<u64>,
    fired: HashSet<CountdownThreshold>,
    started: bool,
}

/// Waiting-room countdown ticking against the server-corrected clock.
///
/// The engine keeps a target instant rather than a counter, so a late tick
/// never drifts and re-syncing only moves the target.
pub struct CountdownEngine {
    clock: Arc<TimeSynchronizer>,
    notifications: NotificationHub,
    tick_every: Duration,
    state: Mutex<CountdownState>,
    events: broadcast::Sender<CountdownEvent>,
    scheduler: Scheduler,
    ticker: Mutex<Option<TaskHandle>>,
}

fn whole_seconds_left(target_ms: i64, now_ms: i64) -> u64 {
    let left = target_ms - now_ms;
    if left <= 0 {
        0
    } else {
        (left as u64).div_ceil(1000)
    }
}

impl CountdownEngine {
    /// Idle engine; nothing ticks until [`CountdownEngine::start`].
    pub fn new(
        clock: Arc<TimeSynchronizer>,
        notifications: NotificationHub,
        tick_every: Duration,
    ) -> Arc<Self> {
        let (events, _rx) = broadcast::channel(64);
        Arc::new(Self {
            clock,
            notifications,
            tick_every,
            state: Mutex::new(CountdownState::default()),
            events,
            scheduler: Scheduler::new(),
            ticker: Mutex::new(None),
        })
    }

    /// Receiver of countdown events.
    pub fn subscribe(&self) -> broadcast::Receiver<CountdownEvent> {
        self.events.subscribe()
    }

    /// Seconds left, `None` when no countdown runs.
    pub fn remaining(&self) -> Option<u64> {
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state
            .target_ms
            .map(|target| whole_seconds_left(target, self.clock.now_ms()))
    }

    /// Restart the countdown with `seconds` left. Thresholds may fire again.
    pub fn start(&self, seconds: u64) {
        let target = self.clock.now_ms() + (seconds as i64) * 1000;
        {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            *state = CountdownState {
                target_ms: Some(target),
                last_remaining: Some(seconds),
                ..CountdownState::default()
            };
        }
        info!(seconds, "countdown started");
        let _ = self.events.send(CountdownEvent::Remaining(seconds));
    }

    /// Re-anchor the countdown on a server snapshot.
    ///
    /// Refreshes the clock offset first; the target becomes the corrected
    /// now plus the pushed `countdown_seconds`. A snapshot outside the waiting
    /// room stops the countdown.
    pub async fn sync_from_server(&self, session: &GameSession) {
        if session.status != SessionStatus::Waiting {
            self.stop();
            return;
        }

        self.clock.sync().await;
        let seconds = u64::from(session.countdown_seconds);
        let target = self.clock.now_ms() + (seconds as i64) * 1000;

        let fresh = {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            let fresh = state.target_ms.is_none();
            if fresh {
                *state = CountdownState {
                    last_remaining: Some(seconds),
                    ..CountdownState::default()
                };
            }
            state.target_ms = Some(target);
            fresh
        };

        debug!(seconds, fresh, "countdown re-anchored on server snapshot");
        if fresh {
            let _ = self.events.send(CountdownEvent::Remaining(seconds));
        }
    }

    /// Evaluate the countdown once; returns the seconds left.
    pub fn tick(&self) -> Option<u64> {
        let now = self.clock.now_ms();
        let mut emitted = Vec::new();

        let remaining = {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            let target = state.target_ms?;
            let remaining = whole_seconds_left(target, now);
            let previous = state.last_remaining.unwrap_or(remaining);

            for threshold in THRESHOLDS {
                let mark = threshold.seconds();
                if previous > mark && remaining <= mark && state.fired.insert(threshold) {
                    emitted.push(CountdownEvent::Threshold(threshold));
                }
            }

            if previous != remaining {
                emitted.push(CountdownEvent::Remaining(remaining));
            }
            state.last_remaining = Some(remaining);

            if remaining == 0 && !state.started {
                state.started = true;
                emitted.push(CountdownEvent::GameStart);
            }
            remaining
        };

        for event in emitted {
            match event {
                CountdownEvent::Threshold(threshold) => {
                    info!(seconds = threshold.seconds(), "countdown threshold crossed");
                    self.notifications
                        .publish(Notification::CountdownThreshold(threshold));
                }
                CountdownEvent::GameStart => info!("countdown finished"),
                CountdownEvent::Remaining(_) => {}
            }
            let _ = self.events.send(event);
        }

        Some(remaining)
    }

    /// Tick periodically until [`CountdownEngine::stop`].
    pub fn run(self: &Arc<Self>) {
        let weak: Weak<Self> = Arc::downgrade(self);
        let handle = self.scheduler.schedule_every(self.tick_every, move || {
            let weak = weak.clone();
            async move {
                if let Some(this) = weak.upgrade() {
                    this.tick();
                }
            }
        });

        let mut ticker = self.ticker.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(previous) = ticker.replace(handle) {
            previous.cancel();
        }
    }

    /// Stop ticking and forget the target.
    pub fn stop(&self) {
        if let Some(ticker) = self
            .ticker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            ticker.cancel();
        }

        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if state.target_ms.take().is_some() {
            debug!("countdown stopped");
        }
    }

    /// Stop and refuse any further ticking. Safe to call repeatedly.
    pub fn teardown(&self) {
        self.stop();
        self.scheduler.shutdown();
    }
}
