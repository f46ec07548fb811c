use tokio::sync::broadcast;
use tracing::debug;

use crate::state::session_machine::{SessionStatus, StatusTransition};

/// Countdown marks that produce a notification when crossed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CountdownThreshold {
    /// Five minutes left.
    FiveMinutes,
    /// One minute left.
    OneMinute,
    /// Start is imminent.
    Imminent,
}

impl CountdownThreshold {
    /// Threshold value in seconds.
    pub fn seconds(self) -> u64 {
        match self {
            CountdownThreshold::FiveMinutes => 300,
            CountdownThreshold::OneMinute => 60,
            CountdownThreshold::Imminent => 10,
        }
    }
}

/// User-facing notification raised by the sync engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    /// The session left the waiting room.
    GameStarted,
    /// A question opened.
    QuestionStarted {
        /// Zero-based question index.
        question_index: u32,
    },
    /// Results of the current question are shown.
    ResultsShown {
        /// Zero-based question index.
        question_index: u32,
    },
    /// Intermediate leaderboard is shown.
    LeaderboardShown,
    /// The session is over.
    GameFinished,
    /// The waiting-room countdown crossed a threshold.
    CountdownThreshold(CountdownThreshold),
    /// A channel believed connected has been silent for too long.
    StaleState {
        /// Topic of the silent channel.
        topic: String,
    },
    /// Aggregate connectivity was lost.
    ConnectionLost,
    /// Aggregate connectivity came back after a loss.
    ConnectionRestored,
    /// A topic ran out of reconnection attempts; a manual retry is needed.
    ReconnectionExhausted {
        /// Topic that gave up.
        topic: String,
    },
}

impl Notification {
    /// Notification matching an accepted status change, if any.
    pub fn for_transition(transition: &StatusTransition) -> Option<Self> {
        if transition.previous == Some(transition.current) {
            return None;
        }

        let notification = match transition.current {
            SessionStatus::Waiting => return None,
            SessionStatus::Question
                if transition.previous.is_none_or(|p| p == SessionStatus::Waiting) =>
            {
                Notification::GameStarted
            }
            SessionStatus::Question => Notification::QuestionStarted {
                question_index: transition.question_index,
            },
            SessionStatus::Result => Notification::ResultsShown {
                question_index: transition.question_index,
            },
            SessionStatus::Leaderboard => Notification::LeaderboardShown,
            SessionStatus::Finished => Notification::GameFinished,
        };

        Some(notification)
    }
}

/// Broadcast hub fanning notifications out to every listener.
#[derive(Debug, Clone)]
pub struct NotificationHub {
    sender: broadcast::Sender<Notification>,
}

impl NotificationHub {
    /// Construct a hub backed by a Tokio broadcast channel with the given capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _receiver) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Register a new listener that will receive subsequent notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.sender.subscribe()
    }

    /// Send a notification to all current listeners, ignoring delivery errors.
    pub fn publish(&self, notification: Notification) {
        debug!(?notification, "publishing notification");
        let _ = self.sender.send(notification);
    }
}

impl Default for NotificationHub {
    fn default() -> Self {
        Self::new(64)
    }
}
