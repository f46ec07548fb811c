use std::{
    cmp::Ordering as CmpOrdering,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use tokio::sync::{broadcast, watch};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    dao::LiveGameBackend,
    dto::{
        realtime::{ChangeEvent, ChangeKind},
        session::GameSession,
    },
    error::SyncError,
    state::{
        notifications::{Notification, NotificationHub},
        session_machine::{StatusTransition, progress},
        throttle::Throttle,
    },
};

/// Whether `incoming` may replace `current`.
///
/// A snapshot for another session or with an older `updated_at` is refused.
/// When timestamps tie, the incoming snapshot wins only if it carries a
/// meaningful change and does not move the session backwards.
pub fn is_newer(incoming: &GameSession, current: Option<&GameSession>) -> bool {
    let Some(current) = current else {
        return true;
    };

    if incoming.id != current.id {
        return false;
    }

    match incoming.updated_at.cmp(&current.updated_at) {
        CmpOrdering::Less => false,
        CmpOrdering::Greater => true,
        CmpOrdering::Equal => {
            incoming.differs_meaningfully(current)
                && progress(incoming.current_question_index, incoming.status)
                    >= progress(current.current_question_index, current.status)
        }
    }
}

/// Latest accepted snapshot of one session.
///
/// Snapshots come from fetches and from realtime change events, in any order;
/// only those passing [`is_newer`] are kept. Readers either poll
/// [`GameStateStore::snapshot`] or watch it.
pub struct GameStateStore {
    game_id: Uuid,
    backend: Arc<dyn LiveGameBackend>,
    snapshot: watch::Sender<Option<GameSession>>,
    transitions: broadcast::Sender<StatusTransition>,
    notifications: NotificationHub,
    throttle: Throttle,
    has_error: AtomicBool,
}

impl GameStateStore {
    /// Empty store for `game_id`.
    pub fn new(
        game_id: Uuid,
        backend: Arc<dyn LiveGameBackend>,
        notifications: NotificationHub,
        throttle: Throttle,
    ) -> Arc<Self> {
        let (snapshot, _rx) = watch::channel(None);
        let (transitions, _rx) = broadcast::channel(32);
        Arc::new(Self {
            game_id,
            backend,
            snapshot,
            transitions,
            notifications,
            throttle,
            has_error: AtomicBool::new(false),
        })
    }

    /// Session tracked by the store.
    pub fn game_id(&self) -> Uuid {
        self.game_id
    }

    /// Latest accepted snapshot.
    pub fn snapshot(&self) -> Option<GameSession> {
        self.snapshot.borrow().clone()
    }

    /// Receiver notified on every accepted snapshot.
    pub fn watch(&self) -> watch::Receiver<Option<GameSession>> {
        self.snapshot.subscribe()
    }

    /// Receiver of status changes.
    pub fn on_transition(&self) -> broadcast::Receiver<StatusTransition> {
        self.transitions.subscribe()
    }

    /// Whether the last fetch failed.
    pub fn has_error(&self) -> bool {
        self.has_error.load(Ordering::Acquire)
    }

    /// Fetch the snapshot from the server.
    ///
    /// Without `force`, a fetch inside the throttle window is skipped and the
    /// current snapshot returned. A failed fetch keeps the current snapshot.
    pub async fn refresh(&self, force: bool) -> Result<Option<GameSession>, SyncError> {
        if force {
            self.throttle.force_acquire();
        } else if !self.throttle.try_acquire() {
            debug!(game_id = %self.game_id, "state refresh throttled");
            return Ok(self.snapshot());
        }

        match self.backend.get_live_game_state(self.game_id).await {
            Ok(Some(session)) => {
                self.has_error.store(false, Ordering::Release);
                self.apply(session);
            }
            Ok(None) => {
                self.has_error.store(false, Ordering::Release);
                warn!(game_id = %self.game_id, "live game not found");
            }
            Err(err) => {
                self.has_error.store(true, Ordering::Release);
                warn!(game_id = %self.game_id, error = %err, "failed to fetch live game state");
                return Err(err.into());
            }
        }

        Ok(self.snapshot())
    }

    /// Offer a snapshot; returns whether it was accepted.
    pub fn apply(&self, session: GameSession) -> bool {
        if session.id != self.game_id {
            debug!(game_id = %self.game_id, other = %session.id, "ignoring snapshot of another game");
            return false;
        }

        let status = session.status;
        let question_index = session.current_question_index;
        let mut incoming = Some(session);
        let mut previous = None;

        let accepted = self.snapshot.send_if_modified(|current| {
            let newer = incoming
                .as_ref()
                .is_some_and(|session| is_newer(session, current.as_ref()));
            if !newer {
                return false;
            }
            previous = current.as_ref().map(|session| session.status);
            *current = incoming.take();
            true
        });

        if !accepted {
            debug!(game_id = %self.game_id, status = status.as_str(), "discarding stale snapshot");
            return false;
        }

        if previous != Some(status) {
            let transition = StatusTransition {
                previous,
                current: status,
                question_index,
            };
            if !transition.is_forward() {
                warn!(
                    game_id = %self.game_id,
                    from = ?previous,
                    to = status.as_str(),
                    "session skipped the regular flow"
                );
            }
            info!(
                game_id = %self.game_id,
                from = previous.map(|status| status.as_str()),
                to = status.as_str(),
                question_index,
                "session status changed"
            );
            let _ = self.transitions.send(transition);
            if let Some(notification) = Notification::for_transition(&transition) {
                self.notifications.publish(notification);
            }
        }

        true
    }

    /// Offer the row carried by a realtime change; deletions are ignored.
    pub fn apply_change(&self, event: &ChangeEvent) -> bool {
        if event.kind == ChangeKind::Delete {
            debug!(game_id = %self.game_id, "ignoring session deletion");
            return false;
        }

        let Some(record) = &event.record else {
            return false;
        };

        match serde_json::from_value::<GameSession>(record.clone()) {
            Ok(session) => self.apply(session),
            Err(err) => {
                warn!(game_id = %self.game_id, error = %err, "undecodable session change");
                false
            }
        }
    }
}
