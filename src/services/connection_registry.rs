//! Realtime channel multiplexing, supervision and reconnection.
//!
//! Every distinct [`Topic`] maps to one transport channel shared by all of
//! its subscribers. A channel runs as one scheduled task per connection
//! attempt; a failed attempt schedules the next one with exponential backoff
//! until the attempt cap is reached. Channel tasks carry a generation number so
//! a superseded task can never write state after a restart.

use std::{
    collections::HashSet,
    sync::{
        Arc, Weak,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
    time::Duration,
};

use dashmap::{DashMap, mapref::entry::Entry};
use futures::StreamExt;
use serde::Serialize;
use tokio::{
    sync::{
        broadcast::{self, error::RecvError},
        watch,
    },
    time::Instant,
};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::{
    config::ConnectionConfig,
    dao::realtime::{RealtimeTransport, TransportEvent},
    dto::realtime::{ChangeEvent, Topic},
    state::{
        notifications::{Notification, NotificationHub},
        scheduler::{Scheduler, TaskHandle},
    },
};

const CHANNEL_CAPACITY: usize = 64;

/// Connectivity of one channel, or of the registry as a whole.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    /// Waiting for the subscription acknowledgement.
    Connecting,
    /// Subscription acknowledged and events flowing.
    Connected,
    /// Closed; a retry may be pending.
    Disconnected,
    /// Failed; a retry may be pending unless attempts are exhausted.
    Error,
}

/// Reduce channel statuses to the status shown to users.
///
/// Connected wins if any channel is connected; otherwise an error, then an
/// ongoing connection attempt; no channel at all reads as disconnected.
pub fn aggregate_status<I>(statuses: I) -> ConnectionStatus
where
    I: IntoIterator<Item = ConnectionStatus>,
{
    let mut errored = false;
    let mut connecting = false;
    for status in statuses {
        match status {
            ConnectionStatus::Connected => return ConnectionStatus::Connected,
            ConnectionStatus::Error => errored = true,
            ConnectionStatus::Connecting => connecting = true,
            ConnectionStatus::Disconnected => {}
        }
    }

    if errored {
        ConnectionStatus::Error
    } else if connecting {
        ConnectionStatus::Connecting
    } else {
        ConnectionStatus::Disconnected
    }
}

/// Delay before the retry following the `attempt`-th consecutive failure (1-based):
/// `min(max_delay, base_delay * 2^(attempt - 1))`, or `None` once the cap is exceeded.
pub fn next_retry_delay(config: &ConnectionConfig, attempt: u32) -> Option<Duration> {
    if attempt == 0 || attempt > config.max_reconnect_attempts {
        return None;
    }

    let factor = 1u32 << (attempt - 1).min(31);
    Some(config.base_delay.saturating_mul(factor).min(config.max_delay))
}

/// Identifies one logical subscriber of a topic.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SubscriptionHandle {
    id: Uuid,
    topic: Topic,
}

impl SubscriptionHandle {
    /// Topic the handle subscribes to.
    pub fn topic(&self) -> &Topic {
        &self.topic
    }
}

/// A logical subscription: its handle and the ordered queue of its events.
#[derive(Debug)]
pub struct TopicSubscription {
    handle: SubscriptionHandle,
    receiver: broadcast::Receiver<ChangeEvent>,
}

impl TopicSubscription {
    /// Handle to pass to [`ConnectionRegistry::unsubscribe`].
    pub fn handle(&self) -> &SubscriptionHandle {
        &self.handle
    }

    /// Next change for this topic; `None` once the channel is gone.
    ///
    /// A subscriber that falls behind skips the events it missed.
    pub async fn recv(&mut self) -> Option<ChangeEvent> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => return Some(event),
                Err(RecvError::Lagged(skipped)) => {
                    warn!(topic = %self.handle.topic, skipped, "subscriber lagged; skipping events");
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }
}

struct Channel {
    status: ConnectionStatus,
    last_activity: Instant,
    attempts: u32,
    generation: u64,
    stale_warned: bool,
    subscribers: HashSet<Uuid>,
    sender: broadcast::Sender<ChangeEvent>,
    task: Option<TaskHandle>,
}

impl Channel {
    fn new(sender: broadcast::Sender<ChangeEvent>) -> Self {
        Self {
            status: ConnectionStatus::Connecting,
            last_activity: Instant::now(),
            attempts: 0,
            generation: 0,
            stale_warned: false,
            subscribers: HashSet::new(),
            sender,
            task: None,
        }
    }

    fn touch(&mut self) {
        self.last_activity = Instant::now();
        self.stale_warned = false;
    }
}

/// Owner of every realtime channel of one client.
pub struct ConnectionRegistry {
    transport: Arc<dyn RealtimeTransport>,
    config: ConnectionConfig,
    channels: DashMap<Topic, Channel>,
    status: watch::Sender<ConnectionStatus>,
    notifications: NotificationHub,
    connectivity_lost: AtomicBool,
    torn_down: AtomicBool,
    /// Generations are unique across channels, including recreated ones.
    generations: AtomicU64,
    scheduler: Scheduler,
}

impl ConnectionRegistry {
    /// Create an empty registry; channels open on first subscription.
    pub fn new(
        transport: Arc<dyn RealtimeTransport>,
        config: ConnectionConfig,
        notifications: NotificationHub,
    ) -> Arc<Self> {
        let (status, _rx) = watch::channel(ConnectionStatus::Disconnected);
        Arc::new(Self {
            transport,
            config,
            channels: DashMap::new(),
            status,
            notifications,
            connectivity_lost: AtomicBool::new(false),
            torn_down: AtomicBool::new(false),
            generations: AtomicU64::new(0),
            scheduler: Scheduler::new(),
        })
    }

    /// Subscribe to `topic`, opening its channel if nobody listens to it yet.
    pub fn subscribe(self: &Arc<Self>, topic: Topic) -> TopicSubscription {
        let handle = SubscriptionHandle {
            id: Uuid::new_v4(),
            topic: topic.clone(),
        };

        if self.torn_down.load(Ordering::Acquire) {
            let (_sender, receiver) = broadcast::channel(1);
            return TopicSubscription { handle, receiver };
        }

        let (receiver, opened) = match self.channels.entry(topic.clone()) {
            Entry::Occupied(mut entry) => {
                let channel = entry.get_mut();
                channel.subscribers.insert(handle.id);
                (channel.sender.subscribe(), false)
            }
            Entry::Vacant(entry) => {
                let (sender, receiver) = broadcast::channel(CHANNEL_CAPACITY);
                let mut channel = Channel::new(sender);
                channel.subscribers.insert(handle.id);
                entry.insert(channel);
                (receiver, true)
            }
        };

        if opened {
            info!(%topic, "opening realtime channel");
            self.refresh_status();
            self.schedule_attempt(&topic, Duration::ZERO, false);
        } else {
            debug!(%topic, "sharing existing realtime channel");
        }

        TopicSubscription { handle, receiver }
    }

    /// Drop one subscriber; the channel closes with its last subscriber.
    pub fn unsubscribe(&self, handle: &SubscriptionHandle) {
        let now_empty = match self.channels.get_mut(&handle.topic) {
            Some(mut channel) => {
                channel.subscribers.remove(&handle.id);
                channel.subscribers.is_empty()
            }
            None => false,
        };

        if !now_empty {
            return;
        }

        if let Some((topic, channel)) = self
            .channels
            .remove_if(&handle.topic, |_, channel| channel.subscribers.is_empty())
        {
            if let Some(task) = channel.task {
                task.cancel();
            }
            info!(%topic, "closed realtime channel");
        }
        self.refresh_status();
    }

    /// Aggregate status of every channel.
    pub fn status(&self) -> ConnectionStatus {
        *self.status.borrow()
    }

    /// Receiver of aggregate status changes; drop it to stop listening.
    pub fn watch_status(&self) -> watch::Receiver<ConnectionStatus> {
        self.status.subscribe()
    }

    /// Status of the channel serving `topic`, if one is open.
    pub fn topic_status(&self, topic: &Topic) -> Option<ConnectionStatus> {
        self.channels.get(topic).map(|channel| channel.status)
    }

    /// Number of logical subscribers sharing `topic`.
    pub fn subscriber_count(&self, topic: &Topic) -> usize {
        self.channels
            .get(topic)
            .map_or(0, |channel| channel.subscribers.len())
    }

    /// Number of open channels.
    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    /// Reset every attempt counter and reconnect every channel now.
    ///
    /// This is the manual retry once a topic exhausted its attempts.
    pub fn reconnect_all(self: &Arc<Self>) {
        let topics: Vec<Topic> = self
            .channels
            .iter_mut()
            .map(|mut channel| {
                channel.attempts = 0;
                channel.key().clone()
            })
            .collect();

        info!(channels = topics.len(), "reconnecting all realtime channels");
        for topic in topics {
            self.schedule_attempt(&topic, Duration::ZERO, true);
        }
    }

    /// Start the periodic staleness check.
    pub fn start_heartbeat(self: &Arc<Self>) {
        let weak: Weak<Self> = Arc::downgrade(self);
        self.scheduler
            .schedule_every(self.config.heartbeat_interval, move || {
                let weak = weak.clone();
                async move {
                    if let Some(this) = weak.upgrade() {
                        this.check_staleness();
                    }
                }
            });
    }

    /// Close every channel and stop every timer. Safe to call repeatedly.
    pub fn teardown(&self) {
        if self.torn_down.swap(true, Ordering::AcqRel) {
            return;
        }

        self.scheduler.shutdown();
        self.channels.clear();
        self.refresh_status();
        info!("connection registry torn down");
    }

    fn check_staleness(self: &Arc<Self>) {
        let now = Instant::now();
        let mut warned = Vec::new();
        let mut stale = Vec::new();

        for mut channel in self.channels.iter_mut() {
            if channel.status != ConnectionStatus::Connected {
                continue;
            }

            let idle = now.saturating_duration_since(channel.last_activity);
            if idle > self.config.stale_warning_after && !channel.stale_warned {
                channel.stale_warned = true;
                warned.push((channel.key().clone(), idle));
            }
            if idle > self.config.stale_after {
                stale.push((channel.key().clone(), idle));
            }
        }

        for (topic, idle) in warned {
            warn!(%topic, idle_secs = idle.as_secs(), "no realtime activity on connected channel");
            self.notifications.publish(Notification::StaleState {
                topic: topic.to_string(),
            });
        }

        for (topic, idle) in stale {
            warn!(%topic, idle_secs = idle.as_secs(), "realtime channel stale; reconnecting");
            self.fail_channel(&topic, None, ConnectionStatus::Disconnected);
        }
    }

    /// Schedule a connection attempt for `topic` after `delay`.
    ///
    /// `supersede` cancels the task currently serving the topic; a task
    /// scheduling its own retry passes `false`.
    fn schedule_attempt(self: &Arc<Self>, topic: &Topic, delay: Duration, supersede: bool) {
        let generation = match self.channels.get_mut(topic) {
            Some(mut channel) => {
                channel.generation = self.next_generation();
                if supersede {
                    if let Some(task) = channel.task.take() {
                        task.cancel();
                    }
                }
                channel.generation
            }
            None => return,
        };

        let weak: Weak<Self> = Arc::downgrade(self);
        let target = topic.clone();
        let handle = self.scheduler.schedule_after(delay, async move {
            if let Some(this) = weak.upgrade() {
                this.run_channel(target, generation).await;
            }
        });

        match self.channels.get_mut(topic) {
            Some(mut channel) if channel.generation == generation => channel.task = Some(handle),
            _ => handle.cancel(),
        }
    }

    fn next_generation(&self) -> u64 {
        self.generations.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Apply `update` to the channel if `generation` still owns it
    /// (`None` applies unconditionally).
    fn with_channel<R>(
        &self,
        topic: &Topic,
        generation: Option<u64>,
        update: impl FnOnce(&mut Channel) -> R,
    ) -> Option<R> {
        let mut channel = self.channels.get_mut(topic)?;
        if generation.is_some_and(|generation| generation != channel.generation) {
            return None;
        }
        Some(update(&mut channel))
    }

    async fn run_channel(self: Arc<Self>, topic: Topic, generation: u64) {
        let current = Some(generation);
        if self
            .with_channel(&topic, current, |channel| {
                channel.status = ConnectionStatus::Connecting;
            })
            .is_none()
        {
            return;
        }
        self.refresh_status();

        let mut stream = match self.transport.open(&topic).await {
            Ok(stream) => stream,
            Err(err) => {
                warn!(%topic, error = %err, "failed to open realtime channel");
                self.fail_channel(&topic, current, ConnectionStatus::Error);
                return;
            }
        };

        while let Some(event) = stream.next().await {
            let owned = match event {
                TransportEvent::Subscribed => {
                    let acked = self.with_channel(&topic, current, |channel| {
                        channel.status = ConnectionStatus::Connected;
                        channel.attempts = 0;
                        channel.touch();
                    });
                    if acked.is_some() {
                        info!(%topic, "realtime channel connected");
                        self.refresh_status();
                    }
                    acked.is_some()
                }
                TransportEvent::Change(change) => self
                    .with_channel(&topic, current, |channel| {
                        channel.touch();
                        let _ = channel.sender.send(change);
                    })
                    .is_some(),
                TransportEvent::Heartbeat => self
                    .with_channel(&topic, current, Channel::touch)
                    .is_some(),
                TransportEvent::Error(reason) => {
                    warn!(%topic, %reason, "realtime channel error");
                    self.fail_channel(&topic, current, ConnectionStatus::Error);
                    return;
                }
                TransportEvent::Closed => {
                    info!(%topic, "realtime channel closed");
                    self.fail_channel(&topic, current, ConnectionStatus::Disconnected);
                    return;
                }
            };

            if !owned {
                debug!(%topic, generation, "superseded channel task exiting");
                return;
            }
        }

        info!(%topic, "realtime stream ended");
        self.fail_channel(&topic, current, ConnectionStatus::Disconnected);
    }

    /// Record a failure and schedule the next attempt, or give up.
    ///
    /// `generation` is `None` when the failure is detected outside the channel
    /// task (staleness), in which case the running task is superseded.
    fn fail_channel(
        self: &Arc<Self>,
        topic: &Topic,
        generation: Option<u64>,
        status: ConnectionStatus,
    ) {
        let Some(attempts) = self.with_channel(topic, generation, |channel| {
            channel.status = status;
            channel.attempts += 1;
            channel.attempts
        }) else {
            return;
        };
        self.refresh_status();

        match next_retry_delay(&self.config, attempts) {
            Some(delay) => {
                debug!(%topic, attempts, delay_ms = delay.as_millis() as u64, "scheduling reconnection");
                self.schedule_attempt(topic, delay, generation.is_none());
            }
            None => self.give_up(topic, attempts, generation.is_none()),
        }
    }

    fn give_up(&self, topic: &Topic, attempts: u32, cancel_running: bool) {
        let task = self.with_channel(topic, None, |channel| {
            channel.status = ConnectionStatus::Error;
            channel.generation = self.next_generation();
            channel.task.take()
        });
        if let Some(Some(task)) = task.filter(|_| cancel_running) {
            task.cancel();
        }
        self.refresh_status();

        error!(%topic, attempts, "realtime reconnection attempts exhausted");
        self.notifications
            .publish(Notification::ReconnectionExhausted {
                topic: topic.to_string(),
            });
    }

    fn refresh_status(&self) {
        let aggregate = aggregate_status(self.channels.iter().map(|channel| channel.status));

        let mut previous = aggregate;
        self.status.send_if_modified(|current| {
            previous = *current;
            if *current == aggregate {
                return false;
            }
            *current = aggregate;
            true
        });

        if previous == aggregate || self.torn_down.load(Ordering::Acquire) {
            return;
        }

        if previous == ConnectionStatus::Connected {
            self.connectivity_lost.store(true, Ordering::Release);
            warn!(status = ?aggregate, "realtime connectivity lost");
            self.notifications.publish(Notification::ConnectionLost);
        } else if aggregate == ConnectionStatus::Connected
            && self.connectivity_lost.swap(false, Ordering::AcqRel)
        {
            info!("realtime connectivity restored");
            self.notifications.publish(Notification::ConnectionRestored);
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use tokio::sync::broadcast::error::TryRecvError;

    use crate::{
        dao::realtime::LocalTransport,
        dto::realtime::{ChangeKind, RowFilter},
    };

    use super::*;

    fn registry(transport: &LocalTransport) -> (Arc<ConnectionRegistry>, NotificationHub) {
        let hub = NotificationHub::new(64);
        let registry = ConnectionRegistry::new(
            Arc::new(transport.clone()),
            ConnectionConfig::default(),
            hub.clone(),
        );
        (registry, hub)
    }

    fn answers_topic() -> Topic {
        Topic::table("answers").with_filter(RowFilter::eq("game_id", "g1"))
    }

    fn drain(receiver: &mut broadcast::Receiver<Notification>) -> Vec<Notification> {
        let mut seen = Vec::new();
        loop {
            match receiver.try_recv() {
                Ok(notification) => seen.push(notification),
                Err(TryRecvError::Lagged(_)) => continue,
                Err(_) => return seen,
            }
        }
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    #[test]
    fn backoff_sequence_doubles_then_caps() {
        let config = ConnectionConfig::default();
        let delays: Vec<u64> = (1..=10)
            .map(|attempt| next_retry_delay(&config, attempt).unwrap().as_millis() as u64)
            .collect();

        assert_eq!(
            delays,
            vec![500, 1000, 2000, 4000, 8000, 16000, 30000, 30000, 30000, 30000]
        );
        assert_eq!(next_retry_delay(&config, 11), None);
        assert_eq!(next_retry_delay(&config, 0), None);
    }

    #[test]
    fn aggregate_prefers_connected_then_error_then_connecting() {
        use ConnectionStatus::*;

        assert_eq!(aggregate_status([Error, Connected, Connecting]), Connected);
        assert_eq!(aggregate_status([Connecting, Error, Disconnected]), Error);
        assert_eq!(aggregate_status([Disconnected, Connecting]), Connecting);
        assert_eq!(aggregate_status([Disconnected]), Disconnected);
        assert_eq!(aggregate_status([]), Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn subscribers_of_one_topic_share_a_channel() {
        let transport = LocalTransport::default();
        let (registry, _hub) = registry(&transport);

        let mut first = registry.subscribe(answers_topic());
        let mut second = registry.subscribe(answers_topic());
        settle().await;

        assert_eq!(transport.open_count(), 1);
        assert_eq!(registry.subscriber_count(&answers_topic()), 2);
        assert_eq!(registry.status(), ConnectionStatus::Connected);

        let change = ChangeEvent {
            table: "answers".into(),
            kind: ChangeKind::Insert,
            record: Some(json!({ "game_id": "g1" })),
            old_record: None,
        };
        transport.publish(change.clone());
        assert_eq!(first.recv().await, Some(change.clone()));
        assert_eq!(second.recv().await, Some(change));

        registry.unsubscribe(first.handle());
        assert_eq!(registry.channel_count(), 1);
        registry.unsubscribe(second.handle());
        assert_eq!(registry.channel_count(), 0);
        assert_eq!(registry.status(), ConnectionStatus::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn recreated_channel_never_reuses_a_generation() {
        let transport = LocalTransport::default();
        let (registry, _hub) = registry(&transport);
        let generation = || {
            registry
                .channels
                .get(&answers_topic())
                .map(|channel| channel.generation)
                .unwrap()
        };

        let first = registry.subscribe(answers_topic());
        settle().await;
        let old = generation();
        registry.unsubscribe(first.handle());
        assert_eq!(registry.channel_count(), 0);

        let _second = registry.subscribe(answers_topic());
        settle().await;
        assert!(generation() > old);
        assert!(
            registry
                .with_channel(&answers_topic(), Some(old), Channel::touch)
                .is_none()
        );
        assert_eq!(registry.status(), ConnectionStatus::Connected);
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_channel_reconnects_with_single_notifications() {
        let transport = LocalTransport::default();
        let (registry, hub) = registry(&transport);
        let mut notifications = hub.subscribe();

        let _subscription = registry.subscribe(answers_topic());
        settle().await;
        assert_eq!(registry.status(), ConnectionStatus::Connected);
        assert!(drain(&mut notifications).is_empty());

        transport.drop_connections();
        settle().await;
        assert_eq!(
            registry.topic_status(&answers_topic()),
            Some(ConnectionStatus::Disconnected)
        );

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(registry.status(), ConnectionStatus::Connected);
        assert_eq!(transport.open_count(), 2);
        assert_eq!(
            drain(&mut notifications),
            vec![Notification::ConnectionLost, Notification::ConnectionRestored]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_topic_waits_for_manual_reconnect() {
        let transport = LocalTransport::default();
        transport.set_refusing(true);
        let (registry, hub) = registry(&transport);
        let mut notifications = hub.subscribe();
        let mut status = registry.watch_status();

        let _subscription = registry.subscribe(answers_topic());

        // Ten retries are scheduled: 500ms + 1s + 2s + 4s + 8s + 16s + 4 * 30s.
        tokio::time::sleep(Duration::from_millis(151_400)).await;
        assert!(drain(&mut notifications).is_empty());

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(
            drain(&mut notifications),
            vec![Notification::ReconnectionExhausted {
                topic: answers_topic().to_string()
            }]
        );
        assert_eq!(*status.borrow_and_update(), ConnectionStatus::Error);

        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(registry.status(), ConnectionStatus::Error);

        transport.set_refusing(false);
        registry.reconnect_all();
        settle().await;
        assert_eq!(registry.status(), ConnectionStatus::Connected);
        assert_eq!(transport.open_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn silent_channel_warns_then_reconnects() {
        let transport = LocalTransport::default();
        let (registry, hub) = registry(&transport);
        let mut notifications = hub.subscribe();

        let _subscription = registry.subscribe(answers_topic());
        registry.start_heartbeat();
        settle().await;

        // Checks run every 15s; idle time first exceeds 45s at the 60s check.
        tokio::time::sleep(Duration::from_secs(61)).await;
        assert_eq!(
            drain(&mut notifications),
            vec![Notification::StaleState {
                topic: answers_topic().to_string()
            }]
        );
        assert_eq!(transport.open_count(), 1);

        // At the 75s check idle time exceeds 60s; retry follows 500ms later.
        tokio::time::sleep(Duration::from_secs(15)).await;
        assert_eq!(transport.open_count(), 2);
        assert_eq!(registry.status(), ConnectionStatus::Connected);
    }

    #[tokio::test(start_paused = true)]
    async fn heartbeats_keep_channel_fresh() {
        let transport = LocalTransport::default();
        let (registry, hub) = registry(&transport);
        let mut notifications = hub.subscribe();

        let _subscription = registry.subscribe(answers_topic());
        registry.start_heartbeat();
        settle().await;

        for _ in 0..10 {
            tokio::time::sleep(Duration::from_secs(20)).await;
            transport.heartbeat();
        }
        settle().await;

        assert!(drain(&mut notifications).is_empty());
        assert_eq!(transport.open_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn teardown_closes_subscriptions_and_is_idempotent() {
        let transport = LocalTransport::default();
        let (registry, hub) = registry(&transport);
        let mut notifications = hub.subscribe();

        let mut subscription = registry.subscribe(answers_topic());
        settle().await;

        registry.teardown();
        registry.teardown();

        assert_eq!(subscription.recv().await, None);
        assert_eq!(registry.status(), ConnectionStatus::Disconnected);
        assert_eq!(registry.channel_count(), 0);
        assert!(drain(&mut notifications).is_empty());

        let mut late = registry.subscribe(answers_topic());
        assert_eq!(late.recv().await, None);
    }
}
