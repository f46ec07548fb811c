use std::sync::{
    Arc,
    atomic::{AtomicBool, AtomicUsize, Ordering},
};

use futures::{FutureExt, StreamExt, future::BoxFuture};
use tokio::sync::broadcast::{self, error::RecvError};

use crate::dto::realtime::{ChangeEvent, Topic};

use super::{EventStream, RealtimeTransport, TransportError, TransportEvent};

#[derive(Debug, Clone)]
enum Control {
    Heartbeat,
    Drop,
    Fail(String),
}

enum Step {
    Emit(TransportEvent),
    Skip,
    End(TransportEvent),
}

/// In-process transport: changes published here reach every open channel
/// whose topic matches.
///
/// Useful to embed the engine next to a server in the same process, and to
/// drive connection failures deterministically.
#[derive(Clone)]
pub struct LocalTransport {
    inner: Arc<LocalInner>,
}

struct LocalInner {
    changes: broadcast::Sender<ChangeEvent>,
    control: broadcast::Sender<Control>,
    refusing: AtomicBool,
    opened: AtomicUsize,
}

impl LocalTransport {
    /// Create a transport with room for `capacity` undelivered changes per channel.
    pub fn new(capacity: usize) -> Self {
        let (changes, _) = broadcast::channel(capacity);
        let (control, _) = broadcast::channel(16);
        Self {
            inner: Arc::new(LocalInner {
                changes,
                control,
                refusing: AtomicBool::new(false),
                opened: AtomicUsize::new(0),
            }),
        }
    }

    /// Push a change to every open channel; returns how many channels saw it.
    pub fn publish(&self, event: ChangeEvent) -> usize {
        self.inner.changes.send(event).unwrap_or(0)
    }

    /// Send a keep-alive on every open channel.
    pub fn heartbeat(&self) {
        let _ = self.inner.control.send(Control::Heartbeat);
    }

    /// Close every open channel cleanly.
    pub fn drop_connections(&self) {
        let _ = self.inner.control.send(Control::Drop);
    }

    /// Fail every open channel with `reason`.
    pub fn fail_connections(&self, reason: impl Into<String>) {
        let _ = self.inner.control.send(Control::Fail(reason.into()));
    }

    /// Refuse (or accept again) new subscriptions.
    pub fn set_refusing(&self, refusing: bool) {
        self.inner.refusing.store(refusing, Ordering::SeqCst);
    }

    /// Number of channels opened so far, refused attempts excluded.
    pub fn open_count(&self) -> usize {
        self.inner.opened.load(Ordering::SeqCst)
    }
}

impl Default for LocalTransport {
    fn default() -> Self {
        Self::new(256)
    }
}

impl RealtimeTransport for LocalTransport {
    fn open(&self, topic: &Topic) -> BoxFuture<'static, Result<EventStream, TransportError>> {
        if self.inner.refusing.load(Ordering::SeqCst) {
            let refused = TransportError::Refused {
                topic: topic.to_string(),
                reason: "transport is refusing subscriptions".into(),
            };
            return futures::future::ready(Err(refused)).boxed();
        }

        self.inner.opened.fetch_add(1, Ordering::SeqCst);
        // Receivers exist before the ack is yielded so no change published
        // after `open` returns can be missed.
        let mut changes = self.inner.changes.subscribe();
        let mut control = self.inner.control.subscribe();
        let topic = topic.clone();

        let stream = async_stream::stream! {
            yield TransportEvent::Subscribed;
            loop {
                let step = tokio::select! {
                    change = changes.recv() => match change {
                        Ok(event) if topic.matches(&event) => Step::Emit(TransportEvent::Change(event)),
                        Ok(_) | Err(RecvError::Lagged(_)) => Step::Skip,
                        Err(RecvError::Closed) => Step::End(TransportEvent::Closed),
                    },
                    signal = control.recv() => match signal {
                        Ok(Control::Heartbeat) => Step::Emit(TransportEvent::Heartbeat),
                        Ok(Control::Fail(reason)) => Step::End(TransportEvent::Error(reason)),
                        Ok(Control::Drop) | Err(RecvError::Closed) => Step::End(TransportEvent::Closed),
                        Err(RecvError::Lagged(_)) => Step::Skip,
                    },
                };

                match step {
                    Step::Emit(event) => yield event,
                    Step::Skip => continue,
                    Step::End(event) => {
                        yield event;
                        break;
                    }
                }
            }
        };

        futures::future::ready(Ok(stream.boxed())).boxed()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use crate::dto::realtime::{ChangeKind, RowFilter};

    use super::*;

    fn change(game: &str) -> ChangeEvent {
        ChangeEvent {
            table: "answers".into(),
            kind: ChangeKind::Insert,
            record: Some(json!({ "game_id": game })),
            old_record: None,
        }
    }

    #[tokio::test]
    async fn channel_acks_then_forwards_matching_changes() {
        let transport = LocalTransport::default();
        let topic = Topic::table("answers").with_filter(RowFilter::eq("game_id", "g1"));
        let mut stream = transport.open(&topic).await.unwrap();

        assert_eq!(stream.next().await, Some(TransportEvent::Subscribed));

        transport.publish(change("g2"));
        transport.publish(change("g1"));
        assert_eq!(
            stream.next().await,
            Some(TransportEvent::Change(change("g1")))
        );

        transport.fail_connections("boom");
        assert_eq!(
            stream.next().await,
            Some(TransportEvent::Error("boom".into()))
        );
        assert_eq!(stream.next().await, None);
    }

    #[tokio::test]
    async fn refusing_transport_does_not_count_opens() {
        let transport = LocalTransport::default();
        transport.set_refusing(true);
        assert!(transport.open(&Topic::table("sessions")).await.is_err());
        assert_eq!(transport.open_count(), 0);
    }
}
