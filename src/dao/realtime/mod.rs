//! Realtime change feed used by the connection registry.

mod local;
#[cfg(feature = "http-backend")]
mod sse;

use futures::{future::BoxFuture, stream::BoxStream};
use thiserror::Error;

use crate::{
    dao::error::BackendError,
    dto::realtime::{ChangeEvent, Topic},
};

pub use self::local::LocalTransport;
#[cfg(feature = "http-backend")]
pub use self::sse::{FrameTooLarge, SseDecoder, SseFrame, SseTransport};

/// Stream of events for one open channel; it ends after `Error` or `Closed`.
pub type EventStream = BoxStream<'static, TransportEvent>;

/// What an open realtime channel can report.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// The service acknowledged the subscription.
    Subscribed,
    /// A matching row changed.
    Change(ChangeEvent),
    /// Keep-alive from the service.
    Heartbeat,
    /// The channel failed.
    Error(String),
    /// The channel was closed.
    Closed,
}

/// Failures while opening a channel.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The transport refused the subscription outright.
    #[error("subscription to `{topic}` refused: {reason}")]
    Refused { topic: String, reason: String },
    /// The underlying service call failed.
    #[error("failed to open realtime channel")]
    Backend(#[from] BackendError),
}

/// Primitive that opens one change feed per topic.
pub trait RealtimeTransport: Send + Sync {
    /// Open a channel for `topic`.
    fn open(&self, topic: &Topic) -> BoxFuture<'static, Result<EventStream, TransportError>>;
}
