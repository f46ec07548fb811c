use futures::{FutureExt, StreamExt, future::BoxFuture};
use reqwest::{Method, header::ACCEPT};
use thiserror::Error;
use tracing::warn;

use crate::{
    dao::{error::BackendError, http::HttpBackend},
    dto::realtime::{ChangeEvent, Topic},
};

use super::{EventStream, RealtimeTransport, TransportError, TransportEvent};

const EVENT_ACK: &str = "ack";
const EVENT_CHANGE: &str = "change";
const EVENT_ERROR: &str = "error";
const EVENT_CLOSE: &str = "close";
/// Largest frame accepted before the stream is treated as broken.
const MAX_FRAME_BYTES: usize = 1 << 20;

/// Realtime transport reading a `text/event-stream` per topic from the service.
#[derive(Clone)]
pub struct SseTransport {
    backend: HttpBackend,
}

impl SseTransport {
    /// Reuse the HTTP client and credentials of `backend`.
    pub fn new(backend: HttpBackend) -> Self {
        Self { backend }
    }
}

impl RealtimeTransport for SseTransport {
    fn open(&self, topic: &Topic) -> BoxFuture<'static, Result<EventStream, TransportError>> {
        open_stream(self.backend.clone(), topic.clone()).boxed()
    }
}

async fn open_stream(backend: HttpBackend, topic: Topic) -> Result<EventStream, TransportError> {
    let path = format!("realtime/{}", topic.table);
    let mut query = vec![("events", topic.events.as_str().to_string())];
    if let Some(filter) = &topic.filter {
        query.push(("filter", filter.to_string()));
    }

    let response = backend
        .request(Method::GET, &path)
        .header(ACCEPT, "text/event-stream")
        .query(&query)
        .send()
        .await
        .map_err(|source| BackendError::transport(path.clone(), source))?;

    let status = response.status();
    if status.is_client_error() {
        return Err(TransportError::Refused {
            topic: topic.to_string(),
            reason: format!("status {status}"),
        });
    }
    if !status.is_success() {
        return Err(BackendError::Status {
            path,
            status: status.as_u16(),
        }
        .into());
    }

    let mut bytes = response.bytes_stream();
    let stream = async_stream::stream! {
        let mut decoder = SseDecoder::default();
        let mut failure = None;

        'read: while let Some(chunk) = bytes.next().await {
            match chunk {
                Ok(chunk) => match decoder.push(&chunk) {
                    Ok(frames) => {
                        for frame in frames {
                            match frame.into_event() {
                                Some(TransportEvent::Closed) => break 'read,
                                Some(event) => yield event,
                                None => {}
                            }
                        }
                    }
                    Err(err) => {
                        warn!(%topic, error = %err, "realtime stream overflowed");
                        failure = Some(err.to_string());
                        break;
                    }
                },
                Err(err) => {
                    failure = Some(err.to_string());
                    break;
                }
            }
        }

        match failure {
            Some(reason) => yield TransportEvent::Error(reason),
            None => yield TransportEvent::Closed,
        }
    };

    Ok(stream.boxed())
}

/// One decoded server-sent event.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SseFrame {
    /// Value of the `event:` field.
    pub event: Option<String>,
    /// Concatenated `data:` lines.
    pub data: Option<String>,
    /// Whether the frame only carried comment lines.
    pub comment_only: bool,
}

impl SseFrame {
    fn parse(raw: &str) -> Option<Self> {
        let mut frame = SseFrame::default();
        let mut saw_comment = false;
        let mut saw_field = false;

        for line in raw.lines() {
            if line.is_empty() {
                continue;
            }
            if line.starts_with(':') {
                saw_comment = true;
                continue;
            }

            let (field, value) = line.split_once(':').unwrap_or((line, ""));
            let value = value.strip_prefix(' ').unwrap_or(value);
            saw_field = true;
            match field {
                "event" => frame.event = Some(value.to_string()),
                "data" => match &mut frame.data {
                    Some(data) => {
                        data.push('\n');
                        data.push_str(value);
                    }
                    None => frame.data = Some(value.to_string()),
                },
                _ => {}
            }
        }

        if !saw_field && !saw_comment {
            return None;
        }
        frame.comment_only = !saw_field;
        Some(frame)
    }

    /// Map the frame to a transport event; unknown or undecodable frames map to `None`.
    pub fn into_event(self) -> Option<TransportEvent> {
        if self.comment_only {
            return Some(TransportEvent::Heartbeat);
        }

        match self.event.as_deref() {
            Some(EVENT_ACK) => Some(TransportEvent::Subscribed),
            Some(EVENT_ERROR) => Some(TransportEvent::Error(self.data.unwrap_or_default())),
            Some(EVENT_CLOSE) => Some(TransportEvent::Closed),
            Some(EVENT_CHANGE) | None => {
                let data = self.data?;
                match serde_json::from_str::<ChangeEvent>(&data) {
                    Ok(change) => Some(TransportEvent::Change(change)),
                    Err(err) => {
                        warn!(error = %err, "dropping undecodable realtime change");
                        None
                    }
                }
            }
            Some(_) => None,
        }
    }
}

/// A frame grew past the decoder limit without a blank line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("server-sent event frame exceeds {limit} bytes")]
pub struct FrameTooLarge {
    /// Configured limit in bytes.
    pub limit: usize,
}

/// Incremental decoder turning raw byte chunks into complete frames.
///
/// Lines end with `\n`, `\r\n` or a lone `\r`; every byte is looked at once.
#[derive(Debug)]
pub struct SseDecoder {
    frame: Vec<u8>,
    line: Vec<u8>,
    after_cr: bool,
    limit: usize,
}

impl Default for SseDecoder {
    fn default() -> Self {
        Self::with_limit(MAX_FRAME_BYTES)
    }
}

impl SseDecoder {
    /// Decoder refusing frames larger than `limit` bytes.
    pub fn with_limit(limit: usize) -> Self {
        Self {
            frame: Vec::new(),
            line: Vec::new(),
            after_cr: false,
            limit,
        }
    }

    /// Feed a chunk and return every frame completed by it.
    ///
    /// On overflow the partial frame is discarded.
    pub fn push(&mut self, chunk: &[u8]) -> Result<Vec<SseFrame>, FrameTooLarge> {
        let mut frames = Vec::new();
        for &byte in chunk {
            if std::mem::take(&mut self.after_cr) && byte == b'\n' {
                continue;
            }
            match byte {
                b'\r' | b'\n' => {
                    self.after_cr = byte == b'\r';
                    self.end_line(&mut frames);
                }
                _ => self.line.push(byte),
            }

            if self.frame.len() + self.line.len() > self.limit {
                self.frame.clear();
                self.line.clear();
                return Err(FrameTooLarge { limit: self.limit });
            }
        }
        Ok(frames)
    }

    fn end_line(&mut self, frames: &mut Vec<SseFrame>) {
        if !self.line.is_empty() {
            self.frame.append(&mut self.line);
            self.frame.push(b'\n');
            return;
        }
        if self.frame.is_empty() {
            return;
        }

        let raw = std::mem::take(&mut self.frame);
        if let Some(frame) = SseFrame::parse(&String::from_utf8_lossy(&raw)) {
            frames.push(frame);
        }
    }
}
