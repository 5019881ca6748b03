//! Consumer streams: the per-subscription poll loop.
//!
//! ## Architecture
//!
//! Creating a stream spawns one poll task. The task owns the stream's output
//! channel and its state; the caller holds a [`ConsumerStream`] to read batches
//! and the parent instance holds a [`StreamControl`] to stop it.
//!
//! ```text
//!            ┌──────────── active ────────────┐
//!            ▼                                │
//!   Polling ──(batch)──► deliver ─────────────┤
//!      │                                      │
//!      ├──(empty / error)──► WaitingNext ─────┘
//!      │                        │ (stop wakes the wait)
//!      └──(inactive)──► Stopping ──► Stopped (output closed)
//! ```
//!
//! At most one request is in flight per stream. Stopping is cooperative: an
//! in-flight poll is never aborted; whatever it returns after the stop request
//! is discarded and the stream ends instead.

use crate::codec::{ConsumedMessage, RawRecord};
use crate::consumer_instance::InstanceShared;
use crate::error::{ClientError, Result};
use crate::events::{InstanceEvent, StreamEvent, StreamId};
use crate::transport::{escape_segment, join_path, HttpRequest};
use futures::Stream;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::sync::{mpsc, watch, Notify};
use tracing::{debug, warn};

/// Topic set for a v2 subscription: explicit topics or a pattern, never both.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TopicSet {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub topics: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub topic_pattern: Option<String>,
}

impl TopicSet {
    pub fn topics<I, S>(topics: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            topics: topics.into_iter().map(Into::into).collect(),
            topic_pattern: None,
        }
    }

    pub fn pattern(pattern: impl Into<String>) -> Self {
        Self {
            topics: Vec::new(),
            topic_pattern: Some(pattern.into()),
        }
    }

    pub fn validate(&self) -> Result<()> {
        match (&self.topic_pattern, self.topics.is_empty()) {
            (Some(_), false) => Err(ClientError::InvalidArgument(
                "subscription takes either topics or topic_pattern, not both".into(),
            )),
            (None, true) => Err(ClientError::InvalidArgument(
                "subscription needs at least one topic or a topic_pattern".into(),
            )),
            (Some(p), true) if p.is_empty() => Err(ClientError::InvalidArgument(
                "topic_pattern must not be empty".into(),
            )),
            _ => Ok(()),
        }
    }
}

impl fmt::Display for TopicSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.topic_pattern {
            Some(pattern) => f.write_str(pattern),
            None => f.write_str(&self.topics.join(",")),
        }
    }
}

/// What a stream reads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamScope {
    /// v1: one topic, read from `{instance}/topics/{topic}`
    Topic(String),
    /// v2: the instance's subscription, read from `{instance}/records`
    Subscription(TopicSet),
}

impl StreamScope {
    pub(crate) fn path(&self, instance_uri: &str) -> String {
        match self {
            StreamScope::Topic(topic) => {
                join_path([instance_uri, "topics", &escape_segment(topic)])
            }
            StreamScope::Subscription(_) => join_path([instance_uri, "records"]),
        }
    }
}

#[derive(Debug, Clone)]
pub struct StreamOptions {
    /// Delay before re-polling after an empty batch. Raised to the client's
    /// minimum poll delay when lower or unset.
    pub poll_delay: Option<Duration>,

    /// Deliver poll errors on this stream. When false, or once the
    /// [`ConsumerStream`] handle is dropped, errors go to the parent instance.
    pub handle_errors: bool,
}

impl Default for StreamOptions {
    fn default() -> Self {
        Self {
            poll_delay: None,
            handle_errors: true,
        }
    }
}

impl StreamOptions {
    pub fn with_poll_delay(mut self, delay: Duration) -> Self {
        self.poll_delay = Some(delay);
        self
    }

    pub fn bubble_errors(mut self) -> Self {
        self.handle_errors = false;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    Polling,
    WaitingNext,
    Stopping,
    Stopped,
}

/// Stop switch and state view shared by the poll task, the stream handle and
/// the parent instance.
pub(crate) struct StreamControl {
    id: StreamId,
    active: AtomicBool,
    wake: Notify,
    state: watch::Receiver<StreamState>,
}

impl StreamControl {
    pub(crate) fn id(&self) -> StreamId {
        self.id
    }

    pub(crate) fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    pub(crate) fn state(&self) -> StreamState {
        *self.state.borrow()
    }

    /// Mark inactive. Wakes a task waiting between polls; a task with a request
    /// in flight notices once the request completes.
    pub(crate) fn request_stop(&self) {
        if self.active.swap(false, Ordering::AcqRel) {
            self.wake.notify_one();
        }
    }

    /// Stop the stream and wait until its poll task has finished.
    pub(crate) async fn shutdown(&self) -> Result<()> {
        self.request_stop();
        let mut state = self.state.clone();
        state
            .wait_for(|s| *s == StreamState::Stopped)
            .await
            .map(|_| ())
            .map_err(|_| {
                ClientError::StreamShutdown(format!(
                    "poll task of stream {} exited without stopping",
                    self.id
                ))
            })
    }
}

/// Handle to a running stream.
///
/// Yields [`StreamEvent`]s through [`ConsumerStream::next_event`] or the
/// [`futures::Stream`] impl, and ends (`None`) once the stream has been shut
/// down. Dropping the handle does not stop polling; batches keep flowing to
/// the parent instance until it is shut down.
pub struct ConsumerStream {
    control: Arc<StreamControl>,
    shared: Arc<InstanceShared>,
    scope: StreamScope,
    events: mpsc::Receiver<StreamEvent>,
}

impl ConsumerStream {
    /// Spawn the poll task on the current Tokio runtime.
    pub(crate) fn spawn(
        shared: Arc<InstanceShared>,
        id: StreamId,
        scope: StreamScope,
        options: StreamOptions,
    ) -> Result<(Self, Arc<StreamControl>)> {
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| {
            ClientError::Config("consumer streams must be created inside a Tokio runtime".into())
        })?;

        let (state_tx, state_rx) = watch::channel(StreamState::Polling);
        let (events_tx, events_rx) = mpsc::channel(shared.config.stream_buffer);
        let control = Arc::new(StreamControl {
            id,
            active: AtomicBool::new(true),
            wake: Notify::new(),
            state: state_rx,
        });

        let task = PollTask {
            path: scope.path(&shared.uri),
            accept: shared.codec.content_type(shared.config.version),
            control: Arc::clone(&control),
            shared: Arc::clone(&shared),
            options,
            events: events_tx,
            state: state_tx,
        };
        debug!(
            instance_id = %shared.id,
            stream = id,
            path = %task.path,
            "Starting consumer stream"
        );
        runtime.spawn(task.run());

        let stream = ConsumerStream {
            control: Arc::clone(&control),
            shared,
            scope,
            events: events_rx,
        };
        Ok((stream, control))
    }

    pub fn id(&self) -> StreamId {
        self.control.id()
    }

    pub fn scope(&self) -> &StreamScope {
        &self.scope
    }

    /// Resource path this stream polls.
    pub fn path(&self) -> String {
        self.scope.path(&self.shared.uri)
    }

    pub fn is_active(&self) -> bool {
        self.control.is_active()
    }

    pub fn state(&self) -> StreamState {
        self.control.state()
    }

    /// Next batch or error; `None` once the stream has ended.
    pub async fn next_event(&mut self) -> Option<StreamEvent> {
        self.events.recv().await
    }

    /// Stop polling and wait for the stream to end.
    ///
    /// Events already buffered stay readable after this returns. The parent
    /// instance stops counting the stream in
    /// [`ConsumerInstance::stream_count`](crate::ConsumerInstance::stream_count).
    pub async fn shutdown(&self) -> Result<()> {
        self.control.shutdown().await
    }
}

impl Stream for ConsumerStream {
    type Item = StreamEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.events.poll_recv(cx)
    }
}

impl fmt::Display for ConsumerStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ConsumerStream{{group={}, id={}, ",
            self.shared.group, self.shared.id
        )?;
        match &self.scope {
            StreamScope::Topic(topic) => write!(f, "topic={}}}", topic),
            StreamScope::Subscription(set) => write!(f, "topics={}}}", set),
        }
    }
}

impl fmt::Debug for ConsumerStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConsumerStream")
            .field("id", &self.control.id())
            .field("scope", &self.scope)
            .field("state", &self.control.state())
            .finish()
    }
}

struct PollTask {
    control: Arc<StreamControl>,
    shared: Arc<InstanceShared>,
    options: StreamOptions,
    path: String,
    accept: String,
    events: mpsc::Sender<StreamEvent>,
    state: watch::Sender<StreamState>,
}

impl PollTask {
    async fn run(self) {
        let stream = self.control.id();
        let mut consecutive_errors = 0u32;

        while self.control.is_active() {
            self.state.send_replace(StreamState::Polling);
            let request = HttpRequest::get(&self.path).with_accept(&self.accept);
            let outcome = self.shared.transport.request(request).await;

            if !self.control.is_active() {
                if let Ok(body) = &outcome {
                    let discarded = body.as_array().map(Vec::len).unwrap_or(0);
                    if discarded > 0 {
                        debug!(stream, records = discarded, "Discarding batch polled after stop");
                    }
                }
                break;
            }

            let delay = match outcome.and_then(|body| self.decode(body)) {
                Ok(batch) if !batch.is_empty() => {
                    consecutive_errors = 0;
                    self.deliver(batch).await;
                    None
                }
                Ok(_) => {
                    consecutive_errors = 0;
                    Some(self.shared.config.poll.idle_delay(self.options.poll_delay))
                }
                Err(error) => {
                    consecutive_errors = consecutive_errors.saturating_add(1);
                    let delay = self
                        .shared
                        .config
                        .poll
                        .error_delay(self.options.poll_delay, consecutive_errors);
                    debug!(stream, error = %error, retry_in = ?delay, "Poll failed");
                    self.emit_error(error).await;
                    Some(delay)
                }
            };

            if let Some(delay) = delay {
                if !self.control.is_active() {
                    break;
                }
                self.state.send_replace(StreamState::WaitingNext);
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = self.control.wake.notified() => {}
                }
            }
        }

        self.state.send_replace(StreamState::Stopping);
        let PollTask { events, state, .. } = self;
        drop(events);
        debug!(stream, "Consumer stream ended");
        state.send_replace(StreamState::Stopped);
    }

    fn decode(&self, body: Value) -> Result<Vec<ConsumedMessage>> {
        let raw: Vec<RawRecord> = match body {
            Value::Null => return Ok(Vec::new()),
            Value::Array(_) => serde_json::from_value(body)?,
            other => {
                return Err(ClientError::MalformedResponse(format!(
                    "expected an array of records, got {}",
                    other
                )))
            }
        };
        raw.into_iter()
            .map(|record| self.shared.codec.decode(record))
            .collect()
    }

    async fn deliver(&self, messages: Vec<ConsumedMessage>) {
        debug!(stream = self.control.id(), records = messages.len(), "Delivering batch");
        let _ = self.shared.events.send(InstanceEvent::Read {
            stream: self.control.id(),
            messages: messages.clone(),
        });
        self.send_to_stream(StreamEvent::Read(messages)).await;
    }

    async fn emit_error(&self, error: ClientError) {
        let stream = self.control.id();
        if self.options.handle_errors {
            if self
                .send_to_stream(StreamEvent::Error(error.clone()))
                .await
            {
                return;
            }
            if !self.control.is_active() {
                debug!(stream, error = %error, "Dropping stream error raised while stopping");
                return;
            }
        }
        if self
            .shared
            .events
            .send(InstanceEvent::Error {
                stream,
                error: error.clone(),
            })
            .is_err()
        {
            warn!(
                instance_id = %self.shared.id,
                stream,
                error = %error,
                "Dropping stream error with no observer"
            );
        }
    }

    /// Returns whether the stream handle received the event. Gives up when the
    /// handle is gone or the stream is stopped while the buffer is full.
    async fn send_to_stream(&self, event: StreamEvent) -> bool {
        if self.events.is_closed() {
            return false;
        }
        tokio::select! {
            sent = self.events.send(event) => sent.is_ok(),
            _ = self.control.wake.notified() => false,
        }
    }
}
