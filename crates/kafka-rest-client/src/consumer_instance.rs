//! Consumer instances: one joined session within a consumer group.
//!
//! An instance is created by [`ConsumerGroup::join`] and lives until
//! [`ConsumerInstance::shutdown`]:
//!
//! ```text
//! join ──► Active ──shutdown──► ShuttingDown ──► Terminated
//!             ▲                      │
//!             └──── (any failure) ───┘
//! ```
//!
//! Every operation checks the configured API version before touching the
//! network; a mismatch fails with [`ClientError::UnsupportedVersion`] and no
//! request is sent.
//!
//! [`ConsumerGroup::join`]: crate::ConsumerGroup::join

use crate::codec::MessageCodec;
use crate::config::ClientConfig;
use crate::consumer_stream::{
    ConsumerStream, StreamControl, StreamOptions, StreamScope, StreamState, TopicSet,
};
use crate::error::{ClientError, Result};
use crate::events::{InstanceEvent, StreamId};
use crate::transport::{join_path, HttpRequest, Transport};
use crate::version::{validate_version_support, ApiVersion};
use serde::Deserialize;
use serde_json::Value;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

const V1_ONLY: &[ApiVersion] = &[ApiVersion::V1];
const V2_ONLY: &[ApiVersion] = &[ApiVersion::V2];

const INSTANCE_EVENT_CAPACITY: usize = 64;

/// State shared by an instance and every stream it owns.
pub(crate) struct InstanceShared {
    pub(crate) group: String,
    pub(crate) id: String,
    pub(crate) uri: String,
    pub(crate) config: Arc<ClientConfig>,
    pub(crate) transport: Arc<dyn Transport>,
    pub(crate) codec: Arc<dyn MessageCodec>,
    pub(crate) events: broadcast::Sender<InstanceEvent>,
}

/// Identity fields of a join response.
#[derive(Debug, Deserialize)]
struct JoinResponse {
    #[serde(default)]
    instance_id: Option<String>,
    #[serde(default)]
    base_uri: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstanceState {
    Active,
    ShuttingDown,
    Terminated,
}

/// Where [`ConsumerInstance::position`] moves the fetch offsets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeekPosition {
    /// Offsets given in the request body
    Explicit,
    Beginning,
    End,
}

impl SeekPosition {
    /// Accepts `None`, `""`, `"beginning"` and `"end"`.
    pub fn parse(position: Option<&str>) -> Result<Self> {
        match position {
            None | Some("") => Ok(SeekPosition::Explicit),
            Some("beginning") => Ok(SeekPosition::Beginning),
            Some("end") => Ok(SeekPosition::End),
            Some(other) => Err(ClientError::InvalidArgument(format!(
                "invalid position '{}': expected '', 'beginning' or 'end'",
                other
            ))),
        }
    }

    fn suffix(&self) -> &'static str {
        match self {
            SeekPosition::Explicit => "",
            SeekPosition::Beginning => "beginning",
            SeekPosition::End => "end",
        }
    }
}

struct InstanceInner {
    state: InstanceState,
    streams: Vec<Arc<StreamControl>>,
}

impl InstanceInner {
    /// Forget streams stopped through their own handle.
    fn prune_stopped(&mut self) {
        self.streams.retain(|s| s.state() != StreamState::Stopped);
    }
}

/// Restores an interrupted shutdown: the instance goes back to `Active` and
/// takes its streams back, unless the shutdown ran to completion.
struct ShutdownGuard<'a> {
    instance: &'a ConsumerInstance,
    streams: Vec<Arc<StreamControl>>,
    armed: bool,
}

impl ShutdownGuard<'_> {
    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for ShutdownGuard<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let mut inner = self.instance.lock_inner();
        inner.state = InstanceState::Active;
        inner.streams.append(&mut self.streams);
        drop(inner);
        warn!(
            instance_id = %self.instance.shared.id,
            "Consumer instance shutdown cancelled before completing"
        );
    }
}

pub struct ConsumerInstance {
    shared: Arc<InstanceShared>,
    inner: Mutex<InstanceInner>,
    next_stream_id: AtomicU64,
    // Serializes subscription replacement and cancellation
    subscription_lock: tokio::sync::Mutex<()>,
}

impl ConsumerInstance {
    /// Build an instance from a join response body.
    ///
    /// Fails with [`ClientError::MalformedResponse`] when `instance_id` or
    /// `base_uri` is missing or empty.
    pub(crate) fn from_join_response(
        group: &str,
        body: Value,
        config: Arc<ClientConfig>,
        transport: Arc<dyn Transport>,
        codec: Arc<dyn MessageCodec>,
    ) -> Result<Self> {
        let response: JoinResponse = serde_json::from_value(body).map_err(|e| {
            ClientError::MalformedResponse(format!("join response is not an object: {}", e))
        })?;
        let id = response
            .instance_id
            .filter(|s| !s.is_empty())
            .ok_or_else(|| {
                ClientError::MalformedResponse("join response is missing 'instance_id'".into())
            })?;
        let uri = response
            .base_uri
            .filter(|s| !s.is_empty())
            .ok_or_else(|| {
                ClientError::MalformedResponse("join response is missing 'base_uri'".into())
            })?;

        let (events, _) = broadcast::channel(INSTANCE_EVENT_CAPACITY);
        Ok(Self {
            shared: Arc::new(InstanceShared {
                group: group.to_string(),
                id,
                uri,
                config,
                transport,
                codec,
                events,
            }),
            inner: Mutex::new(InstanceInner {
                state: InstanceState::Active,
                streams: Vec::new(),
            }),
            next_stream_id: AtomicU64::new(0),
            subscription_lock: tokio::sync::Mutex::new(()),
        })
    }

    /// Server-assigned instance id.
    pub fn id(&self) -> &str {
        &self.shared.id
    }

    /// Server-assigned base URI of this instance.
    pub fn uri(&self) -> &str {
        &self.shared.uri
    }

    pub fn group(&self) -> &str {
        &self.shared.group
    }

    pub fn version(&self) -> ApiVersion {
        self.shared.config.version
    }

    pub fn state(&self) -> InstanceState {
        self.lock_inner().state
    }

    pub fn is_active(&self) -> bool {
        self.state() != InstanceState::Terminated
    }

    /// Number of owned streams that have not stopped yet.
    pub fn stream_count(&self) -> usize {
        let mut inner = self.lock_inner();
        inner.prune_stopped();
        inner.streams.len()
    }

    /// Subscribe to batches, errors and end-of-life of all streams.
    ///
    /// A receiver that falls more than 64 events behind gets
    /// `RecvError::Lagged` and skips ahead.
    pub fn events(&self) -> broadcast::Receiver<InstanceEvent> {
        self.shared.events.subscribe()
    }

    /// Start reading `topic` (API v1).
    ///
    /// No request is made up front; the new stream starts polling immediately.
    /// Returns `None` when the client is not configured for v1 or the instance
    /// is no longer active; use [`ConsumerInstance::try_subscribe`] to get the
    /// reason.
    pub fn subscribe(&self, topic: &str, options: StreamOptions) -> Option<ConsumerStream> {
        match self.try_subscribe(topic, options) {
            Ok(stream) => Some(stream),
            Err(e) => {
                warn!(instance_id = %self.shared.id, topic, error = %e, "Subscribe refused");
                None
            }
        }
    }

    pub fn try_subscribe(&self, topic: &str, options: StreamOptions) -> Result<ConsumerStream> {
        validate_version_support(V1_ONLY, self.version())?;
        if topic.is_empty() {
            return Err(ClientError::InvalidArgument("topic must not be empty".into()));
        }
        self.start_stream(StreamScope::Topic(topic.to_string()), options)
    }

    /// Subscribe the instance to `topics` (API v2) and start its stream.
    ///
    /// Any stream from an earlier subscription is stopped first, so an instance
    /// has at most one v2 stream.
    pub async fn subscription(
        &self,
        topics: TopicSet,
        options: StreamOptions,
    ) -> Result<ConsumerStream> {
        validate_version_support(V2_ONLY, self.version())?;
        topics.validate()?;
        self.ensure_active()?;

        let _guard = self.subscription_lock.lock().await;
        let previous = self.take_streams();
        if !previous.is_empty() {
            debug!(
                instance_id = %self.shared.id,
                streams = previous.len(),
                "Replacing existing subscription stream"
            );
        }
        shutdown_streams(&previous).await?;

        let body = serde_json::to_value(&topics)?;
        self.shared
            .transport
            .post(&self.path("subscription"), Some(body))
            .await?;
        info!(instance_id = %self.shared.id, topics = %topics, "Subscribed");

        self.start_stream(StreamScope::Subscription(topics), options)
    }

    /// Topics the instance is currently subscribed to (API v2).
    pub async fn get_subscription(&self) -> Result<TopicSet> {
        validate_version_support(V2_ONLY, self.version())?;
        self.ensure_active()?;
        let body = self.shared.transport.get(&self.path("subscription")).await?;
        if body.is_null() {
            return Ok(TopicSet::default());
        }
        Ok(serde_json::from_value(body)?)
    }

    /// Drop the subscription on the server and stop every owned stream (API v2).
    ///
    /// Resolves `true` once the server accepted the cancellation and all
    /// streams have ended.
    pub async fn cancel_subscription(&self) -> Result<bool> {
        validate_version_support(V2_ONLY, self.version())?;
        self.ensure_active()?;

        let _guard = self.subscription_lock.lock().await;
        self.shared
            .transport
            .delete(&self.path("subscription"))
            .await?;
        let streams = self.take_streams();
        shutdown_streams(&streams).await?;
        info!(instance_id = %self.shared.id, "Subscription cancelled");
        Ok(true)
    }

    /// Commit the offsets of everything consumed so far (API v1).
    pub async fn commit(&self) -> Result<()> {
        validate_version_support(V1_ONLY, self.version())?;
        self.ensure_active()?;
        self.shared
            .transport
            .post(&self.path("offsets"), None)
            .await?;
        debug!(instance_id = %self.shared.id, "Offsets committed");
        Ok(())
    }

    /// Commit explicit offsets (API v2).
    pub async fn offset(&self, body: Value) -> Result<Value> {
        validate_version_support(V2_ONLY, self.version())?;
        self.ensure_active()?;
        self.shared
            .transport
            .post(&self.path("offsets"), Some(body))
            .await
    }

    /// Last committed offsets for the partitions named in `body` (API v2).
    pub async fn get_offset(&self, body: Value) -> Result<Value> {
        validate_version_support(V2_ONLY, self.version())?;
        self.ensure_active()?;
        self.shared
            .transport
            .request(HttpRequest::get(self.path("offsets")).with_body(body))
            .await
    }

    /// Manually assign partitions (API v2).
    pub async fn assign(&self, body: Value) -> Result<Value> {
        validate_version_support(V2_ONLY, self.version())?;
        self.ensure_active()?;
        self.shared
            .transport
            .post(&self.path("assignments"), Some(body))
            .await
    }

    /// Partitions currently assigned to this instance (API v2).
    pub async fn get_assignment(&self) -> Result<Value> {
        validate_version_support(V2_ONLY, self.version())?;
        self.ensure_active()?;
        self.shared.transport.get(&self.path("assignments")).await
    }

    /// Override the fetch offsets for the partitions in `body` (API v2).
    ///
    /// `position` is `None`/`""` for the offsets in `body`, or `"beginning"` /
    /// `"end"`. Anything else fails with [`ClientError::InvalidArgument`]
    /// before a request is made.
    pub async fn position(&self, body: Value, position: Option<&str>) -> Result<Value> {
        validate_version_support(V2_ONLY, self.version())?;
        let position = SeekPosition::parse(position)?;
        self.ensure_active()?;
        let path = join_path([self.shared.uri.as_str(), "positions", position.suffix()]);
        self.shared.transport.post(&path, Some(body)).await
    }

    /// Stop every stream, then delete the remote instance.
    ///
    /// All streams are asked to stop and awaited together; the delete is only
    /// sent after every one of them has settled. If a stream fails to stop, the
    /// delete is still sent and the first stream error is returned. The
    /// instance only becomes inactive (and emits [`InstanceEvent::End`]) when
    /// both steps succeed; otherwise it returns to `Active` and may be shut
    /// down again. Dropping the returned future before it completes also
    /// returns the instance to `Active`, with its streams still owned.
    ///
    /// Fails with [`ClientError::ShutdownInProgress`] while another call is
    /// still running.
    pub async fn shutdown(&self) -> Result<()> {
        let streams = {
            let mut inner = self.lock_inner();
            match inner.state {
                InstanceState::Active => {}
                InstanceState::ShuttingDown => {
                    return Err(ClientError::ShutdownInProgress(self.shared.id.clone()))
                }
                InstanceState::Terminated => {
                    return Err(ClientError::InstanceInactive(self.shared.id.clone()))
                }
            }
            inner.state = InstanceState::ShuttingDown;
            std::mem::take(&mut inner.streams)
        };
        info!(
            group = %self.shared.group,
            instance_id = %self.shared.id,
            streams = streams.len(),
            "Shutting down consumer instance"
        );
        let guard = ShutdownGuard {
            instance: self,
            streams,
            armed: true,
        };

        let streams_result = shutdown_streams(&guard.streams).await;
        let delete_result = self.shared.transport.delete(&self.shared.uri).await;
        guard.disarm();

        let result = streams_result.and(delete_result.map(|_| ()));
        let mut inner = self.lock_inner();
        match &result {
            Ok(()) => {
                inner.state = InstanceState::Terminated;
                drop(inner);
                let _ = self.shared.events.send(InstanceEvent::End);
                info!(instance_id = %self.shared.id, "Consumer instance shut down");
            }
            Err(e) => {
                inner.state = InstanceState::Active;
                warn!(instance_id = %self.shared.id, error = %e, "Consumer instance shutdown failed");
            }
        }
        result
    }

    fn path(&self, resource: &str) -> String {
        join_path([self.shared.uri.as_str(), resource])
    }

    fn lock_inner(&self) -> MutexGuard<'_, InstanceInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn ensure_active(&self) -> Result<()> {
        match self.lock_inner().state {
            InstanceState::Active => Ok(()),
            _ => Err(ClientError::InstanceInactive(self.shared.id.clone())),
        }
    }

    fn take_streams(&self) -> Vec<Arc<StreamControl>> {
        std::mem::take(&mut self.lock_inner().streams)
    }

    /// Spawn and register a stream, atomically with the active check so a
    /// concurrent shutdown cannot miss it.
    fn start_stream(&self, scope: StreamScope, options: StreamOptions) -> Result<ConsumerStream> {
        let mut inner = self.lock_inner();
        if inner.state != InstanceState::Active {
            return Err(ClientError::InstanceInactive(self.shared.id.clone()));
        }
        inner.prune_stopped();
        let id: StreamId = self.next_stream_id.fetch_add(1, Ordering::Relaxed);
        let (stream, control) = ConsumerStream::spawn(Arc::clone(&self.shared), id, scope, options)?;
        inner.streams.push(control);
        Ok(stream)
    }
}

/// Stop all streams concurrently and wait for each; first error wins.
async fn shutdown_streams(streams: &[Arc<StreamControl>]) -> Result<()> {
    let results = futures::future::join_all(streams.iter().map(|s| s.shutdown())).await;
    results.into_iter().collect()
}

impl Drop for ConsumerInstance {
    fn drop(&mut self) {
        let inner = self.lock_inner();
        if inner.state == InstanceState::Terminated {
            return;
        }
        for stream in &inner.streams {
            stream.request_stop();
        }
        warn!(
            instance_id = %self.shared.id,
            "Consumer instance dropped without shutdown; remote session left to expire"
        );
    }
}

impl fmt::Display for ConsumerInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ConsumerInstance{{group={}, id={}, uri={}}}",
            self.shared.group, self.shared.id, self.shared.uri
        )
    }
}

impl fmt::Debug for ConsumerInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConsumerInstance")
            .field("group", &self.shared.group)
            .field("id", &self.shared.id)
            .field("uri", &self.shared.uri)
            .field("state", &self.state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seek_position_parse() {
        assert_eq!(SeekPosition::parse(None).unwrap(), SeekPosition::Explicit);
        assert_eq!(SeekPosition::parse(Some("")).unwrap(), SeekPosition::Explicit);
        assert_eq!(
            SeekPosition::parse(Some("beginning")).unwrap(),
            SeekPosition::Beginning
        );
        assert_eq!(SeekPosition::parse(Some("end")).unwrap(), SeekPosition::End);
    }

    #[test]
    fn test_seek_position_rejects_others() {
        for bad in ["xyPosition", "Beginning", "END", " end", "latest"] {
            assert!(
                matches!(
                    SeekPosition::parse(Some(bad)),
                    Err(ClientError::InvalidArgument(_))
                ),
                "{} should be rejected",
                bad
            );
        }
    }
}
