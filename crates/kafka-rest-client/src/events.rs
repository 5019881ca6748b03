//! Events delivered by consumer streams and their parent instance.
//!
//! Each stream pushes to two places:
//!
//! ```text
//! poll task ──► ConsumerStream (bounded mpsc, per stream)
//!           └─► ConsumerInstance::events() (broadcast, all streams)
//! ```
//!
//! Batches always go to both. Errors go to the stream when it handles them,
//! otherwise to the instance; an error neither side receives is logged at
//! `warn` and dropped.

use crate::codec::ConsumedMessage;
use crate::error::ClientError;

/// Identifier of a stream within its instance, unique for the instance's lifetime.
pub type StreamId = u64;

/// Item yielded by a [`crate::ConsumerStream`]. End-of-stream is `None`.
#[derive(Debug, Clone)]
pub enum StreamEvent {
    /// A non-empty batch of decoded records from one poll.
    Read(Vec<ConsumedMessage>),
    Error(ClientError),
}

/// Event broadcast by a [`crate::ConsumerInstance`].
#[derive(Debug, Clone)]
pub enum InstanceEvent {
    Read {
        stream: StreamId,
        messages: Vec<ConsumedMessage>,
    },
    /// A poll error the originating stream did not handle.
    Error {
        stream: StreamId,
        error: ClientError,
    },
    /// The instance was shut down and its remote session deleted.
    End,
}

impl StreamEvent {
    pub fn messages(&self) -> Option<&[ConsumedMessage]> {
        match self {
            StreamEvent::Read(messages) => Some(messages),
            StreamEvent::Error(_) => None,
        }
    }
}
