//! Error types for Kafka REST Proxy client operations.
//!
//! Every fallible operation in this crate returns [`Result<T>`]. Errors fall into
//! two groups:
//!
//! - **Local, pre-flight errors**: `UnsupportedVersion`, `InvalidArgument`,
//!   `InstanceInactive`, `ShutdownInProgress`, `Config`. These are raised
//!   before any request is sent.
//! - **Remote errors**: `Transport`, `SessionCreation`, `MalformedResponse`,
//!   `Decode`. These come back from the proxy (or the network in front of it).
//!
//! ## Examples
//!
//! ```ignore
//! use kafka_rest_client::{ClientError, KafkaRestClient};
//!
//! match client.consumer("analytics").join(JoinOptions::default()).await {
//!     Ok(instance) => println!("joined as {}", instance.id()),
//!     Err(ClientError::SessionCreation { group, source }) => {
//!         eprintln!("could not join '{}': {}", group, source);
//!     }
//!     Err(e) => eprintln!("Error: {}", e),
//! }
//! ```

use thiserror::Error;

/// Convenience type alias for `Result<T, ClientError>`.
pub type Result<T> = std::result::Result<T, ClientError>;

/// Error type for all REST Proxy client operations.
///
/// `ClientError` is `Clone` so a single poll failure can be handed to both the
/// stream that produced it and the parent instance's event channel.
#[derive(Debug, Clone, Error)]
pub enum ClientError {
    /// The proxy answered with a non-2xx status, or the request never completed.
    ///
    /// `status` is `None` for connection-level failures (DNS, refused, reset,
    /// timeout). The message carries the response body when there was one.
    ///
    /// ## Resolution
    /// - 404 on an instance path usually means the instance expired server-side
    ///   and a new `join` is required
    /// - 406/415 point at a content-type mismatch between the codec and the
    ///   topic's embedded format
    #[error("HTTP request failed{}: {message}", status.map(|s| format!(" with status {}", s)).unwrap_or_default())]
    Transport {
        status: Option<u16>,
        message: String,
    },

    /// The operation is not available in the configured API version.
    ///
    /// Raised locally; nothing is sent to the proxy.
    ///
    /// ## Resolution
    /// - v1 offers `subscribe` and `commit`
    /// - v2 offers `subscription`, offsets, assignments and positions
    #[error("Operation requires API version {supported:?}, client is configured for v{configured}")]
    UnsupportedVersion { supported: Vec<u8>, configured: u8 },

    /// Caller input was rejected before sending anything.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Joining a consumer group failed at the transport level.
    #[error("Failed to create consumer instance in group '{group}': {source}")]
    SessionCreation {
        group: String,
        #[source]
        source: Box<ClientError>,
    },

    /// The proxy answered successfully but the body lacks required fields.
    ///
    /// A join response without `instance_id` or `base_uri` cannot produce a
    /// usable consumer instance.
    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    /// A record could not be decoded by the instance's codec.
    #[error("Failed to decode record: {0}")]
    Decode(String),

    /// A request or response body could not be (de)serialized.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Invalid client configuration.
    #[error("Configuration error: {0}")]
    Config(String),

    /// The consumer instance has been shut down and can no longer be used.
    #[error("Consumer instance {0} is no longer active")]
    InstanceInactive(String),

    /// Another `shutdown` call for this instance has not finished yet.
    #[error("Consumer instance {0} is already shutting down")]
    ShutdownInProgress(String),

    /// A stream's poll task ended without confirming a clean stop.
    #[error("Stream failed to shut down: {0}")]
    StreamShutdown(String),
}

impl ClientError {
    /// HTTP status of a transport error, if the proxy answered at all.
    pub fn status(&self) -> Option<u16> {
        match self {
            ClientError::Transport { status, .. } => *status,
            ClientError::SessionCreation { source, .. } => source.status(),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for ClientError {
    fn from(e: reqwest::Error) -> Self {
        ClientError::Transport {
            status: e.status().map(|s| s.as_u16()),
            message: e.to_string(),
        }
    }
}

impl From<serde_json::Error> for ClientError {
    fn from(e: serde_json::Error) -> Self {
        ClientError::Serialization(e.to_string())
    }
}

impl From<base64::DecodeError> for ClientError {
    fn from(e: base64::DecodeError) -> Self {
        ClientError::Decode(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_error_display_with_status() {
        let err = ClientError::Transport {
            status: Some(404),
            message: "Consumer instance not found.".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "HTTP request failed with status 404: Consumer instance not found."
        );
        assert_eq!(err.status(), Some(404));
    }

    #[test]
    fn test_transport_error_display_without_status() {
        let err = ClientError::Transport {
            status: None,
            message: "connection refused".to_string(),
        };
        assert_eq!(err.to_string(), "HTTP request failed: connection refused");
        assert_eq!(err.status(), None);
    }

    #[test]
    fn test_session_creation_exposes_inner_status() {
        let err = ClientError::SessionCreation {
            group: "g".to_string(),
            source: Box::new(ClientError::Transport {
                status: Some(409),
                message: "exists".to_string(),
            }),
        };
        assert_eq!(err.status(), Some(409));
        assert!(err.to_string().contains("group 'g'"));
    }

    #[test]
    fn test_unsupported_version_display() {
        let err = ClientError::UnsupportedVersion {
            supported: vec![2],
            configured: 1,
        };
        assert_eq!(
            err.to_string(),
            "Operation requires API version [2], client is configured for v1"
        );
    }

    #[test]
    fn test_shutdown_in_progress_display() {
        let err = ClientError::ShutdownInProgress("consumer-1".to_string());
        assert_eq!(
            err.to_string(),
            "Consumer instance consumer-1 is already shutting down"
        );
    }
}
