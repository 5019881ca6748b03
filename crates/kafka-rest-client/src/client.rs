//! Client entry point.

use crate::config::ClientConfig;
use crate::consumer_group::ConsumerGroup;
use crate::error::Result;
use crate::transport::{HttpTransport, Transport};
use crate::version::ApiVersion;
use std::sync::Arc;

/// Handle to one REST Proxy. Cheap to clone.
#[derive(Clone)]
pub struct KafkaRestClient {
    config: Arc<ClientConfig>,
    transport: Arc<dyn Transport>,
}

impl KafkaRestClient {
    /// Create a client that talks HTTP to `config.url`.
    pub fn new(config: ClientConfig) -> Result<Self> {
        config.validate()?;
        let transport = Arc::new(HttpTransport::new(&config)?);
        Ok(Self {
            config: Arc::new(config),
            transport,
        })
    }

    /// Create a client over a caller-supplied transport.
    pub fn with_transport(config: ClientConfig, transport: Arc<dyn Transport>) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config: Arc::new(config),
            transport,
        })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn version(&self) -> ApiVersion {
        self.config.version
    }

    pub fn consumers(&self) -> Consumers {
        Consumers {
            client: self.clone(),
        }
    }

    /// Shorthand for `consumers().group(name)`. No request is made.
    pub fn consumer(&self, group: impl Into<String>) -> ConsumerGroup {
        ConsumerGroup::new(group, Arc::clone(&self.config), Arc::clone(&self.transport))
    }
}

/// The `/consumers` collection.
#[derive(Clone)]
pub struct Consumers {
    client: KafkaRestClient,
}

impl Consumers {
    pub fn group(&self, name: impl Into<String>) -> ConsumerGroup {
        self.client.consumer(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ClientError;

    #[test]
    fn test_new_with_defaults() {
        let client = KafkaRestClient::new(ClientConfig::default()).unwrap();
        assert_eq!(client.version(), ApiVersion::V1);
        assert_eq!(client.config().url, "http://localhost:8080");
    }

    #[test]
    fn test_new_rejects_invalid_config() {
        let config = ClientConfig {
            stream_buffer: 0,
            ..ClientConfig::default()
        };
        assert!(matches!(
            KafkaRestClient::new(config),
            Err(ClientError::Config(_))
        ));
    }

    #[test]
    fn test_group_is_local() {
        let client = KafkaRestClient::new(ClientConfig::default()).unwrap();
        let a = client.consumer("my group");
        let b = client.consumers().group("my group");
        assert_eq!(a.name(), b.name());
        assert_eq!(a.path(), "/consumers/my%20group");
        assert_eq!(a.to_string(), "Consumer{group=my group}");
    }
}
