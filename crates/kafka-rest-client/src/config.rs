//! Client configuration.
//!
//! Configuration is an explicit value handed to [`KafkaRestClient`] at
//! construction and shared read-only with every group, instance and stream
//! created from it.
//!
//! Sources, in increasing precedence:
//! 1. [`ClientConfig::default`] (`http://localhost:8080`, API v1)
//! 2. A TOML file via [`ClientConfig::load`] / [`ClientConfig::from_toml_str`]
//! 3. Environment variables via [`ClientConfig::with_env_overrides`]:
//!    - `KAFKA_REST_URL`
//!    - `KAFKA_REST_API_VERSION` (`1` or `2`)
//!
//! [`KafkaRestClient`]: crate::KafkaRestClient

use crate::backoff::PollPolicy;
use crate::error::{ClientError, Result};
use crate::version::ApiVersion;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

pub const ENV_URL: &str = "KAFKA_REST_URL";
pub const ENV_API_VERSION: &str = "KAFKA_REST_API_VERSION";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Base URL of the REST Proxy
    pub url: String,

    /// Consumer protocol generation spoken by the proxy
    pub version: ApiVersion,

    /// Per-request timeout applied by the HTTP transport
    #[serde(with = "millis")]
    pub request_timeout: Duration,

    /// Pacing of stream polls
    pub poll: PollPolicy,

    /// Number of undelivered batches a stream buffers before its poll task
    /// waits for the reader
    pub stream_buffer: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:8080".to_string(),
            version: ApiVersion::V1,
            request_timeout: Duration::from_secs(30),
            poll: PollPolicy::default(),
            stream_buffer: 16,
        }
    }
}

impl ClientConfig {
    pub fn new(url: impl Into<String>, version: ApiVersion) -> Self {
        Self {
            url: url.into(),
            version,
            ..Self::default()
        }
    }

    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let config: ClientConfig =
            toml::from_str(contents).map_err(|e| ClientError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| {
            ClientError::Config(format!("failed to read {}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&contents)
    }

    /// Apply `KAFKA_REST_URL` and `KAFKA_REST_API_VERSION` on top of `self`.
    pub fn with_env_overrides(self) -> Result<Self> {
        self.with_overrides_from(|key| std::env::var(key).ok())
    }

    fn with_overrides_from<F>(mut self, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup(ENV_URL) {
            self.url = url;
        }
        if let Some(raw) = lookup(ENV_API_VERSION) {
            let parsed: u8 = raw.trim().parse().map_err(|_| {
                ClientError::Config(format!("{} must be 1 or 2, got '{}'", ENV_API_VERSION, raw))
            })?;
            self.version = ApiVersion::try_from(parsed)?;
        }
        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> Result<()> {
        if self.url.trim().is_empty() {
            return Err(ClientError::Config("url must not be empty".into()));
        }
        if self.stream_buffer == 0 {
            return Err(ClientError::Config("stream_buffer must be at least 1".into()));
        }
        if self.poll.min_delay.is_zero() {
            return Err(ClientError::Config(
                "poll.min_delay must be greater than zero".into(),
            ));
        }
        if self.poll.max_delay < self.poll.min_delay {
            return Err(ClientError::Config(
                "poll.max_delay must not be below poll.min_delay".into(),
            ));
        }
        if self.poll.backoff_multiplier.is_nan() || self.poll.backoff_multiplier < 1.0 {
            return Err(ClientError::Config(
                "poll.backoff_multiplier must be at least 1.0".into(),
            ));
        }
        Ok(())
    }
}

/// Serde adapter storing a `Duration` as integer milliseconds.
pub(crate) mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = ClientConfig::default();
        assert_eq!(config.url, "http://localhost:8080");
        assert_eq!(config.version, ApiVersion::V1);
        assert_eq!(config.stream_buffer, 16);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_toml_partial() {
        let config = ClientConfig::from_toml_str(
            r#"
            url = "http://proxy:8082"
            version = 2

            [poll]
            min_delay = 250
            "#,
        )
        .unwrap();
        assert_eq!(config.url, "http://proxy:8082");
        assert_eq!(config.version, ApiVersion::V2);
        assert_eq!(config.poll.min_delay, Duration::from_millis(250));
        assert_eq!(config.poll.max_delay, Duration::from_secs(30));
        assert_eq!(config.request_timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_from_toml_rejects_unknown_version() {
        let err = ClientConfig::from_toml_str("version = 3").unwrap_err();
        assert!(matches!(err, ClientError::Config(_)));
    }

    #[test]
    fn test_from_toml_rejects_zero_min_delay() {
        let err = ClientConfig::from_toml_str("[poll]\nmin_delay = 0").unwrap_err();
        assert!(err.to_string().contains("min_delay"));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "url = \"http://file-proxy:8082\"\nstream_buffer = 4").unwrap();

        let config = ClientConfig::load(file.path()).unwrap();
        assert_eq!(config.url, "http://file-proxy:8082");
        assert_eq!(config.stream_buffer, 4);
    }

    #[test]
    fn test_load_missing_file() {
        let err = ClientConfig::load("/nonexistent/kafka-rest.toml").unwrap_err();
        assert!(matches!(err, ClientError::Config(_)));
    }

    #[test]
    fn test_overrides() {
        let env: HashMap<&str, &str> = [(ENV_URL, "http://env:8082"), (ENV_API_VERSION, "2")]
            .into_iter()
            .collect();
        let config = ClientConfig::default()
            .with_overrides_from(|k| env.get(k).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(config.url, "http://env:8082");
        assert_eq!(config.version, ApiVersion::V2);
    }

    #[test]
    fn test_overrides_reject_bad_version() {
        let err = ClientConfig::default()
            .with_overrides_from(|k| (k == ENV_API_VERSION).then(|| "two".to_string()))
            .unwrap_err();
        assert!(err.to_string().contains(ENV_API_VERSION));
    }

    #[test]
    fn test_serialization_roundtrip() {
        let config = ClientConfig::new("http://example.com:8082", ApiVersion::V2);
        let toml_str = toml::to_string_pretty(&config).unwrap();
        let deserialized = ClientConfig::from_toml_str(&toml_str).unwrap();
        assert_eq!(deserialized, config);
    }
}
