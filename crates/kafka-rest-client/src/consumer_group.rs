//! Consumer groups and the join operation.

use crate::codec::EmbeddedFormat;
use crate::config::ClientConfig;
use crate::consumer_instance::ConsumerInstance;
use crate::error::{ClientError, Result};
use crate::transport::{escape_segment, join_path, Transport};
use serde::{Serialize, Serializer};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info};

/// Where a new instance starts reading when the group has no committed offset.
///
/// v1 proxies expect `smallest`/`largest`, v2 proxies `earliest`/`latest`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OffsetReset {
    Smallest,
    Largest,
    Earliest,
    Latest,
}

/// Flags sent when joining a group. Unset fields are omitted from the request.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct JoinOptions {
    /// Requested instance id; the proxy generates one when absent
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub format: Option<EmbeddedFormat>,

    #[serde(rename = "auto.offset.reset", skip_serializing_if = "Option::is_none")]
    pub auto_offset_reset: Option<OffsetReset>,

    #[serde(
        rename = "auto.commit.enable",
        skip_serializing_if = "Option::is_none",
        serialize_with = "bool_as_string"
    )]
    pub auto_commit_enable: Option<bool>,
}

impl JoinOptions {
    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn format(mut self, format: EmbeddedFormat) -> Self {
        self.format = Some(format);
        self
    }

    pub fn auto_offset_reset(mut self, reset: OffsetReset) -> Self {
        self.auto_offset_reset = Some(reset);
        self
    }

    pub fn auto_commit_enable(mut self, enabled: bool) -> Self {
        self.auto_commit_enable = Some(enabled);
        self
    }
}

// The proxy reads consumer properties as strings.
fn bool_as_string<S: Serializer>(value: &Option<bool>, serializer: S) -> std::result::Result<S::Ok, S::Error> {
    match value {
        Some(v) => serializer.serialize_str(if *v { "true" } else { "false" }),
        None => serializer.serialize_none(),
    }
}

/// A named consumer group. Creating one is local; the group only exists
/// remotely once an instance joins it.
#[derive(Clone)]
pub struct ConsumerGroup {
    name: String,
    config: Arc<ClientConfig>,
    transport: Arc<dyn Transport>,
}

impl ConsumerGroup {
    pub(crate) fn new(
        name: impl Into<String>,
        config: Arc<ClientConfig>,
        transport: Arc<dyn Transport>,
    ) -> Self {
        Self {
            name: name.into(),
            config,
            transport,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// `/consumers/{escaped group name}`
    pub fn path(&self) -> String {
        join_path(["/consumers", &escape_segment(&self.name)])
    }

    /// Create a new consumer instance in this group.
    ///
    /// The instance decodes records with the codec matching `options.format`
    /// (binary when unset).
    ///
    /// # Errors
    ///
    /// - [`ClientError::SessionCreation`] if the request fails
    /// - [`ClientError::MalformedResponse`] if the response lacks
    ///   `instance_id` or `base_uri`
    pub async fn join(&self, options: JoinOptions) -> Result<ConsumerInstance> {
        let path = self.path();
        let body = serde_json::to_value(&options)?;
        debug!(group = %self.name, path = %path, "Joining consumer group");

        let response = self
            .transport
            .post(&path, Some(body))
            .await
            .map_err(|e| ClientError::SessionCreation {
                group: self.name.clone(),
                source: Box::new(e),
            })?;

        let codec = options.format.unwrap_or_default().codec();
        let instance = ConsumerInstance::from_join_response(
            &self.name,
            response,
            Arc::clone(&self.config),
            Arc::clone(&self.transport),
            codec,
        )?;

        info!(
            group = %self.name,
            instance_id = %instance.id(),
            uri = %instance.uri(),
            "Joined consumer group"
        );
        Ok(instance)
    }
}

impl fmt::Display for ConsumerGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Consumer{{group={}}}", self.name)
    }
}

impl fmt::Debug for ConsumerGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConsumerGroup").field("name", &self.name).finish()
    }
}
