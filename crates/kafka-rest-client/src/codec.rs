//! Embedded-format codecs.
//!
//! The proxy wraps Kafka records in JSON and negotiates how keys and values are
//! embedded through the media type `application/vnd.kafka.{format}.v{N}+json`.
//! A [`MessageCodec`] supplies that media type for poll requests and turns each
//! [`RawRecord`] of the response into a [`ConsumedMessage`].

use crate::error::{ClientError, Result};
use crate::version::ApiVersion;
use base64::{engine::general_purpose::STANDARD, Engine};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

/// Embedded format requested when joining a group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddedFormat {
    #[default]
    Binary,
    Json,
    Avro,
}

impl EmbeddedFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            EmbeddedFormat::Binary => "binary",
            EmbeddedFormat::Json => "json",
            EmbeddedFormat::Avro => "avro",
        }
    }

    /// Codec matching this format.
    pub fn codec(&self) -> Arc<dyn MessageCodec> {
        match self {
            EmbeddedFormat::Binary => Arc::new(BinaryCodec),
            EmbeddedFormat::Json => Arc::new(JsonCodec),
            EmbeddedFormat::Avro => Arc::new(AvroCodec),
        }
    }
}

impl fmt::Display for EmbeddedFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A record exactly as the proxy returns it. v1 responses omit `topic`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawRecord {
    #[serde(default)]
    pub topic: Option<String>,
    #[serde(default)]
    pub key: Value,
    #[serde(default)]
    pub value: Value,
    #[serde(default)]
    pub partition: Option<i32>,
    #[serde(default)]
    pub offset: Option<i64>,
}

/// Decoded key or value.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Binary(Bytes),
    Json(Value),
}

impl Payload {
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Payload::Binary(b) => Some(b),
            Payload::Json(_) => None,
        }
    }

    pub fn as_json(&self) -> Option<&Value> {
        match self {
            Payload::Binary(_) => None,
            Payload::Json(v) => Some(v),
        }
    }
}

/// A decoded record delivered by a consumer stream.
#[derive(Debug, Clone, PartialEq)]
pub struct ConsumedMessage {
    pub topic: Option<String>,
    pub key: Option<Payload>,
    pub value: Option<Payload>,
    pub partition: i32,
    pub offset: Option<i64>,
}

pub trait MessageCodec: Send + Sync {
    fn format(&self) -> EmbeddedFormat;

    /// Media type sent as `Accept` when polling.
    fn content_type(&self, version: ApiVersion) -> String {
        format!(
            "application/vnd.kafka.{}.v{}+json",
            self.format().as_str(),
            version.as_u8()
        )
    }

    fn decode(&self, raw: RawRecord) -> Result<ConsumedMessage>;
}

fn partition_of(raw: &RawRecord) -> Result<i32> {
    raw.partition
        .ok_or_else(|| ClientError::Decode("record is missing 'partition'".into()))
}

/// Base64 binary embedding.
#[derive(Debug, Clone, Copy, Default)]
pub struct BinaryCodec;

impl BinaryCodec {
    fn decode_field(field: &'static str, value: &Value) -> Result<Option<Payload>> {
        match value {
            Value::Null => Ok(None),
            Value::String(encoded) => {
                let bytes = STANDARD.decode(encoded).map_err(|e| {
                    ClientError::Decode(format!("invalid base64 in '{}': {}", field, e))
                })?;
                Ok(Some(Payload::Binary(Bytes::from(bytes))))
            }
            other => Err(ClientError::Decode(format!(
                "expected base64 string in '{}', got {}",
                field, other
            ))),
        }
    }
}

impl MessageCodec for BinaryCodec {
    fn format(&self) -> EmbeddedFormat {
        EmbeddedFormat::Binary
    }

    fn decode(&self, raw: RawRecord) -> Result<ConsumedMessage> {
        Ok(ConsumedMessage {
            partition: partition_of(&raw)?,
            key: Self::decode_field("key", &raw.key)?,
            value: Self::decode_field("value", &raw.value)?,
            topic: raw.topic,
            offset: raw.offset,
        })
    }
}

fn passthrough(raw: RawRecord) -> Result<ConsumedMessage> {
    let json = |v: Value| match v {
        Value::Null => None,
        other => Some(Payload::Json(other)),
    };
    Ok(ConsumedMessage {
        partition: partition_of(&raw)?,
        key: json(raw.key),
        value: json(raw.value),
        topic: raw.topic,
        offset: raw.offset,
    })
}

/// JSON embedding; keys and values are already JSON.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl MessageCodec for JsonCodec {
    fn format(&self) -> EmbeddedFormat {
        EmbeddedFormat::Json
    }

    fn decode(&self, raw: RawRecord) -> Result<ConsumedMessage> {
        passthrough(raw)
    }
}

/// Avro embedding. The proxy renders Avro data as JSON, so values pass through.
#[derive(Debug, Clone, Copy, Default)]
pub struct AvroCodec;

impl MessageCodec for AvroCodec {
    fn format(&self) -> EmbeddedFormat {
        EmbeddedFormat::Avro
    }

    fn decode(&self, raw: RawRecord) -> Result<ConsumedMessage> {
        passthrough(raw)
    }
}
