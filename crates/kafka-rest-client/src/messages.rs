//! Producer-side record normalisation for the binary embedded format.
//!
//! Turns caller records into the JSON `records` array the proxy accepts,
//! base64-encoding keys and values. [`crate::codec::BinaryCodec`] is the
//! inverse on the consuming side.

use crate::error::{ClientError, Result};
use base64::{engine::general_purpose::STANDARD, Engine};
use bytes::Bytes;
use serde_json::{json, Value};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProduceRecord {
    pub key: Option<Bytes>,
    pub value: Option<Bytes>,
    pub partition: Option<i32>,
}

impl ProduceRecord {
    pub fn new(value: impl Into<Bytes>) -> Self {
        Self {
            value: Some(value.into()),
            ..Self::default()
        }
    }

    pub fn with_key(mut self, key: impl Into<Bytes>) -> Self {
        self.key = Some(key.into());
        self
    }

    pub fn with_partition(mut self, partition: i32) -> Self {
        self.partition = Some(partition);
        self
    }
}

impl From<&str> for ProduceRecord {
    fn from(value: &str) -> Self {
        ProduceRecord::new(Bytes::copy_from_slice(value.as_bytes()))
    }
}

/// Validate and encode records.
///
/// `allow_partition` is false for topic-level produce, where the proxy picks the
/// partition; a record naming one is rejected.
pub fn encode_records(records: &[ProduceRecord], allow_partition: bool) -> Result<Vec<Value>> {
    records
        .iter()
        .enumerate()
        .map(|(i, record)| {
            let value = record.value.as_ref().ok_or_else(|| {
                ClientError::InvalidArgument(format!("Message {} did not contain a value.", i))
            })?;
            if !allow_partition && record.partition.is_some() {
                return Err(ClientError::InvalidArgument(format!(
                    "Message {} contains a partition but this resource does not allow specifying the partition.",
                    i
                )));
            }

            let value = STANDARD.encode(value);
            let key = record.key.as_ref().map(|k| STANDARD.encode(k));
            Ok(if allow_partition {
                json!({ "value": value, "key": key, "partition": record.partition })
            } else {
                json!({ "value": value, "key": key })
            })
        })
        .collect()
}
