//! Kafka REST Proxy client - consumer groups, instances and streams
//!
//! This crate wraps the Confluent REST Proxy's consumer API. A
//! [`ConsumerGroup`] joins the proxy to create a [`ConsumerInstance`]; the
//! instance subscribes to topics and hands out [`ConsumerStream`]s that poll
//! the proxy and deliver decoded record batches.
//!
//! ```text
//! KafkaRestClient ─► ConsumerGroup ─join─► ConsumerInstance ─subscribe──► ConsumerStream
//!                                                  ▲                          │
//!                                                  └──── InstanceEvent ◄──────┘
//! ```
//!
//! # Examples
//!
//! ## API v1
//!
//! ```ignore
//! use kafka_rest_client::{ClientConfig, JoinOptions, KafkaRestClient, StreamEvent, StreamOptions};
//!
//! let client = KafkaRestClient::new(ClientConfig::default())?;
//! let instance = client.consumer("analytics").join(JoinOptions::default()).await?;
//! let mut stream = instance
//!     .subscribe("orders", StreamOptions::default())
//!     .expect("client configured for v1");
//!
//! while let Some(event) = stream.next_event().await {
//!     match event {
//!         StreamEvent::Read(messages) => println!("{} records", messages.len()),
//!         StreamEvent::Error(e) => eprintln!("poll failed: {}", e),
//!     }
//! }
//! instance.shutdown().await?;
//! ```
//!
//! ## API v2
//!
//! ```ignore
//! let config = ClientConfig::new("http://localhost:8082", ApiVersion::V2);
//! let client = KafkaRestClient::new(config)?;
//! let instance = client.consumer("analytics").join(JoinOptions::default()).await?;
//! let stream = instance
//!     .subscription(TopicSet::topics(["orders"]), StreamOptions::default())
//!     .await?;
//! ```

pub mod backoff;
pub mod client;
pub mod codec;
pub mod config;
pub mod consumer_group;
pub mod consumer_instance;
pub mod consumer_stream;
pub mod error;
pub mod events;
pub mod messages;
pub mod transport;
pub mod version;

pub use backoff::PollPolicy;
pub use client::{Consumers, KafkaRestClient};
pub use codec::{
    AvroCodec, BinaryCodec, ConsumedMessage, EmbeddedFormat, JsonCodec, MessageCodec, Payload,
    RawRecord,
};
pub use config::ClientConfig;
pub use consumer_group::{ConsumerGroup, JoinOptions, OffsetReset};
pub use consumer_instance::{ConsumerInstance, InstanceState, SeekPosition};
pub use consumer_stream::{ConsumerStream, StreamOptions, StreamScope, StreamState, TopicSet};
pub use error::{ClientError, Result};
pub use events::{InstanceEvent, StreamEvent, StreamId};
pub use messages::{encode_records, ProduceRecord};
pub use transport::{HttpRequest, HttpTransport, Method, Transport};
pub use version::{validate_version_support, ApiVersion};
