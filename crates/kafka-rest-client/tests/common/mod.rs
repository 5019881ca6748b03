//! In-memory transport for exercising consumer instances without a proxy.

#![allow(dead_code)]

use async_trait::async_trait;
use kafka_rest_client::{
    ApiVersion, ClientConfig, ClientError, ConsumerInstance, HttpRequest, JoinOptions,
    KafkaRestClient, Method, Result, Transport,
};
use serde_json::{json, Value};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

pub const GROUP: &str = "consumer-group";
pub const INSTANCE_ID: &str = "consumer-name-1";
pub const INSTANCE_URI: &str = "http://proxy:8082/consumers/consumer-group/instances/consumer-name-1";

/// A scripted response.
pub enum Reply {
    Ok(Value),
    Err(ClientError),
    /// Hold the request in flight until `gate` is notified.
    Gated(Arc<Notify>, Box<Reply>),
    /// Panic inside the calling task.
    Panic,
}

#[derive(Default)]
struct InFlight {
    current: usize,
    max: usize,
}

/// Records every request and answers from per-route queues.
///
/// Unscripted GETs answer `[]` (an empty poll); any other unscripted request
/// answers `null`.
#[derive(Default)]
pub struct MockTransport {
    requests: Mutex<Vec<HttpRequest>>,
    replies: Mutex<HashMap<(Method, String), VecDeque<Reply>>>,
    in_flight: Mutex<HashMap<String, InFlight>>,
}

impl MockTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn script(&self, method: Method, path: &str, reply: Reply) {
        self.replies
            .lock()
            .unwrap()
            .entry((method, path.to_string()))
            .or_default()
            .push_back(reply);
    }

    pub fn requests(&self) -> Vec<HttpRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn count(&self, method: Method, path: &str) -> usize {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.method == method && r.path == path)
            .count()
    }

    pub fn max_in_flight(&self, path: &str) -> usize {
        self.in_flight
            .lock()
            .unwrap()
            .get(path)
            .map(|f| f.max)
            .unwrap_or(0)
    }

    fn next_reply(&self, request: &HttpRequest) -> Reply {
        let scripted = self
            .replies
            .lock()
            .unwrap()
            .get_mut(&(request.method, request.path.clone()))
            .and_then(|queue| queue.pop_front());
        scripted.unwrap_or_else(|| match request.method {
            Method::Get => Reply::Ok(json!([])),
            _ => Reply::Ok(Value::Null),
        })
    }

    fn enter(&self, path: &str) {
        let mut in_flight = self.in_flight.lock().unwrap();
        let entry = in_flight.entry(path.to_string()).or_default();
        entry.current += 1;
        entry.max = entry.max.max(entry.current);
    }

    fn leave(&self, path: &str) {
        if let Some(entry) = self.in_flight.lock().unwrap().get_mut(path) {
            entry.current -= 1;
        }
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn request(&self, request: HttpRequest) -> Result<Value> {
        self.requests.lock().unwrap().push(request.clone());
        self.enter(&request.path);

        let mut reply = self.next_reply(&request);
        let result = loop {
            match reply {
                Reply::Ok(v) => break Ok(v),
                Reply::Err(e) => break Err(e),
                Reply::Gated(gate, then) => {
                    gate.notified().await;
                    reply = *then;
                }
                Reply::Panic => panic!("transport failure in {}", request.path),
            }
        };

        self.leave(&request.path);
        result
    }
}

pub fn transport_error(status: u16, message: &str) -> ClientError {
    ClientError::Transport {
        status: Some(status),
        message: message.to_string(),
    }
}

pub fn join_reply() -> Reply {
    Reply::Ok(json!({
        "instance_id": INSTANCE_ID,
        "base_uri": INSTANCE_URI,
    }))
}

pub fn client(version: ApiVersion) -> (KafkaRestClient, Arc<MockTransport>) {
    client_with_config(ClientConfig::new("http://proxy:8082", version))
}

pub fn client_with_config(config: ClientConfig) -> (KafkaRestClient, Arc<MockTransport>) {
    let mock = MockTransport::new();
    let client = KafkaRestClient::with_transport(config, mock.clone()).unwrap();
    (client, mock)
}

/// Join `GROUP` and return the instance with the join request already recorded.
pub async fn joined(version: ApiVersion) -> (ConsumerInstance, Arc<MockTransport>) {
    joined_with(version, JoinOptions::default()).await
}

pub async fn joined_with(
    version: ApiVersion,
    options: JoinOptions,
) -> (ConsumerInstance, Arc<MockTransport>) {
    joined_with_config(ClientConfig::new("http://proxy:8082", version), options).await
}

pub async fn joined_with_config(
    config: ClientConfig,
    options: JoinOptions,
) -> (ConsumerInstance, Arc<MockTransport>) {
    let (client, mock) = client_with_config(config);
    mock.script(Method::Post, "/consumers/consumer-group", join_reply());
    let instance = client.consumer(GROUP).join(options).await.unwrap();
    (instance, mock)
}

pub fn path(suffix: &str) -> String {
    format!("{}/{}", INSTANCE_URI, suffix)
}

/// Let spawned tasks run until `done` holds. Does not advance the clock.
pub async fn settle<F: Fn() -> bool>(done: F) {
    for _ in 0..10_000 {
        if done() {
            return;
        }
        tokio::task::yield_now().await;
    }
    panic!("condition not reached");
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("kafka_rest_client=debug")
        .with_test_writer()
        .try_init();
}
