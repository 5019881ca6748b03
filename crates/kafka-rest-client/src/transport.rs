//! HTTP transport seam.
//!
//! The consumer engine only talks to the proxy through [`Transport`]. Each call
//! resolves exactly once with the parsed JSON body or a [`ClientError`]; status
//! mapping, timeouts and connection handling live behind the trait.
//!
//! [`HttpTransport`] is the production implementation over `reqwest`. Tests
//! substitute an in-memory transport.

use crate::config::ClientConfig;
use crate::error::{ClientError, Result};
use crate::version::ApiVersion;
use async_trait::async_trait;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use serde_json::Value;
use std::fmt;
use url::Url;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Post,
    Delete,
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Delete => "DELETE",
        })
    }
}

impl From<Method> for reqwest::Method {
    fn from(m: Method) -> Self {
        match m {
            Method::Get => reqwest::Method::GET,
            Method::Post => reqwest::Method::POST,
            Method::Delete => reqwest::Method::DELETE,
        }
    }
}

/// One request against the proxy.
///
/// `path` is either relative to the configured base URL or an absolute URL
/// (instance URIs handed out by the proxy are absolute).
#[derive(Debug, Clone, PartialEq)]
pub struct HttpRequest {
    pub method: Method,
    pub path: String,
    pub body: Option<Value>,
    /// Overrides the default `Accept` header; poll requests use this to ask for
    /// the codec's embedded format.
    pub accept: Option<String>,
}

impl HttpRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            body: None,
            accept: None,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::Get, path)
    }

    pub fn post(path: impl Into<String>, body: Option<Value>) -> Self {
        Self {
            body,
            ..Self::new(Method::Post, path)
        }
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::Delete, path)
    }

    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    pub fn with_accept(mut self, accept: impl Into<String>) -> Self {
        self.accept = Some(accept.into());
        self
    }
}

#[async_trait]
pub trait Transport: Send + Sync {
    /// Perform one request and return the parsed body (`Value::Null` when empty).
    async fn request(&self, request: HttpRequest) -> Result<Value>;

    async fn get(&self, path: &str) -> Result<Value> {
        self.request(HttpRequest::get(path)).await
    }

    async fn post(&self, path: &str, body: Option<Value>) -> Result<Value> {
        self.request(HttpRequest::post(path, body)).await
    }

    async fn delete(&self, path: &str) -> Result<Value> {
        self.request(HttpRequest::delete(path)).await
    }
}

/// Percent-encode one path segment (`encodeURIComponent` semantics, space as `%20`).
pub fn escape_segment(segment: &str) -> String {
    url::form_urlencoded::byte_serialize(segment.as_bytes())
        .collect::<String>()
        .replace('+', "%20")
}

/// Join path pieces with single slashes, skipping empty pieces.
///
/// The first piece may be an absolute URL; its scheme separator is preserved.
pub fn join_path<I, S>(parts: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut joined = String::new();
    for part in parts {
        let part = part.as_ref();
        if part.is_empty() {
            continue;
        }
        if joined.is_empty() {
            joined.push_str(part.trim_end_matches('/'));
            continue;
        }
        joined.push('/');
        joined.push_str(part.trim_matches('/'));
    }
    joined
}

/// `reqwest`-backed transport.
pub struct HttpTransport {
    base_url: Url,
    version: ApiVersion,
    http_client: reqwest::Client,
}

impl HttpTransport {
    pub fn new(config: &ClientConfig) -> Result<Self> {
        let base_url = Url::parse(&config.url)
            .map_err(|e| ClientError::Config(format!("invalid url '{}': {}", config.url, e)))?;
        let http_client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()?;

        Ok(Self {
            base_url,
            version: config.version,
            http_client,
        })
    }

    fn resolve(&self, path: &str) -> Result<Url> {
        if path.starts_with("http://") || path.starts_with("https://") {
            return Url::parse(path)
                .map_err(|e| ClientError::InvalidArgument(format!("invalid url '{}': {}", path, e)));
        }
        let mut url = self.base_url.clone();
        let joined = join_path([url.path(), path]);
        url.set_path(if joined.is_empty() { "/" } else { &joined });
        Ok(url)
    }

    fn default_content_type(&self) -> String {
        format!("application/vnd.kafka.v{}+json", self.version.as_u8())
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn request(&self, request: HttpRequest) -> Result<Value> {
        let url = self.resolve(&request.path)?;
        let content_type = self.default_content_type();
        let accept = request
            .accept
            .clone()
            .unwrap_or_else(|| content_type.clone());

        tracing::debug!(method = %request.method, url = %url, "Sending request");

        let mut builder = self
            .http_client
            .request(request.method.into(), url.clone())
            .header(ACCEPT, accept);
        if let Some(body) = &request.body {
            builder = builder
                .header(CONTENT_TYPE, content_type)
                .body(serde_json::to_vec(body)?);
        } else if request.method == Method::Post {
            builder = builder.header(CONTENT_TYPE, content_type);
        }

        let response = builder.send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            tracing::debug!(
                method = %request.method,
                url = %url,
                status = status.as_u16(),
                "Request failed"
            );
            return Err(ClientError::Transport {
                status: Some(status.as_u16()),
                message: if body.is_empty() {
                    status.to_string()
                } else {
                    body
                },
            });
        }

        let text = response.text().await?;
        if text.trim().is_empty() {
            return Ok(Value::Null);
        }
        Ok(serde_json::from_str(&text)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escape_segment() {
        assert_eq!(escape_segment("group"), "group");
        assert_eq!(escape_segment("my group"), "my%20group");
        assert_eq!(escape_segment("a/b"), "a%2Fb");
        assert_eq!(escape_segment("a+b"), "a%2Bb");
    }

    #[test]
    fn test_join_path() {
        assert_eq!(join_path(["/consumers", "g"]), "/consumers/g");
        assert_eq!(
            join_path(["http://proxy/consumers/g/instances/i/", "positions", ""]),
            "http://proxy/consumers/g/instances/i/positions"
        );
        assert_eq!(join_path(["/a/", "/b/", "c"]), "/a/b/c");
    }

    #[test]
    fn test_resolve_relative_against_base() {
        let config = ClientConfig::new("http://proxy:8082/kafka/", ApiVersion::V2);
        let transport = HttpTransport::new(&config).unwrap();
        let url = transport.resolve("/consumers/my%20group").unwrap();
        assert_eq!(url.as_str(), "http://proxy:8082/kafka/consumers/my%20group");
    }

    #[test]
    fn test_resolve_absolute_untouched() {
        let config = ClientConfig::default();
        let transport = HttpTransport::new(&config).unwrap();
        let url = transport
            .resolve("http://other:8082/consumers/g/instances/i")
            .unwrap();
        assert_eq!(url.as_str(), "http://other:8082/consumers/g/instances/i");
    }

    #[test]
    fn test_invalid_base_url() {
        let config = ClientConfig::new("not a url", ApiVersion::V1);
        assert!(matches!(
            HttpTransport::new(&config),
            Err(ClientError::Config(_))
        ));
    }

    #[test]
    fn test_default_content_type_follows_version() {
        let transport = HttpTransport::new(&ClientConfig::new("http://p", ApiVersion::V2)).unwrap();
        assert_eq!(transport.default_content_type(), "application/vnd.kafka.v2+json");
    }
}
