//! Request descriptions and their batch grouping key

use crate::{HarvestError, Result};
use reqwest::Method;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;
use std::time::{Duration, Instant};
use tokio::sync::oneshot;
use url::Url;

/// Body attached to an outbound request
#[derive(Debug, Clone, PartialEq)]
pub enum RequestBody {
    Json(serde_json::Value),
    Text(String),
    Form(Vec<(String, String)>),
}

impl RequestBody {
    fn content_type(&self) -> &'static str {
        match self {
            RequestBody::Json(_) => "application/json",
            RequestBody::Text(_) => "text/plain",
            RequestBody::Form(_) => "application/x-www-form-urlencoded",
        }
    }
}

/// One independent fetch handed to the batching engine
#[derive(Debug, Clone)]
pub struct RequestSpec {
    pub url: Url,
    pub method: Method,
    pub headers: BTreeMap<String, String>,
    pub params: Vec<(String, String)>,
    pub body: Option<RequestBody>,

    /// Overrides the engine's default request timeout
    pub timeout: Option<Duration>,

    /// Overrides the engine's default retry budget
    pub max_retries: Option<u32>,

    /// Lower values start first within a batch
    pub priority: i32,
}

impl RequestSpec {
    pub fn new(method: Method, url: &str) -> Result<Self> {
        Ok(Self {
            url: Url::parse(url)?,
            method,
            headers: BTreeMap::new(),
            params: Vec::new(),
            body: None,
            timeout: None,
            max_retries: None,
            priority: 0,
        })
    }

    pub fn get(url: &str) -> Result<Self> {
        Self::new(Method::GET, url)
    }

    pub fn post(url: &str) -> Result<Self> {
        Self::new(Method::POST, url)
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn with_param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.push((name.into(), value.into()));
        self
    }

    pub fn with_body(mut self, body: RequestBody) -> Self {
        self.body = Some(body);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Explicit Content-Type header, else the type implied by the body
    pub fn content_type(&self) -> &str {
        self.headers
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case("content-type"))
            .map(|(_, value)| value.as_str())
            .or_else(|| self.body.as_ref().map(RequestBody::content_type))
            .unwrap_or("")
    }

    /// `scheme://host:port` the request is sent to
    pub fn destination(&self) -> String {
        let host = self.url.host_str().unwrap_or("");
        match self.url.port_or_known_default() {
            Some(port) => format!("{}://{}:{}", self.url.scheme(), host, port),
            None => format!("{}://{}", self.url.scheme(), host),
        }
    }

    /// Grouping key: host, method, first path segment and content type
    pub fn batch_key(&self) -> BatchKey {
        let path_prefix = self
            .url
            .path_segments()
            .and_then(|mut segments| segments.next())
            .unwrap_or("");

        let mut hasher = Sha256::new();
        for part in [
            self.destination().as_str(),
            self.method.as_str(),
            path_prefix,
            self.content_type(),
        ] {
            hasher.update(part.as_bytes());
            hasher.update([0u8]);
        }
        BatchKey(hex::encode(hasher.finalize()))
    }
}

/// Hex digest identifying a group of similar requests
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BatchKey(String);

impl BatchKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BatchKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Short form keeps log lines readable
        f.write_str(&self.0[..self.0.len().min(12)])
    }
}

/// Payload of a completed request
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ResponseData {
    Json(serde_json::Value),
    Text(String),
}

impl ResponseData {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            ResponseData::Text(text) => Some(text),
            ResponseData::Json(_) => None,
        }
    }

    pub fn as_json(&self) -> Option<&serde_json::Value> {
        match self {
            ResponseData::Json(value) => Some(value),
            ResponseData::Text(_) => None,
        }
    }
}

/// Result delivered to the caller of `add_request`
#[derive(Debug, Clone, Serialize)]
pub struct BatchResponse {
    pub status: u16,
    pub headers: BTreeMap<String, String>,
    pub data: ResponseData,

    /// Final URL after redirects
    pub url: String,
}

/// A queued request waiting for its batch to dispatch
pub(crate) struct BatchedRequest {
    pub spec: RequestSpec,
    pub responder: oneshot::Sender<Result<BatchResponse>>,
    pub attempts: u32,
    pub enqueued_at: Instant,
}

impl BatchedRequest {
    pub fn new(spec: RequestSpec, responder: oneshot::Sender<Result<BatchResponse>>) -> Self {
        Self {
            spec,
            responder,
            attempts: 0,
            enqueued_at: Instant::now(),
        }
    }

    /// Resolves the caller's handle; a vanished caller is not an error
    pub fn resolve(self, result: Result<BatchResponse>) -> bool {
        self.responder.send(result).is_ok()
    }
}

impl From<oneshot::error::RecvError> for HarvestError {
    fn from(_: oneshot::error::RecvError) -> Self {
        HarvestError::Resource("batched request dropped before completion".to_string())
    }
}
