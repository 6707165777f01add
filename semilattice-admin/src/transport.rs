//! Transport layer abstraction.
//!
//! The mirror only needs one primitive: send a request to a specific node
//! and get back its status line and body. [`HttpTransport`] does that over
//! HTTP; [`mock::SimulatedCluster`] does it in-process for tests.

pub mod mock;

use crate::config::MirrorConfig;
use crate::error::{AdminError, AdminResult};
use async_trait::async_trait;
use reqwest::Client;
use reqwest::header::CONTENT_TYPE;
use semilattice_types::NodeAddress;
use serde_json::Value;
use std::fmt;
use std::time::Duration;
use tracing::debug;

/// HTTP method of a node request.
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

/// A request against one node's admin API.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeRequest {
    pub method: Method,
    pub path: String,
    /// JSON body text, if any.
    pub body: Option<String>,
}

impl NodeRequest {
    pub fn get(path: impl Into<String>) -> Self {
        Self {
            method: Method::Get,
            path: path.into(),
            body: None,
        }
    }

    pub fn post(path: impl Into<String>, body: &Value) -> Self {
        Self {
            method: Method::Post,
            path: path.into(),
            body: Some(body.to_string()),
        }
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self {
            method: Method::Delete,
            path: path.into(),
            body: None,
        }
    }
}

/// A node's raw answer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeResponse {
    pub status: u16,
    pub reason: String,
    pub body: String,
}

impl NodeResponse {
    /// A 200 response with the given body.
    pub fn ok(body: impl Into<String>) -> Self {
        Self {
            status: 200,
            reason: "OK".to_string(),
            body: body.into(),
        }
    }

    /// An error response with an empty body.
    pub fn error(status: u16, reason: impl Into<String>) -> Self {
        Self {
            status,
            reason: reason.into(),
            body: String::new(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Returns the body, or the status and reason as a [`AdminError::RemoteError`].
    pub fn into_body(self) -> AdminResult<String> {
        if self.is_success() {
            Ok(self.body)
        } else {
            Err(AdminError::RemoteError {
                status: self.status,
                reason: self.reason,
            })
        }
    }
}

/// Sends requests to individual cluster nodes.
#[async_trait]
pub trait NodeTransport: Send + Sync {
    /// Sends a request to `node` and waits for the response.
    ///
    /// Non-2xx statuses are returned as responses, not errors; only
    /// connection-level failures are errors.
    async fn send(&self, node: &NodeAddress, request: NodeRequest) -> AdminResult<NodeResponse>;
}

/// Transport over plain HTTP.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    /// Creates a transport whose requests are bounded by `timeout`.
    pub fn new(timeout: Duration) -> AdminResult<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }

    /// Creates a transport using the configured per-request timeout.
    pub fn from_config(config: &MirrorConfig) -> AdminResult<Self> {
        Self::new(config.request_timeout())
    }
}

#[async_trait]
impl NodeTransport for HttpTransport {
    async fn send(&self, node: &NodeAddress, request: NodeRequest) -> AdminResult<NodeResponse> {
        let url = format!("{}{}", node.base_url(), request.path);
        debug!("{} {}", request.method, url);

        let mut builder = match request.method {
            Method::Get => self.client.get(&url),
            Method::Post => self.client.post(&url),
            Method::Delete => self.client.delete(&url),
        };
        if let Some(body) = request.body {
            builder = builder.header(CONTENT_TYPE, "application/json").body(body);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| AdminError::Transport(format!("{node}: {e}")))?;
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| AdminError::Transport(format!("{node}: reading body failed: {e}")))?;

        Ok(NodeResponse {
            status: status.as_u16(),
            reason: status.canonical_reason().unwrap_or_default().to_string(),
            body,
        })
    }
}
