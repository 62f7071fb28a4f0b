//! Pooled HTTP client for talking to backend servers
//!
//! One shared client pair serves every session: proxied requests reuse pooled
//! connections to each backend port, and a dedicated client handles readiness
//! probes and the hub's own JSON calls against the backend.

use http_body_util::{combinators::BoxBody, BodyExt, Full};
use hyper::body::{Bytes, Incoming};
use hyper::header::{HeaderName, CONTENT_TYPE};
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use std::time::Duration;
use tracing::debug;

/// Error type for backend client operations
#[derive(Debug)]
pub enum ClientError {
    /// Error from the HTTP client
    Client(hyper_util::client::legacy::Error),
    /// Error building a request
    RequestBuild(String),
    /// The call did not complete within its deadline
    Timeout,
}

impl ClientError {
    /// True when the failure means the backend could not be reached at all,
    /// as opposed to a protocol-level error
    pub fn is_unreachable(&self) -> bool {
        match self {
            ClientError::Client(e) => e.is_connect(),
            ClientError::Timeout => true,
            ClientError::RequestBuild(_) => false,
        }
    }
}

impl std::fmt::Display for ClientError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ClientError::Client(e) => write!(f, "Client error: {}", e),
            ClientError::RequestBuild(s) => write!(f, "Request build error: {}", s),
            ClientError::Timeout => write!(f, "Backend call timed out"),
        }
    }
}

impl std::error::Error for ClientError {}

impl From<hyper_util::client::legacy::Error> for ClientError {
    fn from(err: hyper_util::client::legacy::Error) -> Self {
        ClientError::Client(err)
    }
}

/// Hop-by-hop headers that must not be forwarded in either direction
const HOP_BY_HOP: &[&str] = &[
    "host",
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
    "content-length",
];

fn is_hop_by_hop(name: &HeaderName) -> bool {
    HOP_BY_HOP.iter().any(|h| name.as_str().eq_ignore_ascii_case(h))
}

/// Shared HTTP client for all backend servers
pub struct BackendClient {
    /// Client for proxying inbound request bodies through unchanged
    proxy_client: Client<HttpConnector, Incoming>,
    /// Client for hub-originated calls (readiness probes, JSON requests)
    control_client: Client<HttpConnector, Full<Bytes>>,
}

impl BackendClient {
    /// Create a client pair with connection pooling enabled
    pub fn new() -> Self {
        let mut connector = HttpConnector::new();
        connector.set_nodelay(true);
        connector.enforce_http(true);

        let proxy_client = Client::builder(TokioExecutor::new())
            .pool_max_idle_per_host(10)
            .pool_idle_timeout(Duration::from_secs(90))
            .build(connector.clone());

        let control_client = Client::builder(TokioExecutor::new())
            .pool_max_idle_per_host(10)
            .pool_idle_timeout(Duration::from_secs(90))
            .build(connector);

        Self {
            proxy_client,
            control_client,
        }
    }

    /// Forward a request to the backend on `port`, rewriting the URI to
    /// `path_and_query` and stripping hop-by-hop headers in both directions.
    /// The body streams through without buffering.
    pub async fn forward(
        &self,
        req: Request<Incoming>,
        port: u16,
        path_and_query: &str,
    ) -> Result<Response<BoxBody<Bytes, hyper::Error>>, ClientError> {
        let uri = format!("http://127.0.0.1:{}{}", port, path_and_query);

        let (parts, body) = req.into_parts();
        let mut builder = Request::builder().method(parts.method).uri(&uri);

        for (key, value) in parts.headers.iter() {
            if !is_hop_by_hop(key) {
                builder = builder.header(key, value);
            }
        }

        let backend_req = builder
            .body(body)
            .map_err(|e| ClientError::RequestBuild(e.to_string()))?;

        let response = self.proxy_client.request(backend_req).await?;

        let (mut parts, body) = response.into_parts();
        let hop: Vec<HeaderName> = parts
            .headers
            .keys()
            .filter(|k| is_hop_by_hop(k))
            .cloned()
            .collect();
        for name in hop {
            parts.headers.remove(name);
        }

        Ok(Response::from_parts(parts, body.boxed()))
    }

    /// Probe the backend's status endpoint; true on any 2xx
    pub async fn check_status(&self, port: u16, path: &str, timeout: Duration) -> bool {
        let uri = format!("http://127.0.0.1:{}{}", port, path);

        let req = match Request::builder()
            .method(Method::GET)
            .uri(&uri)
            .body(Full::new(Bytes::new()))
        {
            Ok(r) => r,
            Err(_) => return false,
        };

        match tokio::time::timeout(timeout, self.control_client.request(req)).await {
            Ok(Ok(response)) => response.status().is_success(),
            Ok(Err(e)) => {
                debug!(port, error = %e, "Status probe failed");
                false
            }
            Err(_) => {
                debug!(port, "Status probe timed out");
                false
            }
        }
    }

    /// POST a JSON document to the backend and return the decoded response.
    ///
    /// A response body that is not valid JSON is preserved as a JSON string
    /// so callers can still relay the backend's words.
    pub async fn post_json(
        &self,
        port: u16,
        path: &str,
        payload: &serde_json::Value,
        timeout: Duration,
    ) -> Result<(StatusCode, serde_json::Value), ClientError> {
        let uri = format!("http://127.0.0.1:{}{}", port, path);
        let body = serde_json::to_vec(payload)
            .map_err(|e| ClientError::RequestBuild(e.to_string()))?;

        let req = Request::builder()
            .method(Method::POST)
            .uri(&uri)
            .header(CONTENT_TYPE, "application/json")
            .body(Full::new(Bytes::from(body)))
            .map_err(|e| ClientError::RequestBuild(e.to_string()))?;

        let response = match tokio::time::timeout(timeout, self.control_client.request(req)).await
        {
            Ok(result) => result?,
            Err(_) => return Err(ClientError::Timeout),
        };

        let status = response.status();
        let bytes = response
            .into_body()
            .collect()
            .await
            .map_err(|e| ClientError::RequestBuild(e.to_string()))?
            .to_bytes();

        let value = serde_json::from_slice(&bytes).unwrap_or_else(|_| {
            serde_json::Value::String(String::from_utf8_lossy(&bytes).into_owned())
        });

        Ok((status, value))
    }

    /// Send a bodyless DELETE to the backend, ignoring the response body
    pub async fn delete(
        &self,
        port: u16,
        path: &str,
        timeout: Duration,
    ) -> Result<StatusCode, ClientError> {
        let uri = format!("http://127.0.0.1:{}{}", port, path);

        let req = Request::builder()
            .method(Method::DELETE)
            .uri(&uri)
            .body(Full::new(Bytes::new()))
            .map_err(|e| ClientError::RequestBuild(e.to_string()))?;

        let response = match tokio::time::timeout(timeout, self.control_client.request(req)).await
        {
            Ok(result) => result?,
            Err(_) => return Err(ClientError::Timeout),
        };

        Ok(response.status())
    }
}

impl Default for BackendClient {
    fn default() -> Self {
        Self::new()
    }
}
