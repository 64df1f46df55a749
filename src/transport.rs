//! Abstract HTTP capability and the reqwest-backed production transport
//!
//! The orchestrator performs every network call through [`HttpTransport`],
//! which returns raw bytes or a [`TransportError`]. Transport errors carry
//! only the three distinctions the retry policy needs: timed out, connection
//! lost, or anything else. The finer-grained classification into
//! [`crate::error::FetchError`] happens once, in the orchestrator.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::endpoint::{Method, WireRequest};
use crate::error::FetchError;

/// Raw HTTP response handed back by a transport
#[derive(Clone, Debug)]
pub struct RawResponse {
    /// HTTP status code
    pub status: u16,
    /// Response headers, names lower-cased
    pub headers: HashMap<String, String>,
    /// Response body bytes
    pub body: Vec<u8>,
}

impl RawResponse {
    /// Server-supplied cool-down from a `Retry-After` header, if present
    /// and expressed in seconds.
    pub fn retry_after(&self) -> Option<Duration> {
        self.headers
            .get("retry-after")
            .and_then(|value| value.trim().parse::<u64>().ok())
            .map(Duration::from_secs)
    }
}

/// Failure below the HTTP protocol layer
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum TransportError {
    /// The transport's deadline elapsed
    #[error("request timed out")]
    TimedOut,
    /// The connection was refused, reset, or dropped
    #[error("connection lost")]
    ConnectionLost,
    /// Any other transport failure
    #[error("transport failure: {0}")]
    Other(String),
}

/// Abstract "perform HTTP, call back with bytes or error" capability
///
/// Cancellation is not part of this trait: the orchestrator runs each
/// attempt in an abortable spawned future and registers the abort as the
/// fetch task's cancellation handler.
#[async_trait]
pub trait HttpTransport: Send + Sync + 'static {
    /// Perform the request and return the raw response
    async fn perform(&self, request: WireRequest) -> Result<RawResponse, TransportError>;
}

/// Production transport backed by a shared [`reqwest::Client`]
#[derive(Clone, Debug)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    /// Default per-request deadline
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

    /// Create a transport with the default timeout
    pub fn new() -> Result<Self, FetchError> {
        Self::with_timeout(Self::DEFAULT_TIMEOUT)
    }

    /// Create a transport with a custom per-request deadline.
    ///
    /// The deadline surfaces as [`TransportError::TimedOut`], which the
    /// retry policy treats as immediately retryable.
    pub fn with_timeout(timeout: Duration) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| FetchError::Network(e.to_string()))?;
        Ok(ReqwestTransport { client })
    }

    /// Wrap an existing client (connection pool reuse across orchestrators)
    pub fn with_client(client: reqwest::Client) -> Self {
        ReqwestTransport { client }
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn perform(&self, request: WireRequest) -> Result<RawResponse, TransportError> {
        let method = match request.method {
            Method::Get => reqwest::Method::GET,
            Method::Post => reqwest::Method::POST,
            Method::Put => reqwest::Method::PUT,
            Method::Delete => reqwest::Method::DELETE,
            Method::Patch => reqwest::Method::PATCH,
        };

        let mut builder = self.client.request(method, request.url.clone());
        for (name, value) in &request.headers {
            builder = builder.header(name, value);
        }
        if let Some(body) = request.body {
            builder = builder.body(body);
        }

        let response = builder.send().await.map_err(classify_reqwest)?;
        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|value| (name.as_str().to_ascii_lowercase(), value.to_string()))
            })
            .collect();
        let body = response.bytes().await.map_err(classify_reqwest)?.to_vec();

        Ok(RawResponse {
            status,
            headers,
            body,
        })
    }
}

fn classify_reqwest(error: reqwest::Error) -> TransportError {
    if error.is_timeout() {
        TransportError::TimedOut
    } else if error.is_connect() {
        TransportError::ConnectionLost
    } else {
        TransportError::Other(error.to_string())
    }
}
