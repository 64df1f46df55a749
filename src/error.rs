//! Error types for tasknet
//!
//! The fetch orchestrator classifies every raw outcome exactly once, at the
//! boundary between the HTTP transport and the retry loop. Everything above
//! that boundary (combinators, callers) only ever sees [`FetchError`] and
//! never needs to inspect transport internals. Retry behavior is determined
//! solely by the variant (see [`crate::retry`]), never by matching on error
//! messages.

use std::time::Duration;
use thiserror::Error;

/// Result type alias for tasknet fetch operations
pub type Result<T> = std::result::Result<T, FetchError>;

/// Classified fetch error
///
/// The taxonomy is flat: transport-layer, protocol-layer (one variant per
/// interesting HTTP status class), and payload-layer failures. Variants carry
/// rendered messages rather than source errors so the type stays `Clone` —
/// a task delivers the same outcome to every registered completion handler.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    /// Transport failure that is neither a timeout nor a dropped connection
    #[error("network error: {0}")]
    Network(String),

    /// The HTTP layer's deadline elapsed before a response arrived
    #[error("request timed out")]
    TimedOut,

    /// The connection was refused, reset, or dropped mid-flight
    #[error("connection lost")]
    ConnectionLost,

    /// HTTP 400
    #[error("bad request")]
    BadRequest,

    /// HTTP 401
    #[error("unauthorized")]
    Unauthorized,

    /// HTTP 403
    #[error("forbidden")]
    Forbidden,

    /// HTTP 404
    #[error("not found")]
    NotFound,

    /// HTTP 429 with the server-supplied (or fallback) cool-down
    #[error("too many requests, retry after {0:?}")]
    TooManyRequests(Duration),

    /// HTTP 5xx with the concrete status code
    #[error("server error: HTTP {0}")]
    ServerError(u16),

    /// Any other non-success HTTP status
    #[error("unexpected HTTP status {0}")]
    Http(u16),

    /// The HTTP envelope was missing or carried no usable body
    #[error("invalid response")]
    InvalidResponse,

    /// The response body could not be decoded into the endpoint's type
    #[error("decoding error: {0}")]
    Decoding(String),

    /// The request body could not be encoded; fatal, never retried
    #[error("encoding error: {0}")]
    Encoding(String),
}

impl FetchError {
    /// Map an HTTP status code to its classified error kind.
    ///
    /// Returns `None` for success statuses (2xx). `rate_limit_wait` is the
    /// cool-down attached to a 429 — the caller resolves the server's
    /// `Retry-After` hint (or its configured fallback) before classifying.
    pub fn from_status(status: u16, rate_limit_wait: Duration) -> Option<FetchError> {
        match status {
            200..=299 => None,
            400 => Some(FetchError::BadRequest),
            401 => Some(FetchError::Unauthorized),
            403 => Some(FetchError::Forbidden),
            404 => Some(FetchError::NotFound),
            429 => Some(FetchError::TooManyRequests(rate_limit_wait)),
            500..=599 => Some(FetchError::ServerError(status)),
            other => Some(FetchError::Http(other)),
        }
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    const WAIT: Duration = Duration::from_secs(30);

    #[test]
    fn success_statuses_are_not_errors() {
        assert_eq!(FetchError::from_status(200, WAIT), None);
        assert_eq!(FetchError::from_status(201, WAIT), None);
        assert_eq!(FetchError::from_status(204, WAIT), None);
        assert_eq!(FetchError::from_status(299, WAIT), None);
    }

    #[test]
    fn client_errors_map_to_distinct_kinds() {
        assert_eq!(FetchError::from_status(400, WAIT), Some(FetchError::BadRequest));
        assert_eq!(FetchError::from_status(401, WAIT), Some(FetchError::Unauthorized));
        assert_eq!(FetchError::from_status(403, WAIT), Some(FetchError::Forbidden));
        assert_eq!(FetchError::from_status(404, WAIT), Some(FetchError::NotFound));
    }

    #[test]
    fn rate_limit_status_carries_the_wait_hint() {
        assert_eq!(
            FetchError::from_status(429, WAIT),
            Some(FetchError::TooManyRequests(WAIT))
        );
    }

    #[test]
    fn server_errors_keep_the_concrete_status() {
        assert_eq!(
            FetchError::from_status(500, WAIT),
            Some(FetchError::ServerError(500))
        );
        assert_eq!(
            FetchError::from_status(503, WAIT),
            Some(FetchError::ServerError(503))
        );
        assert_eq!(
            FetchError::from_status(599, WAIT),
            Some(FetchError::ServerError(599))
        );
    }

    #[test]
    fn unclassified_statuses_fall_through_to_generic_http() {
        assert_eq!(FetchError::from_status(301, WAIT), Some(FetchError::Http(301)));
        assert_eq!(FetchError::from_status(418, WAIT), Some(FetchError::Http(418)));
        assert_eq!(FetchError::from_status(422, WAIT), Some(FetchError::Http(422)));
    }

    #[test]
    fn display_messages_are_stable() {
        assert_eq!(FetchError::TimedOut.to_string(), "request timed out");
        assert_eq!(FetchError::ServerError(502).to_string(), "server error: HTTP 502");
        assert_eq!(
            FetchError::Decoding("missing field `id`".into()).to_string(),
            "decoding error: missing field `id`"
        );
    }
}
