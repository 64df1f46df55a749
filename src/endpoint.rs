//! Endpoint descriptors and wire request construction
//!
//! An [`Endpoint`] describes one remote operation — method, path, query,
//! headers, optional body, and how to decode the response — independent of
//! any transport detail. The orchestrator turns it into a [`WireRequest`]
//! against its configured base URL. Decoding defaults to JSON via serde and
//! can be overridden per endpoint type.

use serde::Serialize;
use serde::de::DeserializeOwned;
use std::fmt;
use url::Url;

use crate::error::{FetchError, Result};

/// HTTP method of a wire request
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Method {
    /// GET
    Get,
    /// POST
    Post,
    /// PUT
    Put,
    /// DELETE
    Delete,
    /// PATCH
    Patch,
}

impl Method {
    /// Canonical upper-case method name
    pub fn as_str(self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Delete => "DELETE",
            Method::Patch => "PATCH",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A fully-built request ready to hand to the HTTP transport
#[derive(Clone, Debug)]
pub struct WireRequest {
    /// HTTP method
    pub method: Method,
    /// Absolute URL including query parameters
    pub url: Url,
    /// Request headers as name/value pairs
    pub headers: Vec<(String, String)>,
    /// Optional request body
    pub body: Option<Vec<u8>>,
}

/// Abstract description of one remote operation
///
/// Implementations name the path and shape of a single API call; everything
/// has a sensible default except `path`. The associated `Response` type must
/// be `Clone` because a task delivers the decoded value to every registered
/// completion handler.
pub trait Endpoint: Send + Sync + 'static {
    /// Decoded response type
    type Response: DeserializeOwned + Clone + Send + 'static;

    /// HTTP method (default GET)
    fn method(&self) -> Method {
        Method::Get
    }

    /// Path relative to the orchestrator's base URL
    fn path(&self) -> String;

    /// Query parameters appended to the URL
    fn query(&self) -> Vec<(String, String)> {
        Vec::new()
    }

    /// Extra request headers
    fn headers(&self) -> Vec<(String, String)> {
        Vec::new()
    }

    /// Encoded request body; encoding failure is fatal and never retried
    fn body(&self) -> Result<Option<Vec<u8>>> {
        Ok(None)
    }

    /// Label used for the fetch task, visible in logs
    fn label(&self) -> String {
        format!("{} {}", self.method(), self.path())
    }

    /// Decode the raw response body (default: JSON)
    fn decode(&self, bytes: &[u8]) -> Result<Self::Response> {
        serde_json::from_slice(bytes).map_err(|e| FetchError::Decoding(e.to_string()))
    }
}

/// Encode a serde value as a JSON request body
pub fn encode_json<B: Serialize>(body: &B) -> Result<Vec<u8>> {
    serde_json::to_vec(body).map_err(|e| FetchError::Encoding(e.to_string()))
}

/// Build the wire request for `endpoint` against `base`.
pub(crate) fn build_request<P: Endpoint>(endpoint: &P, base: &Url) -> Result<WireRequest> {
    let mut url = base
        .join(&endpoint.path())
        .map_err(|e| FetchError::Encoding(format!("invalid endpoint path: {e}")))?;

    let query = endpoint.query();
    if !query.is_empty() {
        url.query_pairs_mut()
            .extend_pairs(query.iter().map(|(k, v)| (k.as_str(), v.as_str())));
    }

    Ok(WireRequest {
        method: endpoint.method(),
        url,
        headers: endpoint.headers(),
        body: endpoint.body()?,
    })
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Clone, Debug, Deserialize, PartialEq)]
    struct Account {
        id: String,
        balance: f64,
    }

    struct AccountsEndpoint {
        currency: String,
    }

    impl Endpoint for AccountsEndpoint {
        type Response = Vec<Account>;

        fn path(&self) -> String {
            "accounts".to_string()
        }

        fn query(&self) -> Vec<(String, String)> {
            vec![("currency".into(), self.currency.clone())]
        }

        fn headers(&self) -> Vec<(String, String)> {
            vec![("x-app-version".into(), "1.2.3".into())]
        }
    }

    fn base() -> Url {
        Url::parse("https://api.example.com/v1/").unwrap()
    }

    #[test]
    fn builds_url_from_base_path_and_query() {
        let endpoint = AccountsEndpoint {
            currency: "USD".into(),
        };
        let request = build_request(&endpoint, &base()).unwrap();

        assert_eq!(request.method, Method::Get);
        assert_eq!(
            request.url.as_str(),
            "https://api.example.com/v1/accounts?currency=USD"
        );
        assert_eq!(request.headers, vec![("x-app-version".into(), "1.2.3".into())]);
        assert!(request.body.is_none());
    }

    #[test]
    fn default_decode_parses_json() {
        let endpoint = AccountsEndpoint {
            currency: "USD".into(),
        };
        let accounts = endpoint
            .decode(br#"[{"id":"a-1","balance":120.5}]"#)
            .unwrap();
        assert_eq!(
            accounts,
            vec![Account {
                id: "a-1".into(),
                balance: 120.5
            }]
        );
    }

    #[test]
    fn decode_failure_maps_to_decoding_error() {
        let endpoint = AccountsEndpoint {
            currency: "USD".into(),
        };
        let error = endpoint.decode(b"not json").unwrap_err();
        assert!(matches!(error, FetchError::Decoding(_)));
    }

    #[test]
    fn encode_json_round_trips_a_body() {
        #[derive(Serialize)]
        struct Seed {
            amount: u64,
        }
        let bytes = encode_json(&Seed { amount: 1000 }).unwrap();
        assert_eq!(bytes, br#"{"amount":1000}"#);
    }

    #[test]
    fn endpoint_label_names_method_and_path() {
        let endpoint = AccountsEndpoint {
            currency: "USD".into(),
        };
        assert_eq!(endpoint.label(), "GET accounts");
    }
}
