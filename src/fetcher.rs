//! Resilient fetch orchestration — cache decision, retry loop, rate-limit gate
//!
//! A [`Fetcher`] turns an [`Endpoint`] into a [`Task`] whose work decides
//! cache-vs-network, performs the HTTP call through the abstract transport,
//! classifies the raw outcome exactly once, and re-enters the attempt loop on
//! retryable failures with full-jitter exponential backoff. A 429 records its
//! cool-down in the shared [`RateLimiter`], throttling every sibling and
//! future fetch on the same orchestrator.
//!
//! Fetchers are value-like configurations: [`Fetcher::caching`] returns a new
//! instance sharing the same transport, cache, and rate limiter, so a caller
//! can hold a caching and a non-caching view of the same endpoint set
//! concurrently.
//!
//! # Example
//!
//! ```no_run
//! use tasknet::endpoint::{Endpoint, Method};
//! use tasknet::fetcher::Fetcher;
//! use tasknet::transport::ReqwestTransport;
//! use url::Url;
//!
//! #[derive(Clone, Debug, serde::Deserialize)]
//! struct Portfolio {
//!     total: f64,
//! }
//!
//! struct PortfolioEndpoint;
//!
//! impl Endpoint for PortfolioEndpoint {
//!     type Response = Portfolio;
//!
//!     fn path(&self) -> String {
//!         "portfolio".into()
//!     }
//! }
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let transport = ReqwestTransport::new()?;
//! let base = Url::parse("https://api.example.com/v1/")?;
//! let fetcher = Fetcher::new(transport, base).caching(std::time::Duration::from_secs(60));
//!
//! let task = fetcher.fetch(PortfolioEndpoint);
//! task.on_completion(|outcome| println!("{outcome:?}"));
//! task.run();
//! # Ok(())
//! # }
//! ```

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use tokio::runtime::Handle;
use url::Url;

use crate::cache::{CacheKey, CacheKeyFn, MemoryCache, ResponseCache, default_cache_key};
use crate::config::RetryConfig;
use crate::endpoint::{Endpoint, WireRequest, build_request};
use crate::error::FetchError;
use crate::rate_limit::RateLimiter;
use crate::retry::{RetryAction, RetryClass, backoff_delay};
use crate::task::{Task, TaskState};
use crate::transport::{HttpTransport, RawResponse, TransportError};

/// Fetch orchestrator for one remote API
///
/// Cheap to clone; clones share the transport, response cache, and rate
/// limiter while carrying their own cache policy and retry configuration.
#[derive(Clone)]
pub struct Fetcher {
    transport: Arc<dyn HttpTransport>,
    base_url: Url,
    cache: Arc<dyn ResponseCache>,
    cache_key_fn: CacheKeyFn,
    cache_expiry: Option<Duration>,
    rate_limiter: Arc<RateLimiter>,
    retry: RetryConfig,
}

impl Fetcher {
    /// Create an orchestrator with default retry configuration and an
    /// in-memory cache (caching stays off until [`Fetcher::caching`] is
    /// called).
    pub fn new(transport: impl HttpTransport, base_url: Url) -> Self {
        Self::with_config(transport, base_url, RetryConfig::default())
    }

    /// Create an orchestrator with explicit retry configuration
    pub fn with_config(transport: impl HttpTransport, base_url: Url, retry: RetryConfig) -> Self {
        Fetcher {
            transport: Arc::new(transport),
            base_url,
            cache: Arc::new(MemoryCache::new()),
            cache_key_fn: Arc::new(default_cache_key),
            cache_expiry: None,
            rate_limiter: Arc::new(RateLimiter::new()),
            retry,
        }
    }

    /// A view of this orchestrator that serves responses younger than
    /// `expiry` from the cache.
    ///
    /// The returned instance shares the underlying transport, cache, and
    /// rate limiter; the receiver is left untouched.
    #[must_use]
    pub fn caching(&self, expiry: Duration) -> Self {
        let mut fetcher = self.clone();
        fetcher.cache_expiry = Some(expiry);
        fetcher
    }

    /// A view of this orchestrator with caching disabled
    #[must_use]
    pub fn without_caching(&self) -> Self {
        let mut fetcher = self.clone();
        fetcher.cache_expiry = None;
        fetcher
    }

    /// Replace the response cache (shared by all views cloned from the
    /// result)
    #[must_use]
    pub fn with_cache(&self, cache: Arc<dyn ResponseCache>) -> Self {
        let mut fetcher = self.clone();
        fetcher.cache = cache;
        fetcher
    }

    /// Replace the cache-key derivation, e.g. to fold an authenticated-user
    /// discriminator into request identity
    #[must_use]
    pub fn with_cache_key_fn(&self, cache_key_fn: CacheKeyFn) -> Self {
        let mut fetcher = self.clone();
        fetcher.cache_key_fn = cache_key_fn;
        fetcher
    }

    /// The shared rate limiter gating every fetch on this orchestrator
    pub fn rate_limiter(&self) -> &Arc<RateLimiter> {
        &self.rate_limiter
    }

    /// Drop every cached response
    pub fn clear_cache(&self) {
        self.cache.clear();
    }

    /// Drop the cached response for one endpoint, if any
    pub fn invalidate<P: Endpoint>(&self, endpoint: &P) {
        if let Ok(request) = build_request(endpoint, &self.base_url) {
            self.cache.invalidate(&(self.cache_key_fn)(&request));
        }
    }

    /// Fetch `endpoint` with the configured retry budget
    pub fn fetch<P: Endpoint>(&self, endpoint: P) -> Task<P::Response, FetchError> {
        self.fetch_with_retries(endpoint, self.retry.max_attempts)
    }

    /// Fetch `endpoint` with an explicit retry budget.
    ///
    /// Returns a `Ready` task; nothing happens until the caller runs it.
    /// Cancelling the task aborts the in-flight request.
    pub fn fetch_with_retries<P: Endpoint>(
        &self,
        endpoint: P,
        retry_count: u32,
    ) -> Task<P::Response, FetchError> {
        let fetcher = self.clone();
        Task::with_label(endpoint.label(), move |task: Task<P::Response, FetchError>| {
            // Building the wire request is the only place encoding can fail;
            // it is fatal to the fetch and never retried.
            let request = match build_request(&endpoint, &fetcher.base_url) {
                Ok(request) => request,
                Err(error) => {
                    task.complete(Err(error));
                    return;
                }
            };
            let key = (fetcher.cache_key_fn)(&request);

            if let Some(expiry) = fetcher.cache_expiry {
                let now = SystemTime::now();
                let fresh = |stored_at: SystemTime| {
                    now.duration_since(stored_at)
                        .map(|age| age < expiry)
                        .unwrap_or(true)
                };
                if let Some(bytes) = fetcher.cache.get(&key, &fresh) {
                    match endpoint.decode(&bytes) {
                        Ok(value) => {
                            tracing::debug!(label = %task.label().unwrap_or(""), "served from cache");
                            task.complete(Ok(value));
                            return;
                        }
                        Err(error) => {
                            tracing::warn!(error = %error, "cached bytes failed to decode; refetching");
                            fetcher.cache.invalidate(&key);
                        }
                    }
                }
            }

            let executor = task.executor().unwrap_or_else(Handle::current);
            let attempts = executor.spawn(run_attempts(
                fetcher,
                endpoint,
                request,
                key,
                retry_count,
                task.clone(),
            ));
            // External cancel aborts the in-flight attempt (and any pending
            // backoff sleep) along with the request itself.
            task.on_cancel(move || attempts.abort());
        })
    }
}

impl fmt::Debug for Fetcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Fetcher")
            .field("base_url", &self.base_url.as_str())
            .field("cache_expiry", &self.cache_expiry)
            .field("retry", &self.retry)
            .finish()
    }
}

/// The retry loop: gate, perform, classify, decide.
async fn run_attempts<P: Endpoint>(
    fetcher: Fetcher,
    endpoint: P,
    request: WireRequest,
    key: CacheKey,
    attempts_max: u32,
    task: Task<P::Response, FetchError>,
) {
    let mut attempts_left = attempts_max;
    loop {
        if task.state() != TaskState::Executing {
            return;
        }

        // Blocked fetches fail fast without consuming an attempt; the caller
        // sees the remaining wait.
        if let Some(wait) = fetcher.rate_limiter.reset_interval() {
            tracing::warn!(
                label = %task.label().unwrap_or(""),
                wait_secs = wait.as_secs(),
                "rate limit gate closed; failing fast"
            );
            task.complete(Err(FetchError::TooManyRequests(wait)));
            return;
        }

        let response = fetcher.transport.perform(request.clone()).await;
        match evaluate(&fetcher, &endpoint, &key, response) {
            Ok(value) => {
                task.complete(Ok(value));
                return;
            }
            Err(error) => {
                if let FetchError::TooManyRequests(wait) = &error {
                    // One 429 throttles every fetch sharing this limiter.
                    fetcher.rate_limiter.set_reset_interval(*wait);
                    tracing::warn!(
                        label = %task.label().unwrap_or(""),
                        wait_secs = wait.as_secs(),
                        "server rate limit hit; deferring subsequent fetches"
                    );
                    task.complete(Err(error));
                    return;
                }

                match error.retry_action() {
                    RetryAction::Terminate => {
                        task.complete(Err(error));
                        return;
                    }
                    _ if attempts_left == 0 => {
                        tracing::error!(
                            label = %task.label().unwrap_or(""),
                            error = %error,
                            attempts = attempts_max + 1,
                            "fetch failed after all retry attempts exhausted"
                        );
                        task.complete(Err(error));
                        return;
                    }
                    RetryAction::RetryImmediately => {
                        attempts_left -= 1;
                        tracing::warn!(
                            label = %task.label().unwrap_or(""),
                            error = %error,
                            attempts_left,
                            "transient transport failure; retrying"
                        );
                    }
                    RetryAction::RetryAfterBackoff => {
                        let attempt_index = attempts_max - attempts_left;
                        attempts_left -= 1;
                        let delay = backoff_delay(
                            attempt_index,
                            fetcher.retry.base_delay,
                            fetcher.retry.max_delay,
                            &mut rand::thread_rng(),
                        );
                        tracing::warn!(
                            label = %task.label().unwrap_or(""),
                            error = %error,
                            attempts_left,
                            delay_ms = delay.as_millis() as u64,
                            "server error; retrying after backoff"
                        );
                        tokio::time::sleep(delay).await;
                    }
                }
            }
        }
    }
}

/// Classify one raw attempt outcome and decode on success.
///
/// This is the single boundary where transport internals become classified
/// [`FetchError`] kinds; nothing above it inspects statuses or messages.
fn evaluate<P: Endpoint>(
    fetcher: &Fetcher,
    endpoint: &P,
    key: &CacheKey,
    response: Result<RawResponse, TransportError>,
) -> Result<P::Response, FetchError> {
    let raw = match response {
        Ok(raw) => raw,
        Err(TransportError::TimedOut) => return Err(FetchError::TimedOut),
        Err(TransportError::ConnectionLost) => return Err(FetchError::ConnectionLost),
        Err(TransportError::Other(message)) => return Err(FetchError::Network(message)),
    };

    let rate_limit_wait = raw
        .retry_after()
        .unwrap_or(fetcher.retry.rate_limit_fallback);
    if let Some(error) = FetchError::from_status(raw.status, rate_limit_wait) {
        return Err(error);
    }
    if raw.body.is_empty() {
        return Err(FetchError::InvalidResponse);
    }

    let value = endpoint.decode(&raw.body)?;
    if fetcher.cache_expiry.is_some() {
        fetcher
            .cache
            .put(key.clone(), raw.body.clone(), SystemTime::now());
    }
    Ok(value)
}
