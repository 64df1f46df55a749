//! # tasknet
//!
//! Cancellable task primitives and resilient HTTP fetch orchestration.
//!
//! ## Design Philosophy
//!
//! tasknet is designed to be:
//! - **Library-first** - No CLI or UI, purely a Rust crate for embedding
//! - **Explicit** - Task lifecycles are observable state machines, not
//!   opaque futures; cancellation is cooperative and propagates only where
//!   callers wired it
//! - **Resilient by default** - Fetches classify failures once, retry with
//!   full-jitter exponential backoff, and share a rate-limit gate so one
//!   throttled request defers its siblings
//! - **Pluggable** - HTTP transport, response cache, cache-key derivation,
//!   and decoding are capabilities injected by the caller
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::time::Duration;
//! use tasknet::{Endpoint, Fetcher, ReqwestTransport};
//! use url::Url;
//!
//! #[derive(Clone, Debug, serde::Deserialize)]
//! struct Account {
//!     id: String,
//!     balance: f64,
//! }
//!
//! struct AccountsEndpoint;
//!
//! impl Endpoint for AccountsEndpoint {
//!     type Response = Vec<Account>;
//!
//!     fn path(&self) -> String {
//!         "accounts".into()
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let transport = ReqwestTransport::new()?;
//!     let base = Url::parse("https://api.example.com/v1/")?;
//!     let fetcher = Fetcher::new(transport, base).caching(Duration::from_secs(30));
//!
//!     let task = fetcher.fetch(AccountsEndpoint);
//!     task.on_completion(|outcome| println!("accounts: {outcome:?}"));
//!     task.run();
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Response caching keyed by request identity
pub mod cache;
/// Sequential task composition
pub mod chain;
/// Configuration types
pub mod config;
/// Endpoint descriptors and wire request construction
pub mod endpoint;
/// Error types
pub mod error;
/// Fetch orchestration (cache decision, retry loop, rate-limit gate)
pub mod fetcher;
/// Parallel task fan-out
pub mod group;
/// Shared rate-limit gate
pub mod rate_limit;
/// Retry classification and backoff delays
pub mod retry;
/// Cancellable task primitive
pub mod task;
/// Abstract HTTP capability and the reqwest-backed transport
pub mod transport;

// Re-export commonly used types
pub use cache::{CacheKey, CacheKeyFn, MemoryCache, ResponseCache, default_cache_key};
pub use chain::Chain;
pub use config::RetryConfig;
pub use endpoint::{Endpoint, Method, WireRequest, encode_json};
pub use error::{FetchError, Result};
pub use fetcher::Fetcher;
pub use group::{CancelPolicy, GroupOptions};
pub use rate_limit::{Clock, RateLimiter};
pub use retry::{RetryAction, RetryClass, backoff_delay};
pub use task::{Outcome, Task, TaskId, TaskState};
pub use transport::{HttpTransport, RawResponse, ReqwestTransport, TransportError};
