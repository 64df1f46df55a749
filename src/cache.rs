//! Opaque byte cache keyed by request identity
//!
//! Responses are cached as raw bytes under a [`CacheKey`] derived
//! deterministically from the wire request, so semantically-identical
//! requests hit the same slot regardless of call order. The key derivation
//! is injectable per orchestrator; the default hashes method, path,
//! canonically-ordered query pairs, and body with SHA-256. Whether a key
//! should also fold in an authenticated-user discriminator is the caller's
//! policy, expressed through a custom derivation function.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::SystemTime;

use sha2::{Digest, Sha256};

use crate::endpoint::WireRequest;

/// Deterministic identity of a request, used as the cache slot
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    /// Wrap a pre-computed key (custom derivation functions)
    pub fn new(key: impl Into<String>) -> Self {
        CacheKey(key.into())
    }

    /// The key as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Injectable cache-key derivation function
pub type CacheKeyFn = Arc<dyn Fn(&WireRequest) -> CacheKey + Send + Sync>;

/// Default request-identity derivation: SHA-256 over method, path, sorted
/// query pairs, and body.
///
/// Query pairs are sorted so `?a=1&b=2` and `?b=2&a=1` share a slot.
pub fn default_cache_key(request: &WireRequest) -> CacheKey {
    let mut hasher = Sha256::new();
    hasher.update(request.method.as_str().as_bytes());
    hasher.update(b"\n");
    hasher.update(request.url.path().as_bytes());
    hasher.update(b"\n");

    let mut pairs: Vec<(String, String)> = request
        .url
        .query_pairs()
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    pairs.sort();
    for (key, value) in pairs {
        hasher.update(key.as_bytes());
        hasher.update(b"=");
        hasher.update(value.as_bytes());
        hasher.update(b"&");
    }

    hasher.update(b"\n");
    if let Some(body) = &request.body {
        hasher.update(body);
    }

    let digest = hasher.finalize();
    let mut hex = String::with_capacity(digest.len() * 2);
    for byte in digest {
        hex.push_str(&format!("{byte:02x}"));
    }
    CacheKey(hex)
}

/// Byte-cache capability consumed by the fetch orchestrator
pub trait ResponseCache: Send + Sync {
    /// Look up `key`, applying the freshness predicate to the entry's stored
    /// timestamp. A stale entry is removed (lazy expiry) and `None` returned.
    fn get(&self, key: &CacheKey, is_valid: &dyn Fn(SystemTime) -> bool) -> Option<Vec<u8>>;

    /// Store bytes under `key` with their creation timestamp
    fn put(&self, key: CacheKey, bytes: Vec<u8>, stored_at: SystemTime);

    /// Drop one entry
    fn invalidate(&self, key: &CacheKey);

    /// Drop every entry
    fn clear(&self);
}

struct CacheEntry {
    bytes: Vec<u8>,
    stored_at: SystemTime,
}

/// In-memory [`ResponseCache`] backed by a locked map
#[derive(Default)]
pub struct MemoryCache {
    entries: Mutex<HashMap<CacheKey, CacheEntry>>,
}

impl MemoryCache {
    /// Create an empty cache
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<CacheKey, CacheEntry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl ResponseCache for MemoryCache {
    fn get(&self, key: &CacheKey, is_valid: &dyn Fn(SystemTime) -> bool) -> Option<Vec<u8>> {
        let mut entries = self.lock();
        match entries.get(key) {
            Some(entry) if is_valid(entry.stored_at) => Some(entry.bytes.clone()),
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        }
    }

    fn put(&self, key: CacheKey, bytes: Vec<u8>, stored_at: SystemTime) {
        self.lock().insert(key, CacheEntry { bytes, stored_at });
    }

    fn invalidate(&self, key: &CacheKey) {
        self.lock().remove(key);
    }

    fn clear(&self) {
        self.lock().clear();
    }
}
