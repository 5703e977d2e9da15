//! Keyed, TTL-bounded cache of opaque authentication tokens.
//!
//! Credential helpers fetch short-lived tokens from authoritative but slow
//! (and sometimes rate-limited) endpoints. This cache bounds each entry's
//! lifetime so a token is refetched before the issuer expires it, while
//! concurrent lookups for the same inputs hit the cached copy.
//!
//! Entries are immutable once written. Racing misses are permitted: both
//! callers fetch, the later write wins, and either token is valid.

use std::time::Duration;

use moka::sync::Cache;
use sha2::{Digest, Sha256};

/// Thread-safe token cache with a single time-to-live for all entries.
#[derive(Clone)]
pub struct TokenCache {
    entries: Cache<String, String>,
}

impl TokenCache {
    /// Create a cache whose entries expire `ttl` after insertion.
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: Cache::builder().time_to_live(ttl).build(),
        }
    }

    /// Look up the token stored under `key`, if present and unexpired.
    pub fn get(&self, key: &str) -> Option<String> {
        self.entries.get(key)
    }

    /// Store `token` under `key`, replacing any previous entry.
    pub fn insert(&self, key: impl Into<String>, token: impl Into<String>) {
        self.entries.insert(key.into(), token.into());
    }

    /// Number of live entries. Approximate under concurrency.
    pub fn len(&self) -> u64 {
        self.entries.run_pending_tasks();
        self.entries.entry_count()
    }

    /// Whether the cache currently holds no live entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl std::fmt::Debug for TokenCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenCache")
            .field("entries", &self.entries.entry_count())
            .finish()
    }
}

/// Derive a stable cache key from the inputs that produced a token.
///
/// Parts are length-prefixed before hashing so `["ab", "c"]` and
/// `["a", "bc"]` never collide.
pub fn cache_key<S: AsRef<str>>(parts: &[S]) -> String {
    let mut hasher = Sha256::new();
    for part in parts {
        let bytes = part.as_ref().as_bytes();
        hasher.update((bytes.len() as u64).to_be_bytes());
        hasher.update(bytes);
    }
    hex::encode(hasher.finalize())
}
