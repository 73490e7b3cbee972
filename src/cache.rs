//! Content-addressed response cache for buffered operations.
//!
//! [`ResponseCache`] memoizes the serialized result of a generate, explain
//! or improve call. Streamed calls are never cached: a partial stream cannot
//! be replayed as a whole result.
//!
//! # Keys
//!
//! A [`CacheKey`] is the operation name plus a SHA-256 digest of the
//! canonicalized request parameters. Canonicalization sorts object keys
//! recursively, so `{"code": .., "language": ..}` and
//! `{"language": .., "code": ..}` address the same entry. The digest is
//! stable across processes, which keeps the key usable by a shared backend.
//!
//! # Expiry
//!
//! Entries expire a fixed TTL after they were written. Moka enforces the TTL
//! internally; [`ResponseCache::get`] additionally checks the stored creation
//! time and invalidates stale entries it encounters. Once the entry count
//! exceeds `sweep_threshold`, a write runs moka's pending maintenance, which
//! drops expired entries. There is no capacity bound, so no live entry is
//! ever evicted early.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use moka::future::Cache;
use serde::Deserialize;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::Result;
use crate::telemetry;

/// Configuration for the response cache.
///
/// ```rust
/// # use mimir::CacheConfig;
/// # use std::time::Duration;
/// let config = CacheConfig::new()
///     .ttl(Duration::from_secs(600))
///     .sweep_threshold(500);
/// assert_eq!(config.sweep_threshold, 500);
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    /// Time-to-live for cached entries. Default: 1 hour.
    #[serde(default = "default_ttl", rename = "ttl_secs", with = "secs")]
    pub ttl: Duration,
    /// Entry count above which writes trigger an expiry sweep. Default: 1,000.
    #[serde(default = "default_sweep_threshold")]
    pub sweep_threshold: u64,
}

fn default_ttl() -> Duration {
    Duration::from_secs(3600)
}

fn default_sweep_threshold() -> u64 {
    1_000
}

mod secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer};

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_secs)
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl: default_ttl(),
            sweep_threshold: default_sweep_threshold(),
        }
    }
}

impl CacheConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the time-to-live for cached entries.
    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Set the entry count that triggers an expiry sweep.
    pub fn sweep_threshold(mut self, n: u64) -> Self {
        self.sweep_threshold = n;
        self
    }
}

/// Address of a cached result.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    operation: String,
    digest: String,
}

impl CacheKey {
    /// Derive the key for an operation and its parameter object.
    pub fn new(operation: &str, params: &Value) -> Self {
        let mut canonical = String::new();
        canonicalize(params, &mut canonical);
        let digest = Sha256::digest(canonical.as_bytes());
        Self {
            operation: operation.to_string(),
            digest: format!("{digest:x}"),
        }
    }

    pub fn operation(&self) -> &str {
        &self.operation
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.operation, self.digest)
    }
}

/// Write `value` as JSON with object keys sorted at every level.
pub fn canonicalize(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(key.clone()).to_string());
                out.push(':');
                canonicalize(&map[key.as_str()], out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                canonicalize(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}

/// A memoized operation result.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub payload: String,
    pub created_at: DateTime<Utc>,
}

/// In-memory TTL cache of serialized operation results.
pub struct ResponseCache {
    cache: Cache<String, CacheEntry>,
    config: CacheConfig,
}

impl ResponseCache {
    /// Create a new response cache with the given configuration.
    pub fn new(config: &CacheConfig) -> Self {
        let cache = Cache::builder().time_to_live(config.ttl).build();
        Self {
            cache,
            config: config.clone(),
        }
    }

    /// Look up a payload.
    ///
    /// Returns `None` on miss or when the entry has outlived the TTL.
    /// Emits cache hit/miss metrics.
    pub async fn get(&self, key: &CacheKey) -> Option<String> {
        let id = key.to_string();
        let operation = key.operation().to_owned();
        let hit = match self.cache.get(&id).await {
            Some(entry) if self.is_fresh(&entry, Utc::now()) => Some(entry.payload),
            Some(_) => {
                self.cache.invalidate(&id).await;
                None
            }
            None => None,
        };

        if hit.is_some() {
            metrics::counter!(telemetry::CACHE_HITS_TOTAL, "operation" => operation).increment(1);
            debug!(key = %id, "cache hit");
        } else {
            metrics::counter!(telemetry::CACHE_MISSES_TOTAL, "operation" => operation)
                .increment(1);
            debug!(key = %id, "cache miss");
        }
        hit
    }

    /// Store a payload, sweeping expired entries if the cache has grown large.
    pub async fn put(&self, key: &CacheKey, payload: impl Into<String>) {
        let entry = CacheEntry {
            payload: payload.into(),
            created_at: Utc::now(),
        };
        self.cache.insert(key.to_string(), entry).await;

        if self.cache.entry_count() > self.config.sweep_threshold {
            self.sweep().await;
        }
    }

    /// Look up and deserialize a typed result.
    ///
    /// A payload that no longer deserializes is treated as a miss.
    pub async fn get_json<T: DeserializeOwned>(&self, key: &CacheKey) -> Option<T> {
        let payload = self.get(key).await?;
        serde_json::from_str(&payload).ok()
    }

    /// Serialize and store a typed result.
    pub async fn put_json<T: Serialize>(&self, key: &CacheKey, value: &T) -> Result<()> {
        let payload = serde_json::to_string(value)?;
        self.put(key, payload).await;
        Ok(())
    }

    /// Run pending maintenance, dropping expired entries.
    pub async fn sweep(&self) {
        let before = self.cache.entry_count();
        self.cache.run_pending_tasks().await;
        debug!(
            before,
            after = self.cache.entry_count(),
            "swept response cache"
        );
    }

    /// Approximate number of entries.
    pub fn len(&self) -> u64 {
        self.cache.entry_count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Evict all entries.
    pub fn clear(&self) {
        self.cache.invalidate_all();
    }

    fn is_fresh(&self, entry: &CacheEntry, now: DateTime<Utc>) -> bool {
        let age = (now - entry.created_at).to_std().unwrap_or_default();
        age < self.config.ttl
    }
}
