//! Cache backend trait and statistics.
//!
//! This module defines the interface every cache backend exposes to the rest
//! of the middleware, regardless of whether the store is in-process or shared
//! between processes.

use std::collections::BTreeSet;
use std::time::Duration;

use async_trait::async_trait;
use edgeward_core::EdgewardResult;
use serde_json::Value;
use tokio::time::Instant;

/// A cached response with its expiry and invalidation tags.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    /// Encoded tenant-scoped key.
    pub key: String,
    /// Cached response body.
    pub value: Value,
    /// Instant after which the entry must never be returned.
    pub expires_at: Instant,
    /// Tags that invalidate this entry.
    pub tags: BTreeSet<String>,
}

impl CacheEntry {
    /// Whether the entry may still be served at `now`.
    pub fn is_live(&self, now: Instant) -> bool {
        now < self.expires_at
    }

    /// Time left before expiry, zero once expired.
    pub fn remaining_ttl(&self, now: Instant) -> Duration {
        self.expires_at.saturating_duration_since(now)
    }
}

/// Cache backend trait for pluggable cache implementations.
///
/// This trait abstracts over different cache backends (in-memory, or an
/// external shared store for multi-process deployments). Implementations
/// must be thread-safe and serialize mutations per key.
///
/// # Key Format
///
/// Keys are already-encoded [`TenantScopedKey`](super::TenantScopedKey)
/// strings. Backends treat them as opaque apart from pattern matching.
///
/// # Expiry
///
/// `get` must never return an entry past its `expires_at`, whether or not
/// the entry has been physically removed yet.
#[async_trait]
pub trait CacheBackend: Send + Sync {
    /// Get a live entry, or `None` on miss or expiry.
    async fn get(&self, key: &str) -> EdgewardResult<Option<CacheEntry>>;

    /// Store a value with a TTL and tags, replacing any previous entry.
    ///
    /// A zero TTL removes the key instead of storing an already-expired entry.
    async fn set(&self, key: &str, value: Value, ttl: Duration, tags: &[String]) -> EdgewardResult<()>;

    /// Delete a single key. Returns whether an entry was removed.
    async fn delete(&self, key: &str) -> EdgewardResult<bool>;

    /// Remove every entry carrying `tag`. Returns the number removed.
    async fn invalidate_by_tag(&self, tag: &str) -> EdgewardResult<u64>;

    /// Remove every key matching a glob pattern (`*` wildcard). Returns the
    /// number removed.
    async fn scan_and_delete(&self, pattern: &str) -> EdgewardResult<u64>;

    /// Physically remove expired entries. Returns the number removed.
    async fn purge_expired(&self) -> EdgewardResult<u64>;

    /// Get cache statistics.
    async fn stats(&self) -> EdgewardResult<CacheStats>;
}

/// Statistics about cache usage.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Number of cache hits.
    pub hits: u64,
    /// Number of cache misses (including expired reads).
    pub misses: u64,
    /// Number of entries currently in cache.
    pub entry_count: u64,
    /// Number of evictions due to capacity.
    pub evictions: u64,
    /// Number of entries removed by tag, pattern or explicit delete.
    pub invalidations: u64,
    /// Number of entries removed because their TTL lapsed.
    pub expirations: u64,
}

impl CacheStats {
    /// Calculate the hit rate (0.0 to 1.0).
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_stats_hit_rate() {
        let stats = CacheStats {
            hits: 80,
            misses: 20,
            ..Default::default()
        };
        assert!((stats.hit_rate() - 0.8).abs() < 0.001);

        let empty_stats = CacheStats::default();
        assert!((empty_stats.hit_rate() - 0.0).abs() < 0.001);
    }

    #[tokio::test(start_paused = true)]
    async fn test_entry_liveness_boundary() {
        let now = Instant::now();
        let entry = CacheEntry {
            key: "acme:R1".to_string(),
            value: Value::Null,
            expires_at: now + Duration::from_secs(5),
            tags: BTreeSet::new(),
        };
        assert!(entry.is_live(now));
        assert_eq!(entry.remaining_ttl(now), Duration::from_secs(5));
        assert!(!entry.is_live(now + Duration::from_secs(5)));
        assert_eq!(entry.remaining_ttl(now + Duration::from_secs(9)), Duration::ZERO);
    }
}
