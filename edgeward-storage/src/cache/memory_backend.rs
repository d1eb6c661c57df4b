//! In-memory cache backend with sharded locking and a tag index.
//!
//! Entries live in a [`DashMap`], which shards its lock so mutations to one
//! key never block reads of keys in other shards. A second map indexes keys
//! by tag for bulk invalidation.
//!
//! # Thread Safety
//!
//! - All mutations of a single key are serialized by its shard lock
//! - No shard guard is held while another map is touched, so the two maps
//!   can never deadlock against each other
//! - Statistics are tracked with atomic counters
//! - Each tag has a generation bumped by every invalidation of it. A write
//!   that sees a generation move while it links its tags removes its own
//!   entry, so no entry can outlive an invalidation unindexed

use std::collections::{BTreeSet, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use edgeward_core::EdgewardResult;
use serde_json::Value;
use tokio::time::Instant;

use super::tenant_key::glob_match;
use super::traits::{CacheBackend, CacheEntry, CacheStats};

/// Why an entry left the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Removal {
    Invalidated,
    Expired,
    Evicted,
}

/// Process-local cache backend.
///
/// # Example
///
/// ```ignore
/// let backend = InMemoryCacheBackend::with_capacity(10_000);
/// backend.set("acme:R1", json!({"id": 1}), Duration::from_secs(60), &["acme:R1-family".into()]).await?;
/// let entry = backend.get("acme:R1").await?;
/// ```
#[derive(Debug, Default)]
pub struct InMemoryCacheBackend {
    entries: DashMap<String, CacheEntry>,
    tag_index: DashMap<String, HashSet<String>>,
    tag_generations: DashMap<String, u64>,
    max_entries: Option<usize>,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    invalidations: AtomicU64,
    expirations: AtomicU64,
}

impl InMemoryCacheBackend {
    /// Create an unbounded backend.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a backend holding at most `max_entries` entries.
    ///
    /// When full, expired entries are purged first; if still full, the entry
    /// closest to expiry is evicted. Finding that entry is a linear scan.
    ///
    /// The bound is approximate: the capacity check and the insert are not
    /// one atomic step, so concurrent writers of new keys can briefly hold
    /// the map a few entries above `max_entries`.
    pub fn with_capacity(max_entries: usize) -> Self {
        Self {
            max_entries: Some(max_entries.max(1)),
            ..Self::default()
        }
    }

    /// Number of physically stored entries (including expired, unswept ones).
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Remove `key` if `predicate` holds for its entry, then unlink its tags.
    fn remove_where(&self, key: &str, reason: Removal, predicate: impl FnOnce(&CacheEntry) -> bool) -> bool {
        let Some((key, entry)) = self.entries.remove_if(key, |_, e| predicate(e)) else {
            return false;
        };
        self.unlink_tags(&key, &entry.tags);
        let counter = match reason {
            Removal::Invalidated => &self.invalidations,
            Removal::Expired => &self.expirations,
            Removal::Evicted => &self.evictions,
        };
        counter.fetch_add(1, Ordering::Relaxed);
        true
    }

    fn unlink_tags<'a>(&self, key: &str, tags: impl IntoIterator<Item = &'a String>) {
        for tag in tags {
            let now_empty = match self.tag_index.get_mut(tag) {
                Some(mut keys) => {
                    keys.remove(key);
                    keys.is_empty()
                }
                None => false,
            };
            if now_empty {
                self.tag_index.remove_if(tag, |_, keys| keys.is_empty());
            }
        }
    }

    fn tag_generation(&self, tag: &str) -> u64 {
        self.tag_generations.get(tag).map(|g| *g).unwrap_or(0)
    }

    fn purge_expired_at(&self, now: Instant) -> u64 {
        let expired: Vec<String> = self
            .entries
            .iter()
            .filter(|e| !e.is_live(now))
            .map(|e| e.key().clone())
            .collect();
        expired
            .iter()
            .filter(|key| self.remove_where(key, Removal::Expired, |e| !e.is_live(now)))
            .count() as u64
    }

    /// Make room for one new key when at capacity.
    fn ensure_capacity(&self, incoming: &str, now: Instant) {
        let Some(max) = self.max_entries else {
            return;
        };
        if self.entries.contains_key(incoming) || self.entries.len() < max {
            return;
        }
        self.purge_expired_at(now);
        while self.entries.len() >= max {
            let victim = self
                .entries
                .iter()
                .min_by_key(|e| e.expires_at)
                .map(|e| e.key().clone());
            match victim {
                Some(key) => {
                    tracing::debug!(cache_key = %key, "Evicting cache entry at capacity");
                    self.remove_where(&key, Removal::Evicted, |_| true);
                }
                None => break,
            }
        }
    }
}

#[async_trait]
impl CacheBackend for InMemoryCacheBackend {
    async fn get(&self, key: &str) -> EdgewardResult<Option<CacheEntry>> {
        let now = Instant::now();
        let found = self
            .entries
            .get(key)
            .map(|e| if e.is_live(now) { Some(e.value().clone()) } else { None });

        match found {
            Some(Some(entry)) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Ok(Some(entry))
            }
            Some(None) => {
                // Lazy expiry; the guard above is already released.
                self.remove_where(key, Removal::Expired, |e| !e.is_live(now));
                self.misses.fetch_add(1, Ordering::Relaxed);
                Ok(None)
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                Ok(None)
            }
        }
    }

    async fn set(&self, key: &str, value: Value, ttl: Duration, tags: &[String]) -> EdgewardResult<()> {
        if ttl.is_zero() {
            self.remove_where(key, Removal::Invalidated, |_| true);
            return Ok(());
        }

        let now = Instant::now();
        self.ensure_capacity(key, now);

        let tags: BTreeSet<String> = tags.iter().cloned().collect();
        let generations: Vec<u64> = tags.iter().map(|tag| self.tag_generation(tag)).collect();

        let entry = CacheEntry {
            key: key.to_string(),
            value,
            expires_at: now + ttl,
            tags: tags.clone(),
        };
        let previous = self.entries.insert(key.to_string(), entry);

        if let Some(previous) = previous {
            let stale: Vec<&String> = previous.tags.difference(&tags).collect();
            self.unlink_tags(key, stale);
        }

        for tag in &tags {
            self.tag_index
                .entry(tag.clone())
                .or_default()
                .insert(key.to_string());
        }

        // An invalidation that ran while the tags were being linked may have
        // missed this entry; treat the write as invalidated too.
        let raced = tags
            .iter()
            .zip(&generations)
            .find(|(tag, seen)| self.tag_generation(tag) != **seen);
        if let Some((tag, _)) = raced {
            tracing::debug!(cache_key = %key, tag = %tag, "Dropping cache write raced by tag invalidation");
            self.remove_where(key, Removal::Invalidated, |e| e.tags.contains(tag));
        }
        Ok(())
    }

    async fn delete(&self, key: &str) -> EdgewardResult<bool> {
        Ok(self.remove_where(key, Removal::Invalidated, |_| true))
    }

    async fn invalidate_by_tag(&self, tag: &str) -> EdgewardResult<u64> {
        *self.tag_generations.entry(tag.to_string()).or_insert(0) += 1;
        let keys = match self.tag_index.remove(tag) {
            Some((_, keys)) => keys,
            None => return Ok(0),
        };
        let mut removed = 0u64;
        for key in keys {
            // Only remove entries that still carry the tag; a rewrite may have
            // replaced the entry with one that does not.
            if self.remove_where(&key, Removal::Invalidated, |e| e.tags.contains(tag)) {
                removed += 1;
            }
        }
        Ok(removed)
    }

    async fn scan_and_delete(&self, pattern: &str) -> EdgewardResult<u64> {
        let matching: Vec<String> = self
            .entries
            .iter()
            .filter(|e| glob_match(pattern, e.key()))
            .map(|e| e.key().clone())
            .collect();
        Ok(matching
            .iter()
            .filter(|key| self.remove_where(key, Removal::Invalidated, |_| true))
            .count() as u64)
    }

    async fn purge_expired(&self) -> EdgewardResult<u64> {
        Ok(self.purge_expired_at(Instant::now()))
    }

    async fn stats(&self) -> EdgewardResult<CacheStats> {
        Ok(CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            entry_count: self.entries.len() as u64,
            evictions: self.evictions.load(Ordering::Relaxed),
            invalidations: self.invalidations.load(Ordering::Relaxed),
            expirations: self.expirations.load(Ordering::Relaxed),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn tags(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test(start_paused = true)]
    async fn test_get_never_returns_expired_entry() {
        let backend = InMemoryCacheBackend::new();
        backend
            .set("acme:R1", json!({"v": 1}), Duration::from_secs(10), &[])
            .await
            .unwrap();

        tokio::time::advance(Duration::from_secs(9)).await;
        assert!(backend.get("acme:R1").await.unwrap().is_some());

        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(backend.get("acme:R1").await.unwrap().is_none());
        // Lazily removed on the expired read.
        assert!(backend.is_empty());

        let stats = backend.stats().await.unwrap();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.expirations, 1);
    }

    #[tokio::test]
    async fn test_zero_ttl_removes_key() {
        let backend = InMemoryCacheBackend::new();
        backend
            .set("acme:R1", json!(1), Duration::from_secs(10), &[])
            .await
            .unwrap();
        backend.set("acme:R1", json!(2), Duration::ZERO, &[]).await.unwrap();
        assert!(backend.get("acme:R1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_invalidate_by_tag_removes_all_tagged() {
        let backend = InMemoryCacheBackend::new();
        let ttl = Duration::from_secs(60);
        backend
            .set("acme:R1", json!(1), ttl, &tags(&["acme:R1-family"]))
            .await
            .unwrap();
        backend
            .set("acme:R1-list", json!([1]), ttl, &tags(&["acme:R1-family", "acme:lists"]))
            .await
            .unwrap();
        backend
            .set("acme:R2", json!(2), ttl, &tags(&["acme:R2-family"]))
            .await
            .unwrap();

        let removed = backend.invalidate_by_tag("acme:R1-family").await.unwrap();
        assert_eq!(removed, 2);
        assert!(backend.get("acme:R1").await.unwrap().is_none());
        assert!(backend.get("acme:R1-list").await.unwrap().is_none());
        assert!(backend.get("acme:R2").await.unwrap().is_some());

        // The other tag of the removed list entry was unlinked too.
        assert_eq!(backend.invalidate_by_tag("acme:lists").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_rewrite_drops_old_tags() {
        let backend = InMemoryCacheBackend::new();
        let ttl = Duration::from_secs(60);
        backend
            .set("acme:R1", json!(1), ttl, &tags(&["old"]))
            .await
            .unwrap();
        backend
            .set("acme:R1", json!(2), ttl, &tags(&["new"]))
            .await
            .unwrap();

        assert_eq!(backend.invalidate_by_tag("old").await.unwrap(), 0);
        assert!(backend.get("acme:R1").await.unwrap().is_some());
        assert_eq!(backend.invalidate_by_tag("new").await.unwrap(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_write_racing_invalidation_stays_indexed() {
        let backend = std::sync::Arc::new(InMemoryCacheBackend::new());
        let ttl = Duration::from_secs(60);

        for round in 0..200 {
            let key = format!("acme:R{}", round % 4);
            let writer = {
                let backend = backend.clone();
                let key = key.clone();
                tokio::spawn(async move {
                    backend.set(&key, json!(round), ttl, &tags(&["acme:R-family"])).await.unwrap();
                })
            };
            let invalidator = {
                let backend = backend.clone();
                tokio::spawn(async move {
                    backend.invalidate_by_tag("acme:R-family").await.unwrap();
                })
            };
            writer.await.unwrap();
            invalidator.await.unwrap();

            // Whatever survived the race must still be reachable through its tag.
            backend.invalidate_by_tag("acme:R-family").await.unwrap();
            assert!(backend.get(&key).await.unwrap().is_none(), "round {}", round);
        }
        assert!(backend.is_empty());
    }

    #[tokio::test]
    async fn test_scan_and_delete_wildcard_suffix() {
        let backend = InMemoryCacheBackend::new();
        let ttl = Duration::from_secs(60);
        for key in ["acme:search:a", "acme:search:b", "acme:list", "globex:search:a"] {
            backend.set(key, json!(key), ttl, &[]).await.unwrap();
        }

        let removed = backend.scan_and_delete("acme:search:*").await.unwrap();
        assert_eq!(removed, 2);
        assert!(backend.get("acme:list").await.unwrap().is_some());
        assert!(backend.get("globex:search:a").await.unwrap().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_purge_expired() {
        let backend = InMemoryCacheBackend::new();
        backend
            .set("acme:short", json!(1), Duration::from_secs(1), &tags(&["t"]))
            .await
            .unwrap();
        backend
            .set("acme:long", json!(2), Duration::from_secs(100), &[])
            .await
            .unwrap();

        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(backend.purge_expired().await.unwrap(), 1);
        assert_eq!(backend.len(), 1);
        assert_eq!(backend.invalidate_by_tag("t").await.unwrap(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_capacity_evicts_soonest_expiry() {
        let backend = InMemoryCacheBackend::with_capacity(2);
        backend
            .set("acme:a", json!(1), Duration::from_secs(10), &[])
            .await
            .unwrap();
        backend
            .set("acme:b", json!(2), Duration::from_secs(100), &[])
            .await
            .unwrap();
        backend
            .set("acme:c", json!(3), Duration::from_secs(50), &[])
            .await
            .unwrap();

        assert_eq!(backend.len(), 2);
        assert!(backend.get("acme:a").await.unwrap().is_none());
        assert!(backend.get("acme:b").await.unwrap().is_some());
        assert!(backend.get("acme:c").await.unwrap().is_some());
        assert_eq!(backend.stats().await.unwrap().evictions, 1);
    }

    #[tokio::test]
    async fn test_overwrite_at_capacity_does_not_evict() {
        let backend = InMemoryCacheBackend::with_capacity(1);
        let ttl = Duration::from_secs(10);
        backend.set("acme:a", json!(1), ttl, &[]).await.unwrap();
        backend.set("acme:a", json!(2), ttl, &[]).await.unwrap();
        assert_eq!(backend.stats().await.unwrap().evictions, 0);
        assert_eq!(backend.get("acme:a").await.unwrap().unwrap().value, json!(2));
    }
}
