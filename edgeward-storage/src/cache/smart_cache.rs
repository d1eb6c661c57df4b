//! Tenant-scoped smart cache facade.
//!
//! [`SmartCache`] is the only cache surface the execution pipeline sees. It
//! accepts [`TenantScopedKey`]s and [`CacheTag`]s, so every read, write and
//! invalidation is confined to one tenant by construction, and it closes the
//! read/invalidate race with per-tag epochs.
//!
//! # Epochs
//!
//! A read that started before a mutation may finish after the mutation's
//! invalidation and would otherwise re-cache stale data. Callers capture
//! [`TagEpochs`] before the upstream call and write with
//! [`SmartCache::set_guarded`]; the write is undone when any of its tags was
//! invalidated in between.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use edgeward_core::{EdgewardResult, TenantAlias};
use serde_json::Value;
use tokio::task::JoinHandle;

use super::tenant_key::{CacheTag, TenantScopedKey};
use super::traits::{CacheBackend, CacheStats};

/// Snapshot of tag epochs taken before an upstream read.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TagEpochs(Vec<(String, u64)>);

/// Tenant-scoped cache over a pluggable backend.
#[derive(Clone)]
pub struct SmartCache {
    backend: Arc<dyn CacheBackend>,
    epochs: Arc<DashMap<String, AtomicU64>>,
}

impl SmartCache {
    /// Wrap a backend.
    pub fn new(backend: Arc<dyn CacheBackend>) -> Self {
        Self {
            backend,
            epochs: Arc::new(DashMap::new()),
        }
    }

    /// Get a reference to the cache backend.
    pub fn backend(&self) -> &Arc<dyn CacheBackend> {
        &self.backend
    }

    /// Read a live value.
    pub async fn get(&self, key: &TenantScopedKey) -> EdgewardResult<Option<Value>> {
        Ok(self.backend.get(&key.encode()).await?.map(|e| e.value))
    }

    /// Unconditional write.
    pub async fn set(
        &self,
        key: &TenantScopedKey,
        value: Value,
        ttl: Duration,
        tags: &[CacheTag],
    ) -> EdgewardResult<()> {
        let tags: Vec<String> = tags.iter().map(|t| t.as_str().to_string()).collect();
        self.backend.set(&key.encode(), value, ttl, &tags).await
    }

    /// Capture the current epochs of `tags`.
    pub fn tag_epochs(&self, tags: &[CacheTag]) -> TagEpochs {
        TagEpochs(
            tags.iter()
                .map(|t| (t.as_str().to_string(), self.epoch_of(t.as_str())))
                .collect(),
        )
    }

    /// Write only if none of the tags was invalidated since `epochs` was taken.
    ///
    /// Returns `true` when the value remains cached. The check runs after the
    /// write so an invalidation racing with the write either sees the entry
    /// (and removes it) or bumps the epoch first (and this call removes it).
    pub async fn set_guarded(
        &self,
        key: &TenantScopedKey,
        value: Value,
        ttl: Duration,
        tags: &[CacheTag],
        epochs: &TagEpochs,
    ) -> EdgewardResult<bool> {
        if !self.epochs_current(epochs) {
            return Ok(false);
        }
        self.set(key, value, ttl, tags).await?;
        if self.epochs_current(epochs) {
            return Ok(true);
        }
        tracing::debug!(cache_key = %key, "Discarding cache write raced by invalidation");
        self.backend.delete(&key.encode()).await?;
        Ok(false)
    }

    /// Delete a single key.
    pub async fn delete(&self, key: &TenantScopedKey) -> EdgewardResult<bool> {
        self.backend.delete(&key.encode()).await
    }

    /// Remove every entry tagged `tag`. The epoch is bumped before removal.
    pub async fn invalidate_by_tag(&self, tag: &CacheTag) -> EdgewardResult<u64> {
        self.bump_epoch(tag.as_str());
        let removed = self.backend.invalidate_by_tag(tag.as_str()).await?;
        tracing::debug!(tag = %tag, removed, "Invalidated cache tag");
        Ok(removed)
    }

    /// Remove every key of `tenant` matching `pattern` (`*` wildcard).
    ///
    /// The pattern is anchored under the tenant prefix: `search:*` clears
    /// `acme:search:...` for tenant `acme` and nothing else.
    pub async fn invalidate_by_pattern(&self, tenant: &TenantAlias, pattern: &str) -> EdgewardResult<u64> {
        let anchored = TenantScopedKey::tenant_pattern(tenant, pattern);
        let removed = self.backend.scan_and_delete(&anchored).await?;
        tracing::debug!(tenant = %tenant, pattern = %anchored, removed, "Invalidated cache pattern");
        Ok(removed)
    }

    /// Remove every entry of one tenant.
    pub async fn invalidate_tenant(&self, tenant: &TenantAlias) -> EdgewardResult<u64> {
        self.invalidate_by_pattern(tenant, "*").await
    }

    /// Get cache statistics.
    pub async fn stats(&self) -> EdgewardResult<CacheStats> {
        self.backend.stats().await
    }

    /// Spawn a background task that purges expired entries every `interval`.
    ///
    /// Abort the returned handle to stop sweeping.
    pub fn spawn_sweeper(&self, interval: Duration) -> JoinHandle<()> {
        let backend = Arc::clone(&self.backend);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick completes immediately.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                match backend.purge_expired().await {
                    Ok(0) => {}
                    Ok(purged) => tracing::debug!(purged, "Cache sweep removed expired entries"),
                    Err(e) => tracing::warn!(error = %e, "Cache sweep failed"),
                }
            }
        })
    }

    fn epoch_of(&self, tag: &str) -> u64 {
        self.epochs
            .get(tag)
            .map(|e| e.load(Ordering::Acquire))
            .unwrap_or(0)
    }

    fn bump_epoch(&self, tag: &str) {
        self.epochs
            .entry(tag.to_string())
            .or_insert_with(|| AtomicU64::new(0))
            .fetch_add(1, Ordering::AcqRel);
    }

    fn epochs_current(&self, epochs: &TagEpochs) -> bool {
        epochs
            .0
            .iter()
            .all(|(tag, epoch)| self.epoch_of(tag) == *epoch)
    }
}

impl std::fmt::Debug for SmartCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SmartCache")
            .field("tracked_tags", &self.epochs.len())
            .finish()
    }
}
