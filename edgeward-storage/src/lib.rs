//! Edgeward Storage - Cache Layer
//!
//! Tenant-namespaced response cache used by the execution pipeline and the
//! identifier translator. See [`cache`] for the design.

pub mod cache;

pub use cache::{
    glob_match, CacheBackend, CacheEntry, CacheStats, CacheTag, InMemoryCacheBackend, SmartCache,
    TagEpochs, TenantScopedKey,
};
