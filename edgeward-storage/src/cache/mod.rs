//! Smart cache with tenant isolation, TTLs and tag-based invalidation.
//!
//! # Design Philosophy
//!
//! Cached upstream responses must never leak across tenants and must never
//! outlive either their TTL or a mutation of the resource they describe.
//! This module enforces all three structurally:
//!
//! - [`TenantScopedKey`] cannot be built without a tenant alias, and the
//!   alias is always the leading key component.
//! - Backends must never return an entry past its `expires_at`.
//! - Mutations invalidate by [`CacheTag`] before reporting success, and
//!   [`SmartCache::set_guarded`] discards writes that raced an invalidation.
//!
//! # Example
//!
//! ```ignore
//! let cache = SmartCache::new(Arc::new(InMemoryCacheBackend::with_capacity(10_000)));
//! let key = TenantScopedKey::new(tenant.clone(), "/papi/v1/properties", &[("contractId", "ctr_1")]);
//! let tag = CacheTag::new(&tenant, "properties");
//!
//! cache.set(&key, body, Duration::from_secs(60), &[tag.clone()]).await?;
//! cache.invalidate_by_tag(&tag).await?;
//! ```

pub mod memory_backend;
pub mod smart_cache;
pub mod tenant_key;
pub mod traits;

pub use memory_backend::InMemoryCacheBackend;
pub use smart_cache::{SmartCache, TagEpochs};
pub use tenant_key::{glob_match, CacheTag, TenantScopedKey};
pub use traits::{CacheBackend, CacheEntry, CacheStats};
