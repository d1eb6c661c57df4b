//! Identifier translation.
//!
//! Responses carry opaque identifiers (`ctr_C-0N7RAC7`, `grp_12345`). The
//! translator adds a sibling `<field>Name` next to each identifier selected
//! by a [`TranslationMapping`], leaving the original payload otherwise
//! untouched. Names come from the translator's own cache or from the
//! [`Resolver`] registered for the mapping's resource kind.
//!
//! Translation never fails an invocation: unresolvable identifiers are
//! skipped and cached negatively for a short time.

mod path;
mod resolver;

pub use path::{object_at_mut, FieldMatch, PathPattern, Step};
pub use resolver::{LookupResolver, LookupResolverConfig, Resolver, StaticResolver};

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use edgeward_core::{EdgewardResult, ResourceKind, TenantAlias};
use edgeward_storage::{SmartCache, TenantScopedKey};
use futures_util::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Maximum identifier lookups resolved concurrently for one payload.
const MAX_CONCURRENT_LOOKUPS: usize = 8;

/// Suffix of the sibling field holding a display name.
pub const NAME_SUFFIX: &str = "Name";

/// Selects identifier fields of one resource kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TranslationMapping {
    pub path: PathPattern,
    pub resource_kind: ResourceKind,
}

/// Issues lookup calls on behalf of resolvers.
///
/// Implemented by the execution pipeline; lookups are ordinary read
/// invocations without translation.
#[async_trait]
pub trait LookupInvoker: Send + Sync {
    async fn lookup(&self, tool: &str, tenant: &TenantAlias, params: Value) -> EdgewardResult<Value>;
}

/// Adds display names next to identifiers.
pub struct IdentifierTranslator {
    resolvers: HashMap<ResourceKind, Arc<dyn Resolver>>,
    names: SmartCache,
    name_ttl: Duration,
    negative_ttl: Duration,
}

impl IdentifierTranslator {
    /// `names` should be a cache instance of its own; its entries never
    /// share tags with response entries.
    pub fn new(names: SmartCache, name_ttl: Duration, negative_ttl: Duration) -> Self {
        Self {
            resolvers: HashMap::new(),
            names,
            name_ttl,
            negative_ttl,
        }
    }

    /// Register the resolver for its resource kind, replacing any previous one.
    pub fn register(&mut self, resolver: Arc<dyn Resolver>) {
        self.resolvers.insert(resolver.kind().clone(), resolver);
    }

    pub fn has_resolver(&self, kind: &ResourceKind) -> bool {
        self.resolvers.contains_key(kind)
    }

    pub fn name_cache(&self) -> &SmartCache {
        &self.names
    }

    /// Enrich `payload` according to `mappings`.
    pub async fn translate(
        &self,
        tenant: &TenantAlias,
        mut payload: Value,
        mappings: &[TranslationMapping],
        invoker: &dyn LookupInvoker,
    ) -> Value {
        let mut targets: Vec<(ResourceKind, FieldMatch)> = Vec::new();
        for mapping in mappings {
            if !self.has_resolver(&mapping.resource_kind) {
                tracing::debug!(
                    resource_kind = %mapping.resource_kind,
                    path = %mapping.path,
                    "No resolver registered, skipping mapping"
                );
                continue;
            }
            targets.extend(
                mapping
                    .path
                    .find(&payload)
                    .into_iter()
                    .map(|m| (mapping.resource_kind.clone(), m)),
            );
        }
        if targets.is_empty() {
            return payload;
        }

        let unique: HashSet<(ResourceKind, String)> = targets
            .iter()
            .map(|(kind, m)| (kind.clone(), m.raw_id.clone()))
            .collect();

        let resolved: HashMap<(ResourceKind, String), String> = stream::iter(unique)
            .map(|(kind, raw_id)| async move {
                let name = self.display_name(tenant, &kind, &raw_id, invoker).await;
                ((kind, raw_id), name)
            })
            .buffer_unordered(MAX_CONCURRENT_LOOKUPS)
            .filter_map(|(key, name)| async move { name.map(|n| (key, n)) })
            .collect()
            .await;

        let mut added = 0usize;
        for (kind, m) in targets {
            let Some(name) = resolved.get(&(kind, m.raw_id)) else {
                continue;
            };
            if let Some(parent) = object_at_mut(&mut payload, &m.parent) {
                let sibling = format!("{}{}", m.field, NAME_SUFFIX);
                if !parent.contains_key(&sibling) {
                    parent.insert(sibling, Value::String(name.clone()));
                    added += 1;
                }
            }
        }
        tracing::debug!(tenant = %tenant, added, "Identifier translation complete");
        payload
    }

    /// Display name for one identifier, or `None` when it cannot be resolved.
    pub async fn display_name(
        &self,
        tenant: &TenantAlias,
        kind: &ResourceKind,
        raw_id: &str,
        invoker: &dyn LookupInvoker,
    ) -> Option<String> {
        let key = TenantScopedKey::resource(tenant.clone(), format!("names/{}/{}", kind, raw_id));

        match self.names.get(&key).await {
            Ok(Some(Value::String(name))) => return Some(name),
            Ok(Some(_)) => return None,
            Ok(None) => {}
            Err(e) => tracing::warn!(error = %e, cache_key = %key, "Name cache read failed"),
        }

        let resolver = self.resolvers.get(kind)?;
        let (value, ttl) = match resolver.resolve(tenant, raw_id, invoker).await {
            Ok(Some(name)) => (Value::String(name), self.name_ttl),
            Ok(None) => {
                tracing::debug!(tenant = %tenant, resource_kind = %kind, raw_id, "Identifier not found");
                (Value::Null, self.negative_ttl)
            }
            Err(e) => {
                tracing::warn!(
                    tenant = %tenant,
                    resource_kind = %kind,
                    raw_id,
                    error = %e,
                    "Identifier lookup failed"
                );
                (Value::Null, self.negative_ttl)
            }
        };

        if let Err(e) = self.names.set(&key, value.clone(), ttl, &[]).await {
            tracing::warn!(error = %e, cache_key = %key, "Name cache write failed");
        }
        match value {
            Value::String(name) => Some(name),
            _ => None,
        }
    }
}

impl std::fmt::Debug for IdentifierTranslator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut kinds: Vec<&str> = self.resolvers.keys().map(ResourceKind::as_str).collect();
        kinds.sort_unstable();
        f.debug_struct("IdentifierTranslator")
            .field("resolvers", &kinds)
            .field("name_ttl", &self.name_ttl)
            .field("negative_ttl", &self.negative_ttl)
            .finish()
    }
}


// ============================================================================
// PROPERTY-BASED TESTS
// ============================================================================
