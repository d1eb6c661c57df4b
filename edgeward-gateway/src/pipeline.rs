//! Execution Pipeline
//!
//! Orchestrates one invocation end to end:
//!
//! ```text
//! tenant -> tool -> params -> cache key
//!   read:     cache hit? -> coalesce -> breaker -> sign -> call -> cache write
//!   mutation: breaker -> sign -> call -> tag invalidation
//! -> translate -> result
//! ```
//!
//! Cache faults never fail an invocation. A failed read or write is logged
//! and the pipeline carries on as if the cache were empty; a coalescer fault
//! falls back to a direct upstream call.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use edgeward_core::{
    ConfigError, CredentialSet, EdgewardError, EdgewardResult, StructuredError, TenantAlias, TtlTable,
};
use edgeward_storage::{CacheTag, InMemoryCacheBackend, SmartCache, TenantScopedKey};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::task::JoinHandle;

use crate::breaker::CircuitBreaker;
use crate::classify::StatusClassifier;
use crate::coalescer::{CoalesceRole, RequestCoalescer};
use crate::config::GatewayConfig;
use crate::credentials::CredentialStore;
use crate::tools::{PreparedCall, ToolDescriptor, ToolRegistry};
use crate::translator::{IdentifierTranslator, LookupInvoker, LookupResolver};
use crate::transport::UpstreamTransport;
use crate::upstream::{CallOutcome, UpstreamClient};

// ============================================================================
// INVOCATION TYPES
// ============================================================================

/// One tool call as received from the invocation layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Invocation {
    pub tool: String,
    pub tenant: String,
    #[serde(default)]
    pub params: Value,
    /// Opaque correlation id echoed back by the stdio front end.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
}

/// How the cache took part in an invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheStatus {
    Hit,
    Miss,
    /// Not cacheable: a mutation, an uncached tool, or a cache fault.
    Bypass,
}

/// Successful invocation result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvocationResult {
    pub tool: String,
    pub tenant: TenantAlias,
    pub value: Value,
    pub cache_status: CacheStatus,
    /// Upstream attempts made; zero on a cache hit.
    pub attempts: u32,
    /// Whether this caller joined a call started by another.
    pub coalesced: bool,
}

// ============================================================================
// PIPELINE
// ============================================================================

/// Runs invocations against the shared cache, coalescer and breaker.
pub struct ExecutionPipeline {
    credentials: Arc<CredentialStore>,
    tools: Arc<ToolRegistry>,
    cache: SmartCache,
    coalescer: RequestCoalescer<CallOutcome>,
    upstream: UpstreamClient,
    ttls: TtlTable,
    translator: IdentifierTranslator,
    /// How long one caller waits on a coalesced read before giving up.
    wait_timeout: Option<Duration>,
}

impl ExecutionPipeline {
    /// Pipeline with default TTLs and a translator without resolvers.
    pub fn new(
        credentials: CredentialStore,
        tools: ToolRegistry,
        cache: SmartCache,
        upstream: UpstreamClient,
    ) -> Self {
        let names = SmartCache::new(Arc::new(InMemoryCacheBackend::new()));
        Self {
            credentials: Arc::new(credentials),
            tools: Arc::new(tools),
            cache,
            coalescer: RequestCoalescer::new(),
            upstream,
            ttls: TtlTable::default(),
            translator: IdentifierTranslator::new(
                names,
                Duration::from_secs(crate::constants::DEFAULT_NAME_CACHE_TTL_SECS),
                Duration::from_secs(crate::constants::DEFAULT_NAME_NEGATIVE_TTL_SECS),
            ),
            wait_timeout: None,
        }
    }

    pub fn with_ttls(mut self, ttls: TtlTable) -> Self {
        self.ttls = ttls;
        self
    }

    pub fn with_translator(mut self, translator: IdentifierTranslator) -> Self {
        self.translator = translator;
        self
    }

    /// Bound each caller's wait on a read. The upstream call itself keeps
    /// running for any other caller sharing it.
    pub fn with_wait_timeout(mut self, timeout: Duration) -> Self {
        self.wait_timeout = Some(timeout);
        self
    }

    /// Wire a pipeline from validated configuration.
    pub fn from_config(
        config: &GatewayConfig,
        credentials: CredentialStore,
        transport: Arc<dyn UpstreamTransport>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;

        let tools = ToolRegistry::new(config.tools.clone())?;
        let classifier = StatusClassifier::with_overrides(config.status_overrides.clone())?;
        let upstream = UpstreamClient::new(
            transport,
            Arc::new(CircuitBreaker::new(config.breaker.clone())),
            Arc::new(classifier),
            config.retry.clone(),
        );
        let cache = SmartCache::new(Arc::new(InMemoryCacheBackend::with_capacity(config.cache_max_entries)));

        let names = SmartCache::new(Arc::new(InMemoryCacheBackend::with_capacity(config.cache_max_entries)));
        let mut translator = IdentifierTranslator::new(names, config.name_cache_ttl, config.name_negative_ttl);
        for resolver in &config.resolvers {
            translator.register(Arc::new(LookupResolver::new(resolver.clone())?));
        }

        tracing::info!(
            tools = tools.len(),
            tenants = credentials.len(),
            resolvers = config.resolvers.len(),
            "Execution pipeline ready"
        );

        Ok(Self::new(credentials, tools, cache, upstream)
            .with_ttls(config.ttls.clone())
            .with_translator(translator)
            .with_wait_timeout(config.invocation_timeout))
    }

    pub fn cache(&self) -> &SmartCache {
        &self.cache
    }

    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        self.upstream.breaker()
    }

    pub fn coalescer(&self) -> &RequestCoalescer<CallOutcome> {
        &self.coalescer
    }

    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    /// Start the background expiry sweep for both caches.
    pub fn spawn_sweepers(&self, interval: Duration) -> Vec<JoinHandle<()>> {
        vec![
            self.cache.spawn_sweeper(interval),
            self.translator.name_cache().spawn_sweeper(interval),
        ]
    }

    /// Invoke a tool, returning the structured form of any failure.
    pub async fn invoke(&self, tool: &str, tenant: &str, params: Value) -> Result<InvocationResult, StructuredError> {
        let tenant = TenantAlias::new(tenant).map_err(|e| EdgewardError::from(e).to_structured())?;
        self.execute(tool, &tenant, params).await.map_err(|e| e.to_structured())
    }

    /// Invoke a tool with translation enabled.
    pub async fn execute(&self, tool: &str, tenant: &TenantAlias, params: Value) -> EdgewardResult<InvocationResult> {
        let started = tokio::time::Instant::now();
        let result = self.run(tool, tenant, params, true).await;
        let elapsed_ms = started.elapsed().as_millis() as u64;
        match &result {
            Ok(r) => tracing::info!(
                tool,
                tenant = %tenant,
                cache_status = ?r.cache_status,
                attempts = r.attempts,
                coalesced = r.coalesced,
                elapsed_ms,
                "Invocation complete"
            ),
            Err(e) => tracing::info!(
                tool,
                tenant = %tenant,
                kind = %e.kind(),
                elapsed_ms,
                "Invocation failed"
            ),
        }
        result
    }

    async fn run(
        &self,
        tool_name: &str,
        tenant: &TenantAlias,
        params: Value,
        translate: bool,
    ) -> EdgewardResult<InvocationResult> {
        let credentials = self.credentials.resolve(tenant)?;
        let tool = self.tools.get(tool_name)?;
        let call = tool.prepare(&params)?;

        let mut result = if tool.is_read() {
            self.read(&tool, tenant, credentials, call).await?
        } else {
            self.mutate(&tool, tenant, &credentials, &call).await?
        };

        if translate && !tool.translations.is_empty() {
            let payload = std::mem::take(&mut result.value);
            result.value = self
                .translator
                .translate(tenant, payload, &tool.translations, self)
                .await;
        }
        Ok(result)
    }

    async fn read(
        &self,
        tool: &ToolDescriptor,
        tenant: &TenantAlias,
        credentials: Arc<CredentialSet>,
        call: PreparedCall,
    ) -> EdgewardResult<InvocationResult> {
        let key = TenantScopedKey::new(tenant.clone(), call.path.clone(), &call.query);
        let ttl = self.ttls.ttl_for(tool.ttl_class);
        let mut cache_status = if ttl.is_some() { CacheStatus::Miss } else { CacheStatus::Bypass };

        if ttl.is_some() {
            match self.cache.get(&key).await {
                Ok(Some(value)) => {
                    tracing::debug!(tool = %tool.name, cache_key = %key, "Cache hit");
                    return Ok(self.result(tool, tenant, value, CacheStatus::Hit, 0, false));
                }
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(tool = %tool.name, cache_key = %key, error = %e, "Cache read failed, bypassing cache");
                    cache_status = CacheStatus::Bypass;
                }
            }
        }

        let tags: Vec<CacheTag> = call.tags.iter().map(|family| CacheTag::new(tenant, family)).collect();
        let epochs = self.cache.tag_epochs(&tags);
        let class = tool.endpoint_class();

        let work = {
            let upstream = self.upstream.clone();
            let cache = self.cache.clone();
            let credentials = Arc::clone(&credentials);
            let call = call.clone();
            let class = class.clone();
            let key = key.clone();
            move || async move {
                let outcome = upstream.call(&credentials, &call, &class).await?;
                if let Some(ttl) = ttl {
                    if let Err(e) = cache
                        .set_guarded(&key, outcome.value.clone(), ttl, &tags, &epochs)
                        .await
                    {
                        tracing::warn!(cache_key = %key, error = %e, "Cache write failed");
                    }
                }
                Ok(outcome)
            }
        };

        let joined = match self.wait_timeout {
            Some(limit) => self.coalescer.execute_with_timeout(&key.encode(), limit, work).await,
            None => self.coalescer.execute_with_role(&key.encode(), work).await,
        };
        let (outcome, coalesced) = match joined {
            (Ok(outcome), role) => (outcome, role == CoalesceRole::Subscriber),
            (Err(EdgewardError::Storage(e)), _) => {
                tracing::warn!(tool = %tool.name, cache_key = %key, error = %e, "Coalescer failed, calling upstream directly");
                cache_status = CacheStatus::Bypass;
                (self.upstream.call(&credentials, &call, &class).await?, false)
            }
            (Err(e), _) => return Err(e),
        };

        Ok(self.result(tool, tenant, outcome.value, cache_status, outcome.attempts, coalesced))
    }

    async fn mutate(
        &self,
        tool: &ToolDescriptor,
        tenant: &TenantAlias,
        credentials: &CredentialSet,
        call: &PreparedCall,
    ) -> EdgewardResult<InvocationResult> {
        let outcome = self.upstream.call(credentials, call, &tool.endpoint_class()).await?;
        self.invalidate(tool, tenant, &call.invalidates).await;
        Ok(self.result(tool, tenant, outcome.value, CacheStatus::Bypass, outcome.attempts, false))
    }

    /// Invalidate every declared tag family. If that fails the tenant's
    /// whole cache is dropped instead; the mutation itself has already
    /// succeeded and is reported as such either way.
    async fn invalidate(&self, tool: &ToolDescriptor, tenant: &TenantAlias, families: &[String]) {
        for family in families {
            let tag = CacheTag::new(tenant, family);
            if let Err(e) = self.cache.invalidate_by_tag(&tag).await {
                tracing::warn!(tool = %tool.name, tag = %tag, error = %e, "Tag invalidation failed, clearing tenant cache");
                if let Err(e) = self.cache.invalidate_tenant(tenant).await {
                    tracing::error!(tool = %tool.name, tenant = %tenant, error = %e, "Tenant cache invalidation failed");
                }
                return;
            }
        }
    }

    fn result(
        &self,
        tool: &ToolDescriptor,
        tenant: &TenantAlias,
        value: Value,
        cache_status: CacheStatus,
        attempts: u32,
        coalesced: bool,
    ) -> InvocationResult {
        InvocationResult {
            tool: tool.name.clone(),
            tenant: tenant.clone(),
            value,
            cache_status,
            attempts,
            coalesced,
        }
    }
}

#[async_trait]
impl LookupInvoker for ExecutionPipeline {
    async fn lookup(&self, tool: &str, tenant: &TenantAlias, params: Value) -> EdgewardResult<Value> {
        self.run(tool, tenant, params, false).await.map(|r| r.value)
    }
}

impl std::fmt::Debug for ExecutionPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionPipeline")
            .field("tenants", &self.credentials.len())
            .field("tools", &self.tools.len())
            .field("cache", &self.cache)
            .field("upstream", &self.upstream)
            .finish()
    }
}
