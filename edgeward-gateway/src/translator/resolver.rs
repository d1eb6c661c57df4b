//! Identifier resolvers, one per resource kind.

use std::collections::HashMap;

use async_trait::async_trait;
use edgeward_core::{ConfigError, EdgewardResult, ResourceKind, TenantAlias};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::LookupInvoker;

/// Resolves raw identifiers of one resource kind to display names.
#[async_trait]
pub trait Resolver: Send + Sync {
    fn kind(&self) -> &ResourceKind;

    /// `Ok(None)` when the identifier is unknown upstream.
    async fn resolve(
        &self,
        tenant: &TenantAlias,
        raw_id: &str,
        invoker: &dyn LookupInvoker,
    ) -> EdgewardResult<Option<String>>;
}

/// Configuration of a [`LookupResolver`].
///
/// Two shapes are supported:
///
/// - detail lookup: `id_param` names the path parameter that receives the
///   raw id and `name_pointer` selects the name in the response;
/// - list lookup: `items_pointer` selects an array in the response, the
///   element whose `id_field` equals the raw id is chosen and
///   `name_pointer` selects the name within it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LookupResolverConfig {
    pub resource_kind: ResourceKind,
    /// Tool invoked through the pipeline.
    pub lookup_tool: String,
    #[serde(default)]
    pub id_param: Option<String>,
    #[serde(default)]
    pub items_pointer: Option<String>,
    #[serde(default)]
    pub id_field: Option<String>,
    /// JSON pointer to the display name, e.g. `/groupName`.
    pub name_pointer: String,
}

impl LookupResolverConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |field: &str, value: &str, reason: &str| ConfigError::InvalidValue {
            field: format!("resolvers.{}.{}", self.resource_kind, field),
            value: value.to_string(),
            reason: reason.to_string(),
        };

        for (field, pointer) in [
            ("name_pointer", Some(&self.name_pointer)),
            ("items_pointer", self.items_pointer.as_ref()),
        ] {
            if let Some(pointer) = pointer {
                if !pointer.is_empty() && !pointer.starts_with('/') {
                    return Err(invalid(field, pointer, "JSON pointers start with '/'"));
                }
            }
        }
        match (&self.id_param, &self.items_pointer, &self.id_field) {
            (Some(_), None, _) => Ok(()),
            (None, Some(_), Some(_)) => Ok(()),
            (None, Some(items), None) => Err(invalid("id_field", items, "list lookups need id_field")),
            (Some(param), Some(_), _) => Err(invalid(
                "id_param",
                param,
                "use either id_param or items_pointer, not both",
            )),
            (None, None, _) => Err(invalid(
                "lookup_tool",
                &self.lookup_tool,
                "set id_param for detail lookups or items_pointer for list lookups",
            )),
        }
    }
}

/// Resolves names by invoking a lookup tool through the pipeline, so the
/// lookup itself is cached and coalesced.
#[derive(Debug, Clone)]
pub struct LookupResolver {
    config: LookupResolverConfig,
}

impl LookupResolver {
    pub fn new(config: LookupResolverConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn lookup_tool(&self) -> &str {
        &self.config.lookup_tool
    }

    fn params_for(&self, raw_id: &str) -> Value {
        match &self.config.id_param {
            Some(param) => {
                let mut path = Map::new();
                path.insert(param.clone(), Value::String(raw_id.to_string()));
                let mut params = Map::new();
                params.insert("path".to_string(), Value::Object(path));
                Value::Object(params)
            }
            None => Value::Object(Map::new()),
        }
    }

    fn extract(&self, response: &Value, raw_id: &str) -> Option<String> {
        let scope = match (&self.config.items_pointer, &self.config.id_field) {
            (Some(items), Some(id_field)) => response
                .pointer(items)?
                .as_array()?
                .iter()
                .find(|item| item.get(id_field).map(|v| id_matches(v, raw_id)).unwrap_or(false))?,
            _ => response,
        };
        scope
            .pointer(&self.config.name_pointer)
            .and_then(Value::as_str)
            .filter(|name| !name.is_empty())
            .map(str::to_string)
    }
}

#[async_trait]
impl Resolver for LookupResolver {
    fn kind(&self) -> &ResourceKind {
        &self.config.resource_kind
    }

    async fn resolve(
        &self,
        tenant: &TenantAlias,
        raw_id: &str,
        invoker: &dyn LookupInvoker,
    ) -> EdgewardResult<Option<String>> {
        let response = invoker
            .lookup(&self.config.lookup_tool, tenant, self.params_for(raw_id))
            .await?;
        Ok(self.extract(&response, raw_id))
    }
}

/// Fixed id to name table.
#[derive(Debug, Clone)]
pub struct StaticResolver {
    kind: ResourceKind,
    names: HashMap<String, String>,
}

impl StaticResolver {
    pub fn new<I, K, V>(kind: ResourceKind, names: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            kind,
            names: names.into_iter().map(|(k, v)| (k.into(), v.into())).collect(),
        }
    }
}

#[async_trait]
impl Resolver for StaticResolver {
    fn kind(&self) -> &ResourceKind {
        &self.kind
    }

    async fn resolve(
        &self,
        _tenant: &TenantAlias,
        raw_id: &str,
        _invoker: &dyn LookupInvoker,
    ) -> EdgewardResult<Option<String>> {
        Ok(self.names.get(raw_id).cloned())
    }
}

fn id_matches(value: &Value, raw_id: &str) -> bool {
    match value {
        Value::String(s) => s == raw_id,
        Value::Number(n) => n.to_string() == raw_id,
        _ => false,
    }
}
