//! Tool registry.
//!
//! A [`ToolDescriptor`] declares how a tool name maps to one upstream
//! request: method, path template, cache class, tag families and identifier
//! translations. [`ToolDescriptor::prepare`] validates invocation params and
//! renders a [`PreparedCall`].
//!
//! # Params
//!
//! ```json
//! { "path": {"propertyId": "prp_1"}, "query": {"contractId": "ctr_1"}, "body": {...} }
//! ```
//!
//! Path placeholders may also be given as flat top-level keys.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use edgeward_core::{ConfigError, EndpointClass, HttpMethod, ResourceKind, TtlClass, ValidationError};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::translator::TranslationMapping;

const RESERVED_PARAMS: [&str; 3] = ["path", "query", "body"];

/// Declaration of one tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ToolDescriptor {
    pub name: String,
    pub method: HttpMethod,
    /// Path template, e.g. `/papi/v1/properties/{propertyId}`.
    pub path: String,
    pub resource_kind: ResourceKind,
    /// Breaker group; defaults to the tool name.
    #[serde(default)]
    pub endpoint_class: Option<EndpointClass>,
    #[serde(default)]
    pub ttl_class: TtlClass,
    /// Tag families attached to cached responses, e.g. `property:{propertyId}`.
    #[serde(default)]
    pub tags: Vec<String>,
    /// Tag families invalidated after a successful mutation.
    #[serde(default)]
    pub invalidates: Vec<String>,
    #[serde(default)]
    pub required_query: Vec<String>,
    #[serde(default)]
    pub translations: Vec<TranslationMapping>,
}

/// A validated, rendered request ready for signing.
#[derive(Debug, Clone, PartialEq)]
pub struct PreparedCall {
    pub method: HttpMethod,
    /// Rendered, percent-encoded path without query.
    pub path: String,
    /// Query parameters sorted by name.
    pub query: Vec<(String, String)>,
    pub body: Option<Vec<u8>>,
    /// Rendered tag families for cached responses.
    pub tags: Vec<String>,
    /// Rendered tag families to invalidate.
    pub invalidates: Vec<String>,
}

impl ToolDescriptor {
    /// Breaker group of this tool.
    pub fn endpoint_class(&self) -> EndpointClass {
        self.endpoint_class
            .clone()
            .unwrap_or_else(|| EndpointClass::new(self.name.clone()))
    }

    /// Whether responses of this tool may be cached and coalesced.
    pub fn is_read(&self) -> bool {
        !self.method.is_mutation()
    }

    /// Validate `params` and render the upstream request.
    pub fn prepare(&self, params: &Value) -> Result<PreparedCall, ValidationError> {
        let empty = Map::new();
        let params = match params {
            Value::Null => &empty,
            Value::Object(map) => map,
            _ => {
                return Err(ValidationError::InvalidValue {
                    field: "params".to_string(),
                    reason: "params must be a JSON object".to_string(),
                })
            }
        };

        let placeholders = placeholders(&self.path).map_err(|reason| ValidationError::InvalidValue {
            field: "tool".to_string(),
            reason,
        })?;

        for key in params.keys() {
            if !RESERVED_PARAMS.contains(&key.as_str()) && !placeholders.iter().any(|p| p == key) {
                return Err(ValidationError::InvalidValue {
                    field: key.clone(),
                    reason: format!("unknown parameter for tool {}", self.name),
                });
            }
        }

        let nested_path = match params.get("path") {
            None | Some(Value::Null) => None,
            Some(Value::Object(map)) => Some(map),
            Some(_) => {
                return Err(ValidationError::InvalidValue {
                    field: "path".to_string(),
                    reason: "must be an object".to_string(),
                })
            }
        };

        let mut values: HashMap<String, String> = HashMap::new();
        for name in &placeholders {
            let raw = nested_path
                .and_then(|m| m.get(name))
                .or_else(|| params.get(name))
                .filter(|v| !v.is_null())
                .ok_or_else(|| ValidationError::RequiredFieldMissing { field: name.clone() })?;
            let text = scalar_to_string(name, raw)?;
            if text.is_empty() {
                return Err(ValidationError::RequiredFieldMissing { field: name.clone() });
            }
            values.insert(name.clone(), text);
        }

        let path = render(&self.path, &values, true);
        let query = self.query_pairs(params.get("query"))?;
        let body = self.body_bytes(params.get("body"))?;

        Ok(PreparedCall {
            method: self.method,
            path,
            query,
            body,
            tags: self.tags.iter().map(|t| render(t, &values, false)).collect(),
            invalidates: self.invalidates.iter().map(|t| render(t, &values, false)).collect(),
        })
    }

    fn query_pairs(&self, query: Option<&Value>) -> Result<Vec<(String, String)>, ValidationError> {
        let mut pairs: BTreeMap<String, String> = BTreeMap::new();
        match query {
            None | Some(Value::Null) => {}
            Some(Value::Object(map)) => {
                for (key, value) in map {
                    let field = format!("query.{}", key);
                    let text = match value {
                        Value::Null => continue,
                        Value::Array(items) => items
                            .iter()
                            .map(|item| scalar_to_string(&field, item))
                            .collect::<Result<Vec<_>, _>>()?
                            .join(","),
                        other => scalar_to_string(&field, other)?,
                    };
                    pairs.insert(key.clone(), text);
                }
            }
            Some(_) => {
                return Err(ValidationError::InvalidValue {
                    field: "query".to_string(),
                    reason: "must be an object".to_string(),
                })
            }
        }

        for required in &self.required_query {
            if !pairs.contains_key(required) {
                return Err(ValidationError::RequiredFieldMissing {
                    field: format!("query.{}", required),
                });
            }
        }
        Ok(pairs.into_iter().collect())
    }

    fn body_bytes(&self, body: Option<&Value>) -> Result<Option<Vec<u8>>, ValidationError> {
        match body {
            None | Some(Value::Null) => Ok(None),
            Some(value) => {
                if matches!(self.method, HttpMethod::Get | HttpMethod::Head) {
                    return Err(ValidationError::InvalidValue {
                        field: "body".to_string(),
                        reason: format!("{} requests take no body", self.method),
                    });
                }
                serde_json::to_vec(value)
                    .map(Some)
                    .map_err(|e| ValidationError::InvalidValue {
                        field: "body".to_string(),
                        reason: e.to_string(),
                    })
            }
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |field: &str, value: &str, reason: String| ConfigError::InvalidValue {
            field: format!("tools.{}.{}", self.name, field),
            value: value.to_string(),
            reason,
        };

        if self.name.trim().is_empty() {
            return Err(ConfigError::MissingRequired {
                field: "tools.name".to_string(),
            });
        }
        if !self.path.starts_with('/') {
            return Err(invalid("path", &self.path, "must start with '/'".to_string()));
        }
        let path_vars = placeholders(&self.path).map_err(|r| invalid("path", &self.path, r))?;
        for template in self.tags.iter().chain(&self.invalidates) {
            let vars = placeholders(template).map_err(|r| invalid("tags", template, r))?;
            if let Some(missing) = vars.iter().find(|v| !path_vars.contains(v)) {
                return Err(invalid(
                    "tags",
                    template,
                    format!("placeholder {{{}}} is not a path parameter", missing),
                ));
            }
        }
        Ok(())
    }
}

/// Registered tools by name.
#[derive(Debug, Clone, Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<ToolDescriptor>>,
}

impl ToolRegistry {
    /// Build a registry, rejecting duplicate names and malformed templates.
    pub fn new(tools: Vec<ToolDescriptor>) -> Result<Self, ConfigError> {
        let mut registry = Self::default();
        for tool in tools {
            registry.register(tool)?;
        }
        Ok(registry)
    }

    pub fn register(&mut self, tool: ToolDescriptor) -> Result<(), ConfigError> {
        tool.validate()?;
        if self.tools.contains_key(&tool.name) {
            return Err(ConfigError::InvalidValue {
                field: "tools.name".to_string(),
                value: tool.name,
                reason: "duplicate tool name".to_string(),
            });
        }
        self.tools.insert(tool.name.clone(), Arc::new(tool));
        Ok(())
    }

    pub fn get(&self, name: &str) -> Result<Arc<ToolDescriptor>, ValidationError> {
        self.tools
            .get(name)
            .cloned()
            .ok_or_else(|| ValidationError::UnknownTool { tool: name.to_string() })
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.tools.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

/// Placeholder names in a `{name}` template.
fn placeholders(template: &str) -> Result<Vec<String>, String> {
    let mut names = Vec::new();
    let mut rest = template;
    while let Some(open) = rest.find(['{', '}']) {
        if rest.as_bytes()[open] == b'}' {
            return Err(format!("unbalanced '}}' in {}", template));
        }
        let after = &rest[open + 1..];
        let close = after
            .find('}')
            .ok_or_else(|| format!("unclosed '{{' in {}", template))?;
        let name = &after[..close];
        if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return Err(format!("invalid placeholder '{{{}}}' in {}", name, template));
        }
        if !names.iter().any(|n| n == name) {
            names.push(name.to_string());
        }
        rest = &after[close + 1..];
    }
    Ok(names)
}

/// Substitute placeholders. Templates are validated before rendering.
fn render(template: &str, values: &HashMap<String, String>, encode: bool) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        let Some(close) = after.find('}') else {
            out.push_str(&rest[open..]);
            return out;
        };
        let name = &after[..close];
        match values.get(name) {
            Some(value) if encode => out.push_str(&urlencoding::encode(value)),
            Some(value) => out.push_str(value),
            None => {
                out.push('{');
                out.push_str(name);
                out.push('}');
            }
        }
        rest = &after[close + 1..];
    }
    out.push_str(rest);
    out
}

fn scalar_to_string(field: &str, value: &Value) -> Result<String, ValidationError> {
    match value {
        Value::String(s) => Ok(s.clone()),
        Value::Number(n) => Ok(n.to_string()),
        Value::Bool(b) => Ok(b.to_string()),
        _ => Err(ValidationError::InvalidValue {
            field: field.to_string(),
            reason: "must be a string, number or boolean".to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn get_property() -> ToolDescriptor {
        ToolDescriptor {
            name: "getProperty".to_string(),
            method: HttpMethod::Get,
            path: "/papi/v1/properties/{propertyId}".to_string(),
            resource_kind: ResourceKind::new("property"),
            endpoint_class: None,
            ttl_class: TtlClass::Detail,
            tags: vec!["property:{propertyId}".to_string(), "properties".to_string()],
            invalidates: Vec::new(),
            required_query: vec!["contractId".to_string()],
            translations: Vec::new(),
        }
    }

    #[test]
    fn test_prepare_renders_path_query_and_tags() {
        let call = get_property()
            .prepare(&json!({
                "path": {"propertyId": "prp_1"},
                "query": {"groupId": "grp_2", "contractId": "ctr_1", "skip": null}
            }))
            .unwrap();
        assert_eq!(call.path, "/papi/v1/properties/prp_1");
        assert_eq!(
            call.query,
            vec![
                ("contractId".to_string(), "ctr_1".to_string()),
                ("groupId".to_string(), "grp_2".to_string())
            ]
        );
        assert_eq!(call.tags, vec!["property:prp_1", "properties"]);
        assert!(call.body.is_none());
    }

    #[test]
    fn test_flat_placeholder_accepted_and_encoded() {
        let call = get_property()
            .prepare(&json!({"propertyId": "a/b c", "query": {"contractId": 7}}))
            .unwrap();
        assert_eq!(call.path, "/papi/v1/properties/a%2Fb%20c");
        assert_eq!(call.query, vec![("contractId".to_string(), "7".to_string())]);
    }

    #[test]
    fn test_missing_placeholder_names_field() {
        let err = get_property()
            .prepare(&json!({"query": {"contractId": "ctr_1"}}))
            .unwrap_err();
        assert_eq!(err, ValidationError::RequiredFieldMissing { field: "propertyId".to_string() });
    }

    #[test]
    fn test_missing_required_query() {
        let err = get_property().prepare(&json!({"propertyId": "prp_1"})).unwrap_err();
        assert_eq!(err.field(), Some("query.contractId"));
    }

    #[test]
    fn test_unknown_param_rejected() {
        let err = get_property()
            .prepare(&json!({"propertyId": "prp_1", "propertyID": "typo"}))
            .unwrap_err();
        assert_eq!(err.field(), Some("propertyID"));
    }

    #[test]
    fn test_get_rejects_body() {
        let err = get_property()
            .prepare(&json!({"propertyId": "prp_1", "query": {"contractId": "c"}, "body": {"x": 1}}))
            .unwrap_err();
        assert_eq!(err.field(), Some("body"));
    }

    #[test]
    fn test_mutation_body_serialized() {
        let mut tool = get_property();
        tool.method = HttpMethod::Put;
        tool.required_query.clear();
        tool.invalidates = vec!["property:{propertyId}".to_string()];
        let call = tool
            .prepare(&json!({"propertyId": "prp_1", "body": {"name": "new"}}))
            .unwrap();
        assert_eq!(call.body.as_deref(), Some(br#"{"name":"new"}"#.as_slice()));
        assert_eq!(call.invalidates, vec!["property:prp_1"]);
        assert!(!tool.is_read());
    }

    #[test]
    fn test_registry_rejects_duplicates_and_bad_templates() {
        let mut registry = ToolRegistry::new(vec![get_property()]).unwrap();
        assert!(registry.register(get_property()).is_err());

        let mut bad = get_property();
        bad.name = "bad".to_string();
        bad.path = "/papi/v1/properties/{propertyId".to_string();
        assert!(registry.register(bad).is_err());

        let mut bad_tag = get_property();
        bad_tag.name = "badTag".to_string();
        bad_tag.tags = vec!["group:{groupId}".to_string()];
        assert!(registry.register(bad_tag).is_err());

        assert_eq!(registry.names(), vec!["getProperty"]);
        assert!(matches!(
            registry.get("nope"),
            Err(ValidationError::UnknownTool { .. })
        ));
    }

    #[test]
    fn test_endpoint_class_defaults_to_name() {
        assert_eq!(get_property().endpoint_class().as_str(), "getProperty");
    }

    #[test]
    fn test_descriptor_from_toml() {
        let tool: ToolDescriptor = toml::from_str(
            r#"
            name = "listProperties"
            method = "GET"
            path = "/papi/v1/properties"
            resource_kind = "property"
            ttl_class = "list"
            tags = ["properties"]
            required_query = ["contractId", "groupId"]

            [[translations]]
            path = "properties.items[*].contractId"
            resource_kind = "contract"
            "#,
        )
        .unwrap();
        assert_eq!(tool.ttl_class, TtlClass::List);
        assert_eq!(tool.translations.len(), 1);
    }
}
