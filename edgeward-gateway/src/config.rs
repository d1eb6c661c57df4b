//! Gateway Configuration Module
//!
//! Settings come from three layers, later layers winning: built-in defaults
//! (see [`crate::constants`]), an optional TOML file named by
//! `EDGEWARD_CONFIG`, and `EDGEWARD_*` environment variables. Tool
//! descriptors, lookup resolvers and status overrides can only be set in
//! the file.
//!
//! ```toml
//! credentials = "~/.edgerc"
//!
//! [breaker]
//! failure_threshold = 5
//! cooldown_secs = 30
//!
//! [retry]
//! max_attempts = 3
//! base_delay_ms = 200
//! max_delay_ms = 5000
//!
//! [ttl]
//! list_secs = 60
//!
//! [status_overrides]
//! 409 = "TRANSIENT_UPSTREAM"
//!
//! [[tools]]
//! name = "listGroups"
//! method = "GET"
//! path = "/papi/v1/groups"
//! resource_kind = "group"
//! ttl_class = "reference"
//! tags = ["groups"]
//!
//! [[resolvers]]
//! resource_kind = "group"
//! lookup_tool = "listGroups"
//! items_pointer = "/groups/items"
//! id_field = "groupId"
//! name_pointer = "/groupName"
//! ```

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use edgeward_core::{ConfigError, ErrorKind, RetryConfig, TtlTable};
use serde::Deserialize;

use crate::breaker::CircuitBreakerConfig;
use crate::classify::StatusClassifier;
use crate::constants::*;
use crate::telemetry::LogFormat;
use crate::tools::{ToolDescriptor, ToolRegistry};
use crate::translator::LookupResolverConfig;

// ============================================================================
// GATEWAY CONFIGURATION
// ============================================================================

/// Complete gateway configuration.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Credential file (`.edgerc` or `.toml`).
    pub credentials_path: PathBuf,
    pub breaker: CircuitBreakerConfig,
    pub retry: RetryConfig,
    pub ttls: TtlTable,
    /// Capacity of the response cache.
    pub cache_max_entries: usize,
    pub cache_sweep_interval: Duration,
    /// TTL of resolved display names.
    pub name_cache_ttl: Duration,
    /// TTL of identifiers that failed to resolve.
    pub name_negative_ttl: Duration,
    pub upstream_timeout: Duration,
    /// How long one caller waits on a read before giving up.
    pub invocation_timeout: Duration,
    pub log_format: LogFormat,
    pub tools: Vec<ToolDescriptor>,
    pub resolvers: Vec<LookupResolverConfig>,
    pub status_overrides: HashMap<u16, ErrorKind>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            credentials_path: PathBuf::from(DEFAULT_EDGERC_FILE),
            breaker: CircuitBreakerConfig::default(),
            retry: RetryConfig {
                max_attempts: DEFAULT_RETRY_MAX_ATTEMPTS,
                initial_backoff: Duration::from_millis(DEFAULT_RETRY_BASE_DELAY_MS),
                max_backoff: Duration::from_millis(DEFAULT_RETRY_MAX_DELAY_MS),
                ..RetryConfig::default()
            },
            ttls: TtlTable {
                list: Duration::from_secs(DEFAULT_TTL_LIST_SECS),
                detail: Duration::from_secs(DEFAULT_TTL_DETAIL_SECS),
                reference: Duration::from_secs(DEFAULT_TTL_REFERENCE_SECS),
            },
            cache_max_entries: DEFAULT_CACHE_MAX_ENTRIES,
            cache_sweep_interval: Duration::from_secs(DEFAULT_CACHE_SWEEP_SECS),
            name_cache_ttl: Duration::from_secs(DEFAULT_NAME_CACHE_TTL_SECS),
            name_negative_ttl: Duration::from_secs(DEFAULT_NAME_NEGATIVE_TTL_SECS),
            upstream_timeout: Duration::from_secs(DEFAULT_UPSTREAM_TIMEOUT_SECS),
            invocation_timeout: Duration::from_secs(DEFAULT_INVOCATION_TIMEOUT_SECS),
            log_format: LogFormat::default(),
            tools: Vec::new(),
            resolvers: Vec::new(),
            status_overrides: HashMap::new(),
        }
    }
}

impl GatewayConfig {
    /// Create GatewayConfig from the process environment.
    ///
    /// Environment variables:
    /// - `EDGEWARD_CONFIG`: TOML configuration file (optional)
    /// - `EDGEWARD_EDGERC`: Credential file (default: `~/.edgerc`)
    /// - `EDGEWARD_CIRCUIT_FAILURE_THRESHOLD`: Failures before opening (default: 5)
    /// - `EDGEWARD_CIRCUIT_COOLDOWN_SECS`: Open-state cooldown (default: 30)
    /// - `EDGEWARD_RETRY_MAX_ATTEMPTS`: Attempts per call (default: 3)
    /// - `EDGEWARD_RETRY_BASE_DELAY_MS`: First backoff delay (default: 200)
    /// - `EDGEWARD_RETRY_MAX_DELAY_MS`: Backoff cap (default: 5000)
    /// - `EDGEWARD_CACHE_MAX_ENTRIES`: Response cache capacity (default: 10000)
    /// - `EDGEWARD_CACHE_SWEEP_SECS`: Expiry sweep interval (default: 30)
    /// - `EDGEWARD_TTL_LIST_SECS`, `EDGEWARD_TTL_DETAIL_SECS`,
    ///   `EDGEWARD_TTL_REFERENCE_SECS`: TTL per cache class (60 / 300 / 3600)
    /// - `EDGEWARD_NAME_CACHE_TTL_SECS`: Display name TTL (default: 3600)
    /// - `EDGEWARD_UPSTREAM_TIMEOUT_SECS`: Per-request timeout (default: 30)
    /// - `EDGEWARD_INVOCATION_TIMEOUT_SECS`: Wait per read invocation (default: 120)
    /// - `EDGEWARD_LOG_FORMAT`: `text` or `json` (default: text)
    pub fn from_env() -> Result<Self, ConfigError> {
        let env = |name: &str| std::env::var(name).ok();
        let file = match env("EDGEWARD_CONFIG") {
            Some(path) => {
                let path = expand_home(&path, &env);
                let contents = std::fs::read_to_string(&path).map_err(|e| ConfigError::Io {
                    path: path.display().to_string(),
                    reason: e.to_string(),
                })?;
                Some((path, contents))
            }
            None => None,
        };
        Self::from_sources(file.as_ref().map(|(p, c)| (p.as_path(), c.as_str())), env)
    }

    /// Build from an optional `(path, contents)` file and an environment
    /// lookup function.
    pub fn from_sources<E>(file: Option<(&Path, &str)>, env: E) -> Result<Self, ConfigError>
    where
        E: Fn(&str) -> Option<String>,
    {
        let mut config = Self {
            credentials_path: expand_home(&format!("~/{}", DEFAULT_EDGERC_FILE), &env),
            ..Self::default()
        };

        if let Some((path, contents)) = file {
            let parsed: ConfigFile = toml::from_str(contents).map_err(|e| ConfigError::Parse {
                path: path.display().to_string(),
                reason: e.to_string(),
            })?;
            config.apply_file(parsed, &env)?;
        }
        config.apply_env(&env)?;
        config.validate()?;
        Ok(config)
    }

    /// Parse a TOML document on top of the defaults, ignoring the environment.
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        Self::from_sources(Some((Path::new("config.toml"), contents)), |_| None)
    }

    fn apply_file<E>(&mut self, file: ConfigFile, env: &E) -> Result<(), ConfigError>
    where
        E: Fn(&str) -> Option<String>,
    {
        if let Some(path) = file.credentials {
            self.credentials_path = expand_home(&path, env);
        }
        if let Some(v) = file.breaker.failure_threshold {
            self.breaker.failure_threshold = v;
        }
        if let Some(v) = file.breaker.cooldown_secs {
            self.breaker.cooldown = Duration::from_secs(v);
        }
        if let Some(v) = file.retry.max_attempts {
            self.retry.max_attempts = v;
        }
        if let Some(v) = file.retry.base_delay_ms {
            self.retry.initial_backoff = Duration::from_millis(v);
        }
        if let Some(v) = file.retry.max_delay_ms {
            self.retry.max_backoff = Duration::from_millis(v);
        }
        if let Some(v) = file.retry.multiplier {
            self.retry.backoff_multiplier = v;
        }
        if let Some(v) = file.cache.max_entries {
            self.cache_max_entries = v;
        }
        if let Some(v) = file.cache.sweep_secs {
            self.cache_sweep_interval = Duration::from_secs(v);
        }
        if let Some(v) = file.ttl.list_secs {
            self.ttls.list = Duration::from_secs(v);
        }
        if let Some(v) = file.ttl.detail_secs {
            self.ttls.detail = Duration::from_secs(v);
        }
        if let Some(v) = file.ttl.reference_secs {
            self.ttls.reference = Duration::from_secs(v);
        }
        if let Some(v) = file.translator.name_ttl_secs {
            self.name_cache_ttl = Duration::from_secs(v);
        }
        if let Some(v) = file.translator.negative_ttl_secs {
            self.name_negative_ttl = Duration::from_secs(v);
        }
        if let Some(v) = file.upstream.timeout_secs {
            self.upstream_timeout = Duration::from_secs(v);
        }
        if let Some(v) = file.upstream.invocation_timeout_secs {
            self.invocation_timeout = Duration::from_secs(v);
        }
        if let Some(v) = file.log_format {
            self.log_format = v;
        }

        for (status, kind) in file.status_overrides {
            let code = status.trim().parse::<u16>().map_err(|_| ConfigError::InvalidValue {
                field: "status_overrides".to_string(),
                value: status.clone(),
                reason: "keys must be HTTP status codes".to_string(),
            })?;
            let kind = ErrorKind::from_str(&kind).map_err(|e| ConfigError::InvalidValue {
                field: format!("status_overrides.{}", code),
                value: kind.clone(),
                reason: e.to_string(),
            })?;
            self.status_overrides.insert(code, kind);
        }

        self.tools = file.tools;
        self.resolvers = file.resolvers;
        Ok(())
    }

    fn apply_env<E>(&mut self, env: &E) -> Result<(), ConfigError>
    where
        E: Fn(&str) -> Option<String>,
    {
        if let Some(path) = env("EDGEWARD_EDGERC") {
            self.credentials_path = expand_home(&path, env);
        }
        if let Some(v) = parse_env(env, "EDGEWARD_CIRCUIT_FAILURE_THRESHOLD")? {
            self.breaker.failure_threshold = v;
        }
        if let Some(v) = parse_env(env, "EDGEWARD_CIRCUIT_COOLDOWN_SECS")? {
            self.breaker.cooldown = Duration::from_secs(v);
        }
        if let Some(v) = parse_env(env, "EDGEWARD_RETRY_MAX_ATTEMPTS")? {
            self.retry.max_attempts = v;
        }
        if let Some(v) = parse_env(env, "EDGEWARD_RETRY_BASE_DELAY_MS")? {
            self.retry.initial_backoff = Duration::from_millis(v);
        }
        if let Some(v) = parse_env(env, "EDGEWARD_RETRY_MAX_DELAY_MS")? {
            self.retry.max_backoff = Duration::from_millis(v);
        }
        if let Some(v) = parse_env(env, "EDGEWARD_CACHE_MAX_ENTRIES")? {
            self.cache_max_entries = v;
        }
        if let Some(v) = parse_env(env, "EDGEWARD_CACHE_SWEEP_SECS")? {
            self.cache_sweep_interval = Duration::from_secs(v);
        }
        if let Some(v) = parse_env(env, "EDGEWARD_TTL_LIST_SECS")? {
            self.ttls.list = Duration::from_secs(v);
        }
        if let Some(v) = parse_env(env, "EDGEWARD_TTL_DETAIL_SECS")? {
            self.ttls.detail = Duration::from_secs(v);
        }
        if let Some(v) = parse_env(env, "EDGEWARD_TTL_REFERENCE_SECS")? {
            self.ttls.reference = Duration::from_secs(v);
        }
        if let Some(v) = parse_env(env, "EDGEWARD_NAME_CACHE_TTL_SECS")? {
            self.name_cache_ttl = Duration::from_secs(v);
        }
        if let Some(v) = parse_env(env, "EDGEWARD_UPSTREAM_TIMEOUT_SECS")? {
            self.upstream_timeout = Duration::from_secs(v);
        }
        if let Some(v) = parse_env(env, "EDGEWARD_INVOCATION_TIMEOUT_SECS")? {
            self.invocation_timeout = Duration::from_secs(v);
        }
        if let Some(v) = parse_env(env, "EDGEWARD_LOG_FORMAT")? {
            self.log_format = v;
        }
        Ok(())
    }

    /// Check cross-field constraints.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let positive = |field: &str, value: u64| {
            if value == 0 {
                Err(ConfigError::InvalidValue {
                    field: field.to_string(),
                    value: value.to_string(),
                    reason: "must be greater than zero".to_string(),
                })
            } else {
                Ok(())
            }
        };
        positive("breaker.failure_threshold", self.breaker.failure_threshold.into())?;
        positive("breaker.cooldown", self.breaker.cooldown.as_millis() as u64)?;
        positive("cache.max_entries", self.cache_max_entries as u64)?;
        positive("cache.sweep_secs", self.cache_sweep_interval.as_millis() as u64)?;
        positive("upstream.timeout_secs", self.upstream_timeout.as_millis() as u64)?;
        positive(
            "upstream.invocation_timeout_secs",
            self.invocation_timeout.as_millis() as u64,
        )?;
        self.retry.validate()?;

        // Build throwaway instances to surface template and table errors at load.
        let registry = ToolRegistry::new(self.tools.clone())?;
        StatusClassifier::with_overrides(self.status_overrides.clone())?;
        for resolver in &self.resolvers {
            resolver.validate()?;
            let tool = registry.get(&resolver.lookup_tool).map_err(|_| ConfigError::InvalidValue {
                field: format!("resolvers.{}.lookup_tool", resolver.resource_kind),
                value: resolver.lookup_tool.clone(),
                reason: "no tool with this name".to_string(),
            })?;
            if !tool.is_read() {
                return Err(ConfigError::InvalidValue {
                    field: format!("resolvers.{}.lookup_tool", resolver.resource_kind),
                    value: resolver.lookup_tool.clone(),
                    reason: "lookup tools must be read-only".to_string(),
                });
            }
        }
        Ok(())
    }
}

// ============================================================================
// FILE FORMAT
// ============================================================================

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConfigFile {
    credentials: Option<String>,
    log_format: Option<LogFormat>,
    #[serde(default)]
    breaker: BreakerSection,
    #[serde(default)]
    retry: RetrySection,
    #[serde(default)]
    cache: CacheSection,
    #[serde(default)]
    ttl: TtlSection,
    #[serde(default)]
    translator: TranslatorSection,
    #[serde(default)]
    upstream: UpstreamSection,
    #[serde(default)]
    status_overrides: BTreeMap<String, String>,
    #[serde(default)]
    tools: Vec<ToolDescriptor>,
    #[serde(default)]
    resolvers: Vec<LookupResolverConfig>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct BreakerSection {
    failure_threshold: Option<u32>,
    cooldown_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RetrySection {
    max_attempts: Option<u32>,
    base_delay_ms: Option<u64>,
    max_delay_ms: Option<u64>,
    multiplier: Option<f64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct CacheSection {
    max_entries: Option<usize>,
    sweep_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct TtlSection {
    list_secs: Option<u64>,
    detail_secs: Option<u64>,
    reference_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct TranslatorSection {
    name_ttl_secs: Option<u64>,
    negative_ttl_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct UpstreamSection {
    timeout_secs: Option<u64>,
    invocation_timeout_secs: Option<u64>,
}

// ============================================================================
// HELPERS
// ============================================================================

fn parse_env<E, T>(env: &E, name: &str) -> Result<Option<T>, ConfigError>
where
    E: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env(name) {
        None => Ok(None),
        Some(raw) if raw.trim().is_empty() => Ok(None),
        Some(raw) => raw.trim().parse::<T>().map(Some).map_err(|e| ConfigError::InvalidValue {
            field: name.to_string(),
            value: raw.clone(),
            reason: e.to_string(),
        }),
    }
}

/// Expand a leading `~/` using `HOME`.
fn expand_home<E>(path: &str, env: &E) -> PathBuf
where
    E: Fn(&str) -> Option<String>,
{
    match (path.strip_prefix("~/"), env("HOME")) {
        (Some(rest), Some(home)) => Path::new(&home).join(rest),
        _ => PathBuf::from(path),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env_of(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |name| map.get(name).cloned()
    }

    const FILE: &str = r#"
credentials = "~/creds/acme.toml"
log_format = "json"

[breaker]
failure_threshold = 3
cooldown_secs = 10

[retry]
max_attempts = 4

[ttl]
list_secs = 15

[status_overrides]
409 = "TRANSIENT_UPSTREAM"

[[tools]]
name = "listGroups"
method = "GET"
path = "/papi/v1/groups"
resource_kind = "group"
ttl_class = "reference"
tags = ["groups"]

[[resolvers]]
resource_kind = "group"
lookup_tool = "listGroups"
items_pointer = "/groups/items"
id_field = "groupId"
name_pointer = "/groupName"
"#;

    #[test]
    fn test_defaults() {
        let config = GatewayConfig::from_sources(None, env_of(&[("HOME", "/home/op")])).unwrap();
        assert_eq!(config.credentials_path, PathBuf::from("/home/op/.edgerc"));
        assert_eq!(config.breaker.failure_threshold, 5);
        assert_eq!(config.breaker.cooldown, Duration::from_secs(30));
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.retry.initial_backoff, Duration::from_millis(200));
        assert_eq!(config.retry.max_backoff, Duration::from_millis(5000));
        assert_eq!(config.ttls.list, Duration::from_secs(60));
        assert_eq!(config.ttls.reference, Duration::from_secs(3600));
        assert_eq!(config.cache_max_entries, 10_000);
        assert_eq!(config.invocation_timeout, Duration::from_secs(120));
        assert_eq!(config.log_format, LogFormat::Text);
    }

    #[test]
    fn test_file_layer() {
        let config = GatewayConfig::from_sources(
            Some((Path::new("edgeward.toml"), FILE)),
            env_of(&[("HOME", "/home/op")]),
        )
        .unwrap();
        assert_eq!(config.credentials_path, PathBuf::from("/home/op/creds/acme.toml"));
        assert_eq!(config.breaker.failure_threshold, 3);
        assert_eq!(config.breaker.cooldown, Duration::from_secs(10));
        assert_eq!(config.retry.max_attempts, 4);
        assert_eq!(config.ttls.list, Duration::from_secs(15));
        assert_eq!(config.ttls.detail, Duration::from_secs(300));
        assert_eq!(config.status_overrides.get(&409), Some(&ErrorKind::TransientUpstream));
        assert_eq!(config.tools.len(), 1);
        assert_eq!(config.resolvers.len(), 1);
        assert_eq!(config.log_format, LogFormat::Json);
    }

    #[test]
    fn test_env_overrides_file() {
        let config = GatewayConfig::from_sources(
            Some((Path::new("edgeward.toml"), FILE)),
            env_of(&[
                ("EDGEWARD_CIRCUIT_FAILURE_THRESHOLD", "7"),
                ("EDGEWARD_EDGERC", "/etc/edgeward/.edgerc"),
                ("EDGEWARD_TTL_LIST_SECS", "5"),
                ("EDGEWARD_INVOCATION_TIMEOUT_SECS", "45"),
            ]),
        )
        .unwrap();
        assert_eq!(config.invocation_timeout, Duration::from_secs(45));
        assert_eq!(config.breaker.failure_threshold, 7);
        assert_eq!(config.credentials_path, PathBuf::from("/etc/edgeward/.edgerc"));
        assert_eq!(config.ttls.list, Duration::from_secs(5));
    }

    #[test]
    fn test_invalid_env_value_is_an_error() {
        let err = GatewayConfig::from_sources(None, env_of(&[("EDGEWARD_RETRY_MAX_ATTEMPTS", "many")])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { field, .. } if field == "EDGEWARD_RETRY_MAX_ATTEMPTS"));

        let err = GatewayConfig::from_sources(None, env_of(&[("EDGEWARD_CIRCUIT_FAILURE_THRESHOLD", "0")])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
    }

    #[test]
    fn test_file_errors() {
        assert!(matches!(
            GatewayConfig::from_toml_str("[breaker]\nthreshold = 1\n"),
            Err(ConfigError::Parse { .. })
        ));
        assert!(GatewayConfig::from_toml_str("[status_overrides]\nabc = \"VALIDATION\"\n").is_err());
        assert!(GatewayConfig::from_toml_str("[status_overrides]\n409 = \"CIRCUIT_OPEN\"\n").is_err());
    }

    #[test]
    fn test_resolver_must_name_read_tool() {
        let file = r#"
[[resolvers]]
resource_kind = "group"
lookup_tool = "missing"
id_param = "groupId"
name_pointer = "/groupName"
"#;
        assert!(GatewayConfig::from_toml_str(file).is_err());
    }
}
