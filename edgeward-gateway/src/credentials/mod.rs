//! Credential store.
//!
//! Loaded once at startup and read-only afterwards, so lookups need no
//! locking. An unknown alias is always an error; there is no fallback
//! tenant.

pub mod edgerc;

use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::Arc;

use edgeward_core::{ConfigError, CredentialSet, EdgewardError, EdgewardResult, TenantAlias};
use serde::Deserialize;

/// Per-tenant credential sets indexed by alias.
#[derive(Debug, Clone, Default)]
pub struct CredentialStore {
    tenants: HashMap<TenantAlias, Arc<CredentialSet>>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct CredentialFile {
    #[serde(default)]
    tenants: BTreeMap<String, TenantEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct TenantEntry {
    host: String,
    client_token: String,
    client_secret: String,
    access_token: String,
    #[serde(default, alias = "account_key")]
    account_switch_key: Option<String>,
}

impl CredentialStore {
    /// Index credential sets, rejecting duplicate aliases.
    pub fn new(sets: impl IntoIterator<Item = CredentialSet>) -> Result<Self, ConfigError> {
        let mut tenants = HashMap::new();
        for set in sets {
            let alias = set.alias().clone();
            if tenants.insert(alias.clone(), Arc::new(set)).is_some() {
                return Err(ConfigError::DuplicateTenant {
                    alias: alias.to_string(),
                });
            }
        }
        Ok(Self { tenants })
    }

    /// Parse an `.edgerc` document.
    pub fn from_edgerc_str(input: &str) -> Result<Self, ConfigError> {
        Self::new(edgerc::parse(input, ".edgerc")?)
    }

    /// Parse a TOML document with `[tenants.<alias>]` tables.
    pub fn from_toml_str(input: &str) -> Result<Self, ConfigError> {
        Self::parse_toml(input, "credentials.toml")
    }

    /// Load a credential file. Files ending in `.toml` are read as TOML,
    /// anything else as `.edgerc`.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let source = path.display().to_string();
        let input = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: source.clone(),
            reason: e.to_string(),
        })?;

        let store = if path.extension().is_some_and(|ext| ext == "toml") {
            Self::parse_toml(&input, &source)?
        } else {
            Self::new(edgerc::parse(&input, &source)?)?
        };

        if store.is_empty() {
            return Err(ConfigError::MissingRequired {
                field: format!("tenants in {}", source),
            });
        }
        tracing::info!(path = %source, tenants = store.len(), "Loaded credentials");
        Ok(store)
    }

    fn parse_toml(input: &str, source: &str) -> Result<Self, ConfigError> {
        let file: CredentialFile = toml::from_str(input).map_err(|e| ConfigError::Parse {
            path: source.to_string(),
            reason: e.to_string(),
        })?;

        let mut sets = Vec::with_capacity(file.tenants.len());
        for (name, entry) in file.tenants {
            let alias = TenantAlias::new(name.clone()).map_err(|e| ConfigError::InvalidValue {
                field: "tenants".to_string(),
                value: name.clone(),
                reason: e.to_string(),
            })?;
            sets.push(CredentialSet::new(
                alias,
                entry.host,
                entry.client_token,
                entry.client_secret,
                entry.access_token,
                entry.account_switch_key,
            )?);
        }
        Self::new(sets)
    }

    /// Credential set for `alias`.
    pub fn resolve(&self, alias: &TenantAlias) -> EdgewardResult<Arc<CredentialSet>> {
        self.tenants
            .get(alias)
            .cloned()
            .ok_or_else(|| EdgewardError::TenantNotFound {
                alias: alias.to_string(),
            })
    }

    /// Known aliases, sorted.
    pub fn aliases(&self) -> Vec<&TenantAlias> {
        let mut aliases: Vec<&TenantAlias> = self.tenants.keys().collect();
        aliases.sort_unstable();
        aliases
    }

    pub fn len(&self) -> usize {
        self.tenants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tenants.is_empty()
    }
}
