//! Per-tenant credential sets.

use crate::error::ConfigError;
use crate::TenantAlias;

/// Credentials for one tenant of the upstream management API.
///
/// Immutable once constructed. The `Debug` implementation redacts the
/// client secret and access token so credential sets can be logged safely.
#[derive(Clone, PartialEq, Eq)]
pub struct CredentialSet {
    alias: TenantAlias,
    base_host: String,
    client_token: String,
    client_secret: String,
    access_token: String,
    account_switch_key: Option<String>,
}

impl CredentialSet {
    /// Build a validated credential set.
    ///
    /// `base_host` may carry a leading `https://` and a trailing `/`, both of
    /// which are stripped. Any other path component is rejected.
    pub fn new(
        alias: TenantAlias,
        base_host: impl Into<String>,
        client_token: impl Into<String>,
        client_secret: impl Into<String>,
        access_token: impl Into<String>,
        account_switch_key: Option<String>,
    ) -> Result<Self, ConfigError> {
        let base_host = normalize_host(&base_host.into())?;
        let client_token = required("client_token", client_token.into())?;
        let client_secret = required("client_secret", client_secret.into())?;
        let access_token = required("access_token", access_token.into())?;
        let account_switch_key = account_switch_key
            .map(|k| k.trim().to_string())
            .filter(|k| !k.is_empty());

        Ok(Self {
            alias,
            base_host,
            client_token,
            client_secret,
            access_token,
            account_switch_key,
        })
    }

    pub fn alias(&self) -> &TenantAlias {
        &self.alias
    }

    /// Upstream host without scheme, e.g. `akab-xxxx.luna.akamaiapis.net`.
    pub fn base_host(&self) -> &str {
        &self.base_host
    }

    pub fn client_token(&self) -> &str {
        &self.client_token
    }

    pub fn client_secret(&self) -> &str {
        &self.client_secret
    }

    pub fn access_token(&self) -> &str {
        &self.access_token
    }

    pub fn account_switch_key(&self) -> Option<&str> {
        self.account_switch_key.as_deref()
    }
}

impl std::fmt::Debug for CredentialSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialSet")
            .field("alias", &self.alias)
            .field("base_host", &self.base_host)
            .field("client_token", &self.client_token)
            .field("client_secret", &"[REDACTED]")
            .field("access_token", &"[REDACTED]")
            .field("account_switch_key", &self.account_switch_key)
            .finish()
    }
}

fn required(field: &str, value: String) -> Result<String, ConfigError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(ConfigError::MissingRequired {
            field: field.to_string(),
        });
    }
    Ok(trimmed.to_string())
}

fn normalize_host(raw: &str) -> Result<String, ConfigError> {
    let trimmed = raw.trim();
    let without_scheme = trimmed
        .strip_prefix("https://")
        .or_else(|| trimmed.strip_prefix("http://"))
        .unwrap_or(trimmed);
    let host = without_scheme.trim_end_matches('/');

    if host.is_empty() {
        return Err(ConfigError::MissingRequired {
            field: "host".to_string(),
        });
    }
    if host.contains('/') || host.contains('?') || host.contains(char::is_whitespace) {
        return Err(ConfigError::InvalidValue {
            field: "host".to_string(),
            value: raw.to_string(),
            reason: "host must be a bare hostname without path or query".to_string(),
        });
    }
    Ok(host.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn alias(s: &str) -> TenantAlias {
        TenantAlias::new(s).unwrap()
    }

    #[test]
    fn test_host_scheme_is_stripped() {
        let creds = CredentialSet::new(
            alias("acme"),
            "https://akab-host.luna.akamaiapis.net/",
            "ct",
            "cs",
            "at",
            None,
        )
        .unwrap();
        assert_eq!(creds.base_host(), "akab-host.luna.akamaiapis.net");
    }

    #[test]
    fn test_host_with_path_rejected() {
        let err = CredentialSet::new(alias("acme"), "host.example/api", "ct", "cs", "at", None)
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref field, .. } if field == "host"));
    }

    #[test]
    fn test_missing_secret_rejected() {
        let err = CredentialSet::new(alias("acme"), "host", "ct", "  ", "at", None).unwrap_err();
        assert_eq!(
            err,
            ConfigError::MissingRequired {
                field: "client_secret".to_string()
            }
        );
    }

    #[test]
    fn test_blank_account_switch_key_is_none() {
        let creds =
            CredentialSet::new(alias("acme"), "host", "ct", "cs", "at", Some(" ".to_string()))
                .unwrap();
        assert_eq!(creds.account_switch_key(), None);
    }

    #[test]
    fn test_debug_redacts_secrets() {
        let creds = CredentialSet::new(
            alias("acme"),
            "host",
            "ct",
            "super-secret",
            "access-123",
            None,
        )
        .unwrap();
        let debug = format!("{:?}", creds);
        assert!(!debug.contains("super-secret"));
        assert!(!debug.contains("access-123"));
        assert!(debug.contains("[REDACTED]"));
    }
}
