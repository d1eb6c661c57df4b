//! `.edgerc` parsing.
//!
//! INI dialect: `[section]` headers, `key = value` lines, `#` and `;`
//! full-line comments. Values are taken verbatim after the first `=` (client
//! secrets are base64 and may contain `=`), with surrounding quotes removed.

use edgeward_core::{ConfigError, CredentialSet, TenantAlias};

#[derive(Debug, Default)]
struct Section {
    name: String,
    host: Option<String>,
    client_token: Option<String>,
    client_secret: Option<String>,
    access_token: Option<String>,
    account_switch_key: Option<String>,
}

impl Section {
    fn into_credentials(self, source: &str) -> Result<CredentialSet, ConfigError> {
        let alias = TenantAlias::new(self.name.clone()).map_err(|e| ConfigError::InvalidValue {
            field: format!("{} section", source),
            value: self.name.clone(),
            reason: e.to_string(),
        })?;
        let missing = |key: &str| ConfigError::MissingRequired {
            field: format!("{}.{}", self.name, key),
        };
        CredentialSet::new(
            alias,
            self.host.clone().ok_or_else(|| missing("host"))?,
            self.client_token.clone().ok_or_else(|| missing("client_token"))?,
            self.client_secret.clone().ok_or_else(|| missing("client_secret"))?,
            self.access_token.clone().ok_or_else(|| missing("access_token"))?,
            self.account_switch_key,
        )
        .map_err(|e| match e {
            ConfigError::InvalidValue { field, value, reason } => ConfigError::InvalidValue {
                field: format!("{}.{}", self.name, field),
                value,
                reason,
            },
            ConfigError::MissingRequired { field } => ConfigError::MissingRequired {
                field: format!("{}.{}", self.name, field),
            },
            other => other,
        })
    }
}

/// Parse every section of an `.edgerc` document into a credential set.
///
/// `source` names the document in error messages.
pub fn parse(input: &str, source: &str) -> Result<Vec<CredentialSet>, ConfigError> {
    let mut sections: Vec<Section> = Vec::new();
    let parse_error = |line_no: usize, reason: &str| ConfigError::Parse {
        path: source.to_string(),
        reason: format!("line {}: {}", line_no, reason),
    };

    for (i, raw_line) in input.trim_start_matches('\u{feff}').lines().enumerate() {
        let line_no = i + 1;
        let line = raw_line.trim();
        if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
            continue;
        }

        if let Some(header) = line.strip_prefix('[') {
            let name = header
                .strip_suffix(']')
                .ok_or_else(|| parse_error(line_no, "unterminated section header"))?
                .trim();
            if name.is_empty() {
                return Err(parse_error(line_no, "empty section name"));
            }
            if sections.iter().any(|s| s.name == name) {
                return Err(ConfigError::DuplicateTenant {
                    alias: name.to_string(),
                });
            }
            sections.push(Section {
                name: name.to_string(),
                ..Section::default()
            });
            continue;
        }

        let (key, value) = line
            .split_once('=')
            .ok_or_else(|| parse_error(line_no, "expected 'key = value'"))?;
        let section = sections
            .last_mut()
            .ok_or_else(|| parse_error(line_no, "entry outside of any section"))?;
        let value = unquote(value.trim()).to_string();

        let slot = match key.trim().to_ascii_lowercase().as_str() {
            "host" => &mut section.host,
            "client_token" => &mut section.client_token,
            "client_secret" => &mut section.client_secret,
            "access_token" => &mut section.access_token,
            "account_key" | "account_switch_key" => &mut section.account_switch_key,
            // max_body and other client-side tunables
            _ => continue,
        };
        *slot = Some(value);
    }

    sections
        .into_iter()
        .map(|section| section.into_credentials(source))
        .collect()
}

fn unquote(value: &str) -> &str {
    for quote in ['"', '\''] {
        if let Some(inner) = value.strip_prefix(quote).and_then(|v| v.strip_suffix(quote)) {
            return inner;
        }
    }
    value
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "\
# shared credentials
[default]
host = akab-default.luna.akamaiapis.net
client_token = akab-ct-default
client_secret = c2VjcmV0PT0=
access_token = akab-at-default
max_body = 131072

; second tenant
[acme]
host = https://akab-acme.luna.akamaiapis.net/
client_token = \"akab-ct-acme\"
client_secret = acme-secret
access_token = akab-at-acme
account_key = 1-ABCDE
";

    #[test]
    fn test_parse_sections() {
        let sets = parse(SAMPLE, ".edgerc").unwrap();
        assert_eq!(sets.len(), 2);

        let default = &sets[0];
        assert_eq!(default.alias().as_str(), "default");
        assert_eq!(default.client_secret(), "c2VjcmV0PT0=");
        assert_eq!(default.account_switch_key(), None);

        let acme = &sets[1];
        assert_eq!(acme.base_host(), "akab-acme.luna.akamaiapis.net");
        assert_eq!(acme.client_token(), "akab-ct-acme");
        assert_eq!(acme.account_switch_key(), Some("1-ABCDE"));
    }

    #[test]
    fn test_missing_key_names_section() {
        let err = parse("[acme]\nhost = h.example.net\nclient_token = ct\naccess_token = at\n", "f").unwrap_err();
        assert_eq!(
            err,
            ConfigError::MissingRequired {
                field: "acme.client_secret".to_string()
            }
        );
    }

    #[test]
    fn test_duplicate_section_rejected() {
        let input = "[acme]\nhost=h\nclient_token=a\nclient_secret=b\naccess_token=c\n[acme]\n";
        assert_eq!(
            parse(input, "f").unwrap_err(),
            ConfigError::DuplicateTenant {
                alias: "acme".to_string()
            }
        );
    }

    #[test]
    fn test_malformed_lines() {
        assert!(matches!(parse("host = x\n", "f"), Err(ConfigError::Parse { .. })));
        assert!(matches!(parse("[acme\n", "f"), Err(ConfigError::Parse { .. })));
        assert!(matches!(parse("[acme]\njust text\n", "f"), Err(ConfigError::Parse { .. })));
    }

    #[test]
    fn test_host_with_path_rejected() {
        let input = "[acme]\nhost=h.example.net/papi\nclient_token=a\nclient_secret=b\naccess_token=c\n";
        assert!(matches!(parse(input, "f"), Err(ConfigError::InvalidValue { .. })));
    }

    #[test]
    fn test_empty_document() {
        assert!(parse("", "f").unwrap().is_empty());
    }
}
