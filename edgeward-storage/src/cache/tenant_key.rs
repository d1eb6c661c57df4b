//! Tenant-scoped cache keys and tags.
//!
//! The key insight is that `TenantScopedKey`'s private constructor makes
//! cross-tenant access UNCOMPILABLE. You cannot construct a key without
//! explicitly providing a tenant alias, and the alias is always the leading
//! component of the encoded key.

use edgeward_core::TenantAlias;

/// Separator between the tenant alias and the rest of the key.
pub const SEPARATOR: char = ':';

/// A cache key that is scoped to a specific tenant.
///
/// # Encoded Format
///
/// `<tenant>:<resource path>[?<normalized query>]`
///
/// The normalized query sorts parameters by name then value, so two requests
/// that differ only in parameter order share one entry. Tenant aliases cannot
/// contain `:` (see [`TenantAlias::new`]), so the first separator always ends
/// the tenant component and one tenant's prefix can never match another's.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TenantScopedKey {
    /// Private inner data - cannot be constructed externally
    inner: TenantKeyInner,
}

/// Private inner struct - prevents external construction.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct TenantKeyInner {
    tenant: TenantAlias,
    resource: String,
    query: String,
}

impl TenantScopedKey {
    /// Create a new tenant-scoped cache key.
    ///
    /// This is the ONLY way to construct a `TenantScopedKey`.
    ///
    /// # Arguments
    ///
    /// * `tenant` - The tenant this key belongs to
    /// * `resource` - Logical resource path, e.g. `/papi/v1/properties/prp_1`
    /// * `query` - Query parameters in any order
    pub fn new<K, V>(tenant: TenantAlias, resource: impl Into<String>, query: &[(K, V)]) -> Self
    where
        K: AsRef<str>,
        V: AsRef<str>,
    {
        Self {
            inner: TenantKeyInner {
                tenant,
                resource: resource.into(),
                query: normalize_query(query),
            },
        }
    }

    /// Key for a resource with no query parameters.
    pub fn resource(tenant: TenantAlias, resource: impl Into<String>) -> Self {
        Self::new::<&str, &str>(tenant, resource, &[])
    }

    /// Get the tenant this key is scoped to.
    pub fn tenant(&self) -> &TenantAlias {
        &self.inner.tenant
    }

    /// Get the logical resource path.
    pub fn resource_path(&self) -> &str {
        &self.inner.resource
    }

    /// Get the normalized query string (empty when there is none).
    pub fn normalized_query(&self) -> &str {
        &self.inner.query
    }

    /// Encode this key to its backend string form.
    pub fn encode(&self) -> String {
        let mut out = String::with_capacity(
            self.inner.tenant.as_str().len() + 1 + self.inner.resource.len() + self.inner.query.len() + 1,
        );
        out.push_str(self.inner.tenant.as_str());
        out.push(SEPARATOR);
        out.push_str(&self.inner.resource);
        if !self.inner.query.is_empty() {
            out.push('?');
            out.push_str(&self.inner.query);
        }
        out
    }

    /// Prefix shared by every key belonging to a tenant.
    pub fn tenant_prefix(tenant: &TenantAlias) -> String {
        format!("{}{}", tenant.as_str(), SEPARATOR)
    }

    /// Tenant-confined invalidation pattern.
    ///
    /// The pattern is always anchored under the tenant prefix, so `*` can
    /// never reach another tenant's keys.
    pub fn tenant_pattern(tenant: &TenantAlias, pattern: &str) -> String {
        format!("{}{}", Self::tenant_prefix(tenant), pattern)
    }
}

impl std::fmt::Display for TenantScopedKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.encode())
    }
}

/// An invalidation tag scoped to a tenant, e.g. `acme:R1-family`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheTag(String);

impl CacheTag {
    /// Build a tag for a tag family within one tenant.
    pub fn new(tenant: &TenantAlias, family: &str) -> Self {
        Self(format!("{}{}{}", tenant.as_str(), SEPARATOR, family))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for CacheTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Sort query parameters by name then value and join them.
///
/// Names and values are percent-encoded before joining, so a value holding
/// `&` or `=` cannot pose as an extra parameter.
fn normalize_query<K: AsRef<str>, V: AsRef<str>>(query: &[(K, V)]) -> String {
    let mut pairs: Vec<(&str, &str)> = query
        .iter()
        .map(|(k, v)| (k.as_ref(), v.as_ref()))
        .filter(|(k, _)| !k.is_empty())
        .collect();
    pairs.sort_unstable();
    pairs
        .iter()
        .map(|(k, v)| format!("{}={}", urlencoding::encode(k), urlencoding::encode(v)))
        .collect::<Vec<_>>()
        .join("&")
}

/// Glob match where `*` matches any run of characters (including none).
pub fn glob_match(pattern: &str, candidate: &str) -> bool {
    let p: Vec<char> = pattern.chars().collect();
    let c: Vec<char> = candidate.chars().collect();
    let (mut pi, mut ci) = (0usize, 0usize);
    let mut star: Option<usize> = None;
    let mut mark = 0usize;

    while ci < c.len() {
        if pi < p.len() && p[pi] != '*' && p[pi] == c[ci] {
            pi += 1;
            ci += 1;
        } else if pi < p.len() && p[pi] == '*' {
            star = Some(pi);
            mark = ci;
            pi += 1;
        } else if let Some(s) = star {
            pi = s + 1;
            mark += 1;
            ci = mark;
        } else {
            return false;
        }
    }
    while pi < p.len() && p[pi] == '*' {
        pi += 1;
    }
    pi == p.len()
}


// ============================================================================
// PROPERTY-BASED TESTS
// ============================================================================

#[cfg(test)]
mod prop_tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        /// A pattern anchored under one tenant never matches another tenant's key.
        #[test]
        fn prop_tenant_pattern_never_crosses_tenants(
            a in "[a-z]{1,8}",
            b in "[a-z]{1,8}",
            resource in "[a-zA-Z0-9/_:-]{0,24}",
            pattern in "[a-z*:]{0,8}",
        ) {
            prop_assume!(a != b);
            let ta = TenantAlias::new(a).unwrap();
            let tb = TenantAlias::new(b).unwrap();
            let key = TenantScopedKey::resource(tb, resource).encode();
            let anchored = TenantScopedKey::tenant_pattern(&ta, &pattern);
            // The anchored pattern starts with "<a>:" with no wildcard before
            // the separator, so it can only match keys with that exact prefix.
            prop_assert!(!glob_match(&anchored, &key) || key.starts_with(&TenantScopedKey::tenant_prefix(&ta)));
        }

        /// Distinct query parameter sets never share an encoded key.
        #[test]
        fn prop_distinct_queries_encode_distinctly(
            a in proptest::collection::btree_map("[a-z&=]{1,4}", "[a-z0-9&=%]{0,4}", 0..4),
            b in proptest::collection::btree_map("[a-z&=]{1,4}", "[a-z0-9&=%]{0,4}", 0..4),
        ) {
            prop_assume!(a != b);
            let qa: Vec<(String, String)> = a.into_iter().collect();
            let qb: Vec<(String, String)> = b.into_iter().collect();
            let ka = TenantScopedKey::new(TenantAlias::new("acme").unwrap(), "/p", &qa);
            let kb = TenantScopedKey::new(TenantAlias::new("acme").unwrap(), "/p", &qb);
            prop_assert_ne!(ka.encode(), kb.encode());
        }
    }
}
