//! EdgeGrid `EG1-HMAC-SHA256` request signing.
//!
//! [`sign`] is a pure function of its inputs: the timestamp and nonce travel
//! in a [`SigningContext`] so the same context always yields the same header.
//! [`sign_request`] mints a fresh context and builds the full
//! [`SignedRequest`]; the pipeline calls it once per attempt so nonces are
//! never reused.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::{DateTime, Utc};
use edgeward_core::{CredentialSet, EdgewardError, HttpMethod};
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::constants::MAX_SIGNED_BODY_BYTES;

type HmacSha256 = Hmac<Sha256>;

/// Authorization scheme name.
pub const EG1_ALGORITHM: &str = "EG1-HMAC-SHA256";

/// Query parameter carrying the account switch key.
pub const ACCOUNT_SWITCH_KEY_PARAM: &str = "accountSwitchKey";

const TIMESTAMP_FORMAT: &str = "%Y%m%dT%H:%M:%S+0000";

/// Signing failures.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SigningError {
    #[error("Failed to initialize HMAC: {0}")]
    InvalidKey(String),
}

impl From<SigningError> for EdgewardError {
    fn from(err: SigningError) -> Self {
        EdgewardError::internal(err.to_string())
    }
}

/// Timestamp and nonce of one signing operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SigningContext {
    timestamp: String,
    nonce: String,
}

impl SigningContext {
    /// Context for the current instant with a random UUIDv4 nonce.
    pub fn fresh() -> Self {
        Self::at(Utc::now(), uuid::Uuid::new_v4().to_string())
    }

    /// Context for a fixed instant and nonce.
    pub fn at(instant: DateTime<Utc>, nonce: impl Into<String>) -> Self {
        Self {
            timestamp: format_timestamp(instant),
            nonce: nonce.into(),
        }
    }

    /// Context from an already formatted timestamp.
    pub fn new(timestamp: impl Into<String>, nonce: impl Into<String>) -> Self {
        Self {
            timestamp: timestamp.into(),
            nonce: nonce.into(),
        }
    }

    pub fn timestamp(&self) -> &str {
        &self.timestamp
    }

    pub fn nonce(&self) -> &str {
        &self.nonce
    }
}

/// Format an instant as `yyyyMMddTHH:mm:ss+0000`.
pub fn format_timestamp(instant: DateTime<Utc>) -> String {
    instant.format(TIMESTAMP_FORMAT).to_string()
}

/// A fully formed, signed upstream request. Single use.
#[derive(Clone)]
pub struct SignedRequest {
    pub method: HttpMethod,
    pub host: String,
    /// Path including the encoded query string.
    pub path: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<Vec<u8>>,
    pub timestamp: String,
    pub nonce: String,
}

impl SignedRequest {
    /// `https://<host><path>`
    pub fn url(&self) -> String {
        format!("https://{}{}", self.host, self.path)
    }

    /// Value of a header, matched case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

impl std::fmt::Debug for SignedRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignedRequest")
            .field("method", &self.method)
            .field("host", &self.host)
            .field("path", &self.path)
            .field("headers", &"[REDACTED]")
            .field("body_len", &self.body.as_ref().map(Vec::len))
            .field("timestamp", &self.timestamp)
            .field("nonce", &self.nonce)
            .finish()
    }
}

/// Compute the `Authorization` header value for one request.
///
/// `path` is the request path including its query string exactly as sent.
pub fn sign(
    credentials: &CredentialSet,
    method: HttpMethod,
    path: &str,
    body: Option<&[u8]>,
    context: &SigningContext,
) -> Result<String, SigningError> {
    let auth_prefix = format!(
        "{} client_token={};access_token={};timestamp={};nonce={};",
        EG1_ALGORITHM,
        credentials.client_token(),
        credentials.access_token(),
        context.timestamp,
        context.nonce,
    );

    let data_to_sign = [
        method.as_str(),
        "https",
        credentials.base_host(),
        path,
        "",
        &content_hash(body),
        &auth_prefix,
    ]
    .join("\t");

    let signing_key = hmac_base64(credentials.client_secret().as_bytes(), context.timestamp.as_bytes())?;
    let signature = hmac_base64(signing_key.as_bytes(), data_to_sign.as_bytes())?;

    Ok(format!("{}signature={}", auth_prefix, signature))
}

/// Build and sign a request with a fresh timestamp and nonce.
///
/// `query` must already be in the order it should be sent; the account
/// switch key is appended when the credential set carries one.
pub fn sign_request(
    credentials: &CredentialSet,
    method: HttpMethod,
    path: &str,
    query: &[(String, String)],
    body: Option<Vec<u8>>,
) -> Result<SignedRequest, SigningError> {
    sign_request_with(credentials, method, path, query, body, SigningContext::fresh())
}

/// [`sign_request`] with an explicit context.
pub fn sign_request_with(
    credentials: &CredentialSet,
    method: HttpMethod,
    path: &str,
    query: &[(String, String)],
    body: Option<Vec<u8>>,
    context: SigningContext,
) -> Result<SignedRequest, SigningError> {
    let mut pairs: Vec<(&str, &str)> = query.iter().map(|(k, v)| (k.as_str(), v.as_str())).collect();
    if let Some(key) = credentials.account_switch_key() {
        pairs.push((ACCOUNT_SWITCH_KEY_PARAM, key));
    }
    let path_and_query = with_query(path, &pairs);

    let authorization = sign(credentials, method, &path_and_query, body.as_deref(), &context)?;

    let mut headers = vec![("Authorization".to_string(), authorization)];
    if body.is_some() {
        headers.push(("Content-Type".to_string(), "application/json".to_string()));
    }
    headers.push(("Accept".to_string(), "application/json".to_string()));

    Ok(SignedRequest {
        method,
        host: credentials.base_host().to_string(),
        path: path_and_query,
        headers,
        body,
        timestamp: context.timestamp,
        nonce: context.nonce,
    })
}

/// Append percent-encoded query pairs to a path.
pub fn with_query(path: &str, pairs: &[(&str, &str)]) -> String {
    if pairs.is_empty() {
        return path.to_string();
    }
    let query = pairs
        .iter()
        .map(|(k, v)| format!("{}={}", urlencoding::encode(k), urlencoding::encode(v)))
        .collect::<Vec<_>>()
        .join("&");
    let joiner = if path.contains('?') { '&' } else { '?' };
    format!("{}{}{}", path, joiner, query)
}

fn content_hash(body: Option<&[u8]>) -> String {
    match body {
        Some(bytes) if !bytes.is_empty() => {
            let end = bytes.len().min(MAX_SIGNED_BODY_BYTES);
            BASE64.encode(Sha256::digest(&bytes[..end]))
        }
        _ => String::new(),
    }
}

fn hmac_base64(key: &[u8], message: &[u8]) -> Result<String, SigningError> {
    let mut mac = HmacSha256::new_from_slice(key).map_err(|e| SigningError::InvalidKey(e.to_string()))?;
    mac.update(message);
    Ok(BASE64.encode(mac.finalize().into_bytes()))
}


// ============================================================================
// PROPERTY-BASED TESTS
// ============================================================================

#[cfg(test)]
mod prop_tests {
    use super::*;
    use edgeward_core::TenantAlias;
    use proptest::prelude::*;

    fn creds(secret: &str) -> CredentialSet {
        CredentialSet::new(
            TenantAlias::new("acme").unwrap(),
            "host.example.net",
            "ct",
            secret,
            "at",
            None,
        )
        .unwrap()
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        /// Same inputs always produce the same header.
        #[test]
        fn prop_signing_is_deterministic(
            path in "/[a-z0-9/]{0,20}",
            body in proptest::option::of(proptest::collection::vec(any::<u8>(), 0..64)),
            nonce in "[a-f0-9-]{8,36}",
        ) {
            let c = creds("secret");
            let ctx = SigningContext::new("20240101T00:00:00+0000", nonce);
            let a = sign(&c, HttpMethod::Put, &path, body.as_deref(), &ctx).unwrap();
            let b = sign(&c, HttpMethod::Put, &path, body.as_deref(), &ctx).unwrap();
            prop_assert_eq!(a, b);
        }

        /// Changing the path, secret or nonce changes the signature.
        #[test]
        fn prop_single_input_change_changes_signature(
            path in "/[a-z0-9]{1,20}",
            suffix in "[a-z0-9]{1,4}",
        ) {
            let ctx = SigningContext::new("20240101T00:00:00+0000", "n1");
            let base = sign(&creds("secret"), HttpMethod::Get, &path, None, &ctx).unwrap();
            let sig = |h: &str| h.rsplit("signature=").next().unwrap_or_default().to_string();

            let other_path = format!("{}{}", path, suffix);
            let changed = sign(&creds("secret"), HttpMethod::Get, &other_path, None, &ctx).unwrap();
            prop_assert_ne!(sig(&base), sig(&changed));

            let changed = sign(&creds(&format!("secret{}", suffix)), HttpMethod::Get, &path, None, &ctx).unwrap();
            prop_assert_ne!(sig(&base), sig(&changed));

            let other_ctx = SigningContext::new("20240101T00:00:00+0000", format!("n1{}", suffix));
            let changed = sign(&creds("secret"), HttpMethod::Get, &path, None, &other_ctx).unwrap();
            prop_assert_ne!(sig(&base), sig(&changed));

            let changed = sign(&creds("secret"), HttpMethod::Delete, &path, None, &ctx).unwrap();
            prop_assert_ne!(sig(&base), sig(&changed));
        }

        /// The body and the timestamp are both covered by the signature.
        #[test]
        fn prop_body_and_timestamp_change_signature(
            path in "/[a-z0-9]{1,20}",
            body in proptest::collection::vec(any::<u8>(), 1..64),
            extra in any::<u8>(),
            offset_secs in 1i64..86_400,
        ) {
            let sig = |h: &str| h.rsplit("signature=").next().unwrap_or_default().to_string();
            let epoch = DateTime::<Utc>::from_timestamp(1_704_067_200, 0).unwrap();
            let ctx = SigningContext::at(epoch, "n1");
            let base = sign(&creds("secret"), HttpMethod::Post, &path, Some(&body), &ctx).unwrap();

            let empty = sign(&creds("secret"), HttpMethod::Post, &path, None, &ctx).unwrap();
            prop_assert_ne!(sig(&base), sig(&empty));

            let mut longer = body.clone();
            longer.push(extra);
            let changed = sign(&creds("secret"), HttpMethod::Post, &path, Some(&longer), &ctx).unwrap();
            prop_assert_ne!(sig(&base), sig(&changed));

            let later = SigningContext::at(epoch + chrono::Duration::seconds(offset_secs), "n1");
            let changed = sign(&creds("secret"), HttpMethod::Post, &path, Some(&body), &later).unwrap();
            prop_assert_ne!(sig(&base), sig(&changed));
        }
    }
}
