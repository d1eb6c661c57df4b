//! Properties of signed requests and cache keys over generated inputs.

use edgeward_gateway::{sign_request_with, SigningContext};
use edgeward_storage::TenantScopedKey;
use edgeward_test_utils::generators::{
    arb_api_path, arb_credential_set, arb_http_method, arb_json_body, arb_query, arb_tenant_alias,
};
use proptest::prelude::*;

fn context() -> SigningContext {
    SigningContext::new("20240101T00:00:00+0000", "5f0c7a1e-0000-4000-8000-000000000001")
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    /// Every generated request signs deterministically for its tenant's host.
    #[test]
    fn prop_signed_request_is_well_formed(
        creds in arb_credential_set(),
        method in arb_http_method(),
        path in arb_api_path(),
        query in arb_query(),
        body in proptest::option::of(arb_json_body()),
    ) {
        let body = body.map(|b| serde_json::to_vec(&b).unwrap());
        let a = sign_request_with(&creds, method, &path, &query, body.clone(), context()).unwrap();
        let b = sign_request_with(&creds, method, &path, &query, body.clone(), context()).unwrap();

        let auth = a.header("Authorization").unwrap();
        prop_assert_eq!(Some(auth), b.header("Authorization"));
        prop_assert!(auth.starts_with("EG1-HMAC-SHA256 client_token="));
        prop_assert_eq!(a.host.as_str(), creds.base_host());
        prop_assert!(a.path.starts_with(&path));
        prop_assert_eq!(a.path.contains("accountSwitchKey="), creds.account_switch_key().is_some());
        prop_assert_eq!(a.header("Content-Type").is_some(), body.is_some());
    }

    /// Two different parameter sets never share a cache entry or a request line.
    #[test]
    fn prop_distinct_queries_stay_distinct(
        tenant in arb_tenant_alias(),
        creds in arb_credential_set(),
        path in arb_api_path(),
        a in arb_query(),
        b in arb_query(),
    ) {
        prop_assume!(a != b);
        let ka = TenantScopedKey::new(tenant.clone(), path.clone(), &a);
        let kb = TenantScopedKey::new(tenant, path.clone(), &b);
        prop_assert_ne!(ka.encode(), kb.encode());

        let ra = sign_request_with(&creds, edgeward_core::HttpMethod::Get, &path, &a, None, context()).unwrap();
        let rb = sign_request_with(&creds, edgeward_core::HttpMethod::Get, &path, &b, None, context()).unwrap();
        prop_assert_ne!(ra.path, rb.path);
    }
}
