//! Green check API integration tests
//!
//! Tests the public check endpoint end to end including:
//! - Green and grey classification
//! - Error mapping (400, 429, 502, 504)
//! - Batch checks and provider listing

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::*;
use greencheck::error::ResolveError;
use reqwest::StatusCode;

/// Test 1: End-to-end green classification
#[tokio::test]
async fn test_green_domain() {
    let app = start_default().await;
    app.resolver
        .answer("climateaction.tech", &["192.0.2.10"], Some(64496));

    let response = reqwest::get(app.check_url("climateaction.tech"))
        .await
        .expect("Failed to send request");

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()["x-greencheck-cache"], "miss");

    let body: serde_json::Value = response.json().await.expect("Failed to parse JSON");
    assert_eq!(body["url"], "climateaction.tech");
    assert_eq!(body["green"], true);
    assert_eq!(body["hosted_by"], "Leaf Hosting");
    assert_eq!(body["hosted_by_id"], 1);
}

/// Test 2: A domain matching no rule is grey
#[tokio::test]
async fn test_grey_domain() {
    let app = start_default().await;
    app.resolver.answer("grey.example", &["203.0.113.50"], Some(64999));

    let body: serde_json::Value = reqwest::get(app.check_url("grey.example"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    assert_eq!(body["url"], "grey.example");
    assert_eq!(body["green"], false);
    assert!(body["hosted_by"].is_null());
}

/// Test 3: ASN rule matches when no address range does
#[tokio::test]
async fn test_green_by_asn() {
    let app = start_default().await;
    app.resolver.answer("asn.example", &["203.0.113.7"], Some(64500));

    let body: serde_json::Value = reqwest::get(app.check_url("asn.example"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    assert_eq!(body["green"], true);
    assert_eq!(body["hosted_by"], "Wind Cloud");
    assert_eq!(body["partner"], "gold");
}

/// Test 4: Invalid input is a 400 and never reaches the resolver
#[tokio::test]
async fn test_invalid_domain() {
    let app = start_default().await;

    let response = reqwest::get(app.check_url("example-invalid-domain-!!"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["error"], "InvalidDomain");
    assert_eq!(app.resolver.calls(), 0);
}

/// Test 5: Inputs naming the same host share one classification
#[tokio::test]
async fn test_equivalent_inputs_share_cache_entry() {
    let app = start_default().await;
    app.resolver.answer("www.example.org", &["192.0.2.1"], None);

    for raw in [
        "www.example.org",
        "WWW.Example.ORG",
        "www.example.org.",
        "www.example.org/about/team",
    ] {
        let response = reqwest::get(app.check_url(raw)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK, "input {}", raw);
        let body: serde_json::Value = response.json().await.unwrap();
        assert_eq!(body["url"], "www.example.org");
    }

    assert_eq!(app.resolver.calls(), 1);
}

/// Test 6: Repeated checks within the TTL are byte-identical
#[tokio::test]
async fn test_idempotent_responses() {
    let app = start_default().await;
    app.resolver.answer("same.example", &["198.51.100.3"], None);

    let first = reqwest::get(app.check_url("same.example"))
        .await
        .unwrap()
        .bytes()
        .await
        .unwrap();
    let second = reqwest::get(app.check_url("same.example"))
        .await
        .unwrap()
        .bytes()
        .await
        .unwrap();

    assert_eq!(first, second);
}

/// Test 7: NXDOMAIN and resolver failures are 502
#[tokio::test]
async fn test_resolution_error() {
    let app = start_default().await;
    app.resolver
        .fail("servfail.example", ResolveError::Failed("SERVFAIL".to_string()));

    let response = reqwest::get(app.check_url("unknown.example")).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["error"], "ResolutionError");

    let response = reqwest::get(app.check_url("servfail.example")).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
}

/// Test 8: A slow resolver surfaces as 504 after exactly one retry
#[tokio::test]
async fn test_resolution_timeout() {
    let app = start_default().await;
    app.resolver.answer("slow.example", &["192.0.2.1"], None);
    app.resolver.set_delay(Duration::from_secs(5));

    let response = reqwest::get(app.check_url("slow.example")).await.unwrap();

    assert_eq!(response.status(), StatusCode::GATEWAY_TIMEOUT);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["error"], "ResolutionTimeout");
    assert_eq!(app.resolver.calls(), 2);
}

/// Test 9: Domain patterns classify when resolution fails
#[tokio::test]
async fn test_domain_pattern_fallback() {
    let app = start_default().await;
    app.resolver.fail(
        "blog.pages.example",
        ResolveError::Failed("REFUSED".to_string()),
    );

    let body: serde_json::Value = reqwest::get(app.check_url("blog.pages.example"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    assert_eq!(body["green"], true);
    assert_eq!(body["hosted_by"], "Pattern Pages");
}

/// Test 10: Over-limit clients get 429 with Retry-After
#[tokio::test]
async fn test_rate_limited() {
    let mut config = test_config();
    config.rate_limit.enabled = true;
    config.rate_limit.burst = 2;
    config.rate_limit.refill_per_sec = 0.1;

    let resolver = Arc::new(FakeResolver::new(Duration::ZERO));
    resolver.answer("limited.example", &["192.0.2.1"], None);
    let app = run_test_server(config, test_registry(), resolver).await;

    for _ in 0..2 {
        let response = reqwest::get(app.check_url("limited.example")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    let response = reqwest::get(app.check_url("limited.example")).await.unwrap();
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    assert!(response.headers().contains_key("retry-after"));
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["error"], "RateLimited");

    // Rejected requests do not reach the cache
    assert_eq!(app.checker.cache().len(), 1);
}

/// Test 11: Batch check
#[tokio::test]
async fn test_batch_check() {
    let app = start_default().await;
    app.resolver.answer("a.example", &["192.0.2.1"], None);
    app.resolver.answer("b.example", &["203.0.113.1"], None);

    let response = reqwest::get(app.url("/api/v3/greencheck?urls=a.example,b.example,!!"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body: Vec<serde_json::Value> = response.json().await.unwrap();
    assert_eq!(body.len(), 3);
    assert_eq!(body[0]["url"], "a.example");
    assert_eq!(body[0]["green"], true);
    assert_eq!(body[1]["green"], false);
    assert_eq!(body[2]["error"], "InvalidDomain");
}

/// Test 12: Provider listing and health
#[tokio::test]
async fn test_providers_and_health() {
    let app = start_default().await;

    let body: serde_json::Value = reqwest::get(app.url("/api/v3/providers"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let providers = body["providers"].as_array().unwrap();
    assert_eq!(providers.len(), 3);
    assert_eq!(providers[0]["ip_ranges"], 2);
    assert_eq!(providers[1]["asns"], 1);
    assert_eq!(providers[2]["domains"], 1);

    let response = reqwest::get(app.url("/health")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["status"], "healthy");
}
