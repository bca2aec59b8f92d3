//! Integration tests for the request pipeline over real HTTP
//!
//! **Purpose**: Exercise the executor stack end to end — credentials →
//! limiter → breaker → transport → classification → feedback — against a
//! live WireMock upstream instead of scripted transports.
//!
//! **Coverage:**
//! - Happy path: bearer credential and query parameters on the wire
//! - Retry loop: 503 responses are retried until a 200 lands
//! - Fatal path: 401 surfaces as an auth error after exactly one call
//! - Quota resync: usage headers overwrite local bucket accounting
//! - Client deadline: a slow upstream maps to the timeout taxonomy
//! - Batch envelope: chunk split, sub-response realignment, partial failure
//! - Pagination: nested cursors followed across pages to the end
//!
//! **Infrastructure:**
//! - WireMock HTTP server (simulates the ads platform)
//! - HttpTransport + RequestExecutor with a real reqwest client

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use wiremock::matchers::{header, method, path, query_param, query_param_is_missing};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

use adbridge_common::resilience::{Jitter, RetryConfig};
use adbridge_domain::{AccountId, ApiError, ApiRequest, RateLimitScope};
use adbridge_infra::api::{
    BatchConfig, BatchExecutor, ExecutorConfig, HttpTransport, PageConfig, Paginator,
    RequestExecutor,
};
use adbridge_infra::auth::StaticTokenProvider;

// ============================================================================
// Helpers
// ============================================================================

fn fast_retry(max_attempts: u32) -> RetryConfig {
    RetryConfig {
        max_attempts,
        base_delay: Duration::from_millis(10),
        max_delay: Duration::from_millis(30),
        jitter: Jitter::None,
    }
}

fn no_retry() -> RetryConfig {
    fast_retry(0)
}

fn build_executor(
    server: &MockServer,
    retry: RetryConfig,
    timeout: Duration,
) -> Arc<RequestExecutor> {
    let transport = HttpTransport::new(&server.uri(), timeout).expect("transport construction");
    let config = ExecutorConfig { retry, ..ExecutorConfig::default() };
    Arc::new(RequestExecutor::new(
        Arc::new(transport),
        Arc::new(StaticTokenProvider::new("test-token")),
        config,
    ))
}

// ============================================================================
// Stateful Responders
// ============================================================================

/// Fails the first `failures` calls with a 503, then serves a 200.
struct FlakyUpstream {
    calls: Arc<AtomicUsize>,
    failures: usize,
}

impl Respond for FlakyUpstream {
    fn respond(&self, _request: &Request) -> ResponseTemplate {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call < self.failures {
            ResponseTemplate::new(503).set_body_json(json!({
                "error": {"message": "Service temporarily unavailable", "code": 2}
            }))
        } else {
            ResponseTemplate::new(200).set_body_json(json!({"data": [{"id": "as_1"}]}))
        }
    }
}

/// Answers batch envelopes with one sub-response per entry, echoing each
/// entry's relative URL so tests can verify positional alignment.
struct BatchUpstream;

impl Respond for BatchUpstream {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let envelope: Value =
            serde_json::from_slice(&request.body).expect("batch body should be JSON");
        let entries =
            envelope["batch"].as_array().expect("envelope should carry a batch array");

        let results: Vec<Value> = entries
            .iter()
            .map(|entry| {
                let url = entry["relative_url"].as_str().unwrap_or_default();
                if url.contains("bad_collection") {
                    json!({
                        "code": 400,
                        "body": r#"{"error": {"message": "Unknown collection", "code": 100}}"#,
                    })
                } else {
                    json!({"code": 200, "body": format!("{{\"url\": \"{url}\"}}")})
                }
            })
            .collect();

        ResponseTemplate::new(200).set_body_json(Value::Array(results))
    }
}

// ============================================================================
// Executor
// ============================================================================

#[tokio::test(flavor = "multi_thread")]
async fn test_executor_sends_bearer_credentials_and_params() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/act_1/campaigns"))
        .and(header("authorization", "Bearer test-token"))
        .and(query_param("fields", "id,name"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": [{"id": "c_1", "name": "Spring Sale"}]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let executor = build_executor(&server, fast_retry(2), Duration::from_secs(5));
    let request = ApiRequest::get("act_1/campaigns").with_param("fields", "id,name");

    let response = executor.execute(&request).await.expect("call should succeed");

    assert_eq!(response.status, 200);
    assert_eq!(response.body["data"][0]["id"], "c_1");
}

#[tokio::test(flavor = "multi_thread")]
async fn test_executor_retries_transient_errors_until_success() {
    let server = MockServer::start().await;
    let calls = Arc::new(AtomicUsize::new(0));
    Mock::given(method("GET"))
        .and(path("/act_1/adsets"))
        .respond_with(FlakyUpstream { calls: Arc::clone(&calls), failures: 2 })
        .expect(3)
        .mount(&server)
        .await;

    let executor = build_executor(&server, fast_retry(3), Duration::from_secs(5));

    let response = executor
        .execute(&ApiRequest::get("act_1/adsets"))
        .await
        .expect("retries should recover");

    assert_eq!(response.body["data"][0]["id"], "as_1");
    assert_eq!(calls.load(Ordering::SeqCst), 3);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_executor_does_not_retry_auth_failures() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/me/adaccounts"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({
            "error": {
                "message": "Invalid OAuth access token",
                "type": "OAuthException",
                "code": 190
            }
        })))
        .expect(1)
        .mount(&server)
        .await;

    let executor = build_executor(&server, fast_retry(3), Duration::from_secs(5));

    let error = executor
        .execute(&ApiRequest::get("me/adaccounts"))
        .await
        .expect_err("401 should be fatal");

    assert!(matches!(error, ApiError::Auth { .. }), "got {error:?}");
    assert!(error.requires_reauth());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_usage_headers_resync_quota_accounting() {
    let server = MockServer::start().await;
    let scope = RateLimitScope::Account(AccountId::new("act_9"));
    Mock::given(method("GET"))
        .and(path("/act_9/insights"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"data": []}))
                .insert_header(
                    "x-ad-account-usage",
                    r#"{"acc_id_util_pct": 93.5, "reset_time_duration": 600}"#,
                ),
        )
        .expect(1)
        .mount(&server)
        .await;

    let executor = build_executor(&server, no_retry(), Duration::from_secs(5));
    let request = ApiRequest::get("act_9/insights").with_scope(scope.clone());
    executor.execute(&request).await.expect("call should succeed");

    let usage = executor.usage(&scope).expect("scope should have a bucket");
    let pct = f64::from(usage.used) / f64::from(usage.capacity) * 100.0;
    assert!((90.0..=100.0).contains(&pct), "bucket resynced to {pct:.1}%");
    assert!(usage.resets_in > Duration::from_secs(500));
    assert!(usage.resets_in <= Duration::from_secs(600));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_client_deadline_maps_to_timeout() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/act_1/campaigns"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"data": []}))
                .set_delay(Duration::from_secs(2)),
        )
        .mount(&server)
        .await;

    let executor = build_executor(&server, no_retry(), Duration::from_millis(150));

    let error = executor
        .execute(&ApiRequest::get("act_1/campaigns"))
        .await
        .expect_err("deadline should fire first");

    assert!(matches!(error, ApiError::Timeout { .. }), "got {error:?}");
}

// ============================================================================
// Batch
// ============================================================================

#[tokio::test(flavor = "multi_thread")]
async fn test_batch_chunks_and_realigns_sub_responses() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/"))
        .respond_with(BatchUpstream)
        .expect(2)
        .mount(&server)
        .await;

    let executor = build_executor(&server, no_retry(), Duration::from_secs(5));
    let config = BatchConfig::builder()
        .max_batch_size(2)
        .inter_batch_delay(Duration::ZERO)
        .build()
        .expect("batch config");
    let batch = BatchExecutor::new(Arc::clone(&executor), config);

    let outcome = batch
        .run(vec![
            ApiRequest::get("act_1/campaigns").with_param("fields", "id"),
            ApiRequest::get("act_1/bad_collection"),
            ApiRequest::post("act_1/ads").with_body(json!({"name": "Retarget"})),
        ])
        .await;

    assert_eq!(outcome.len(), 3);
    assert_eq!(outcome.success_count(), 2);
    assert_eq!(outcome.failure_count(), 1);

    let first = outcome.results[0].as_ref().expect("first operation succeeds");
    assert_eq!(first["url"], "act_1/campaigns?fields=id");
    let error = outcome.results[1].as_ref().expect_err("second operation fails");
    assert!(matches!(error, ApiError::Validation { .. }), "got {error:?}");
    let third = outcome.results[2].as_ref().expect("third operation succeeds");
    assert_eq!(third["url"], "act_1/ads");
}

// ============================================================================
// Pagination
// ============================================================================

#[tokio::test(flavor = "multi_thread")]
async fn test_paginator_follows_cursors_over_http() {
    let server = MockServer::start().await;

    let first_page = json!({
        "data": [{"id": "c_1"}, {"id": "c_2"}],
        "paging": {
            "cursors": {"after": "cur-2"},
            "next": format!("{}/act_1/campaigns?after=cur-2", server.uri()),
        }
    });
    let last_page = json!({
        "data": [{"id": "c_3"}],
        "paging": {"cursors": {"after": "cur-3"}}
    });

    Mock::given(method("GET"))
        .and(path("/act_1/campaigns"))
        .and(query_param_is_missing("after"))
        .respond_with(ResponseTemplate::new(200).set_body_json(first_page))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/act_1/campaigns"))
        .and(query_param("after", "cur-2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(last_page))
        .expect(1)
        .mount(&server)
        .await;

    let executor = build_executor(&server, no_retry(), Duration::from_secs(5));
    let config =
        PageConfig::builder().page_limit(2).max_pages(10).build().expect("page config");
    let paginator = Paginator::new(executor, config);

    let items = paginator
        .collect_all(ApiRequest::get("act_1/campaigns"))
        .await
        .expect("pagination should complete");

    let ids: Vec<&str> = items.iter().filter_map(|item| item["id"].as_str()).collect();
    assert_eq!(ids, vec!["c_1", "c_2", "c_3"]);
}
