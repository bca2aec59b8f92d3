//! Chunked batch execution
//!
//! The platform accepts up to [`MAX_BATCH_SIZE`] operations per batch call.
//! [`BatchExecutor`] splits an arbitrary request list into platform-sized
//! chunks, sends each chunk as one batch call through the shared
//! [`RequestExecutor`] (inheriting its quota, breaker, and retry behavior),
//! and reassembles per-request results in input order. The batch envelope
//! either succeeds or fails as a unit; individual operations inside a
//! successful envelope succeed or fail independently.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tracing::debug;

use adbridge_common::clock::{Clock, SystemClock};
use adbridge_common::resilience::{ConfigError, ConfigResult};
use adbridge_domain::constants::{DEFAULT_INTER_BATCH_DELAY_MS, MAX_BATCH_SIZE};
use adbridge_domain::{ApiError, ApiRequest, RateLimitScope};

use super::executor::{classify_http, RequestExecutor};

/// Chunking and pacing settings for batch execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchConfig {
    /// Operations per batch call, at most [`MAX_BATCH_SIZE`]
    pub max_batch_size: usize,
    /// Pause between consecutive batch calls
    pub inter_batch_delay: Duration,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            max_batch_size: MAX_BATCH_SIZE,
            inter_batch_delay: Duration::from_millis(DEFAULT_INTER_BATCH_DELAY_MS),
        }
    }
}

impl BatchConfig {
    /// Start building a batch configuration.
    pub fn builder() -> BatchConfigBuilder {
        BatchConfigBuilder::default()
    }

    fn validate(&self) -> ConfigResult<()> {
        if self.max_batch_size == 0 {
            return Err(ConfigError::new("max_batch_size must be greater than 0"));
        }
        if self.max_batch_size > MAX_BATCH_SIZE {
            return Err(ConfigError::new(format!(
                "max_batch_size must not exceed the platform limit of {MAX_BATCH_SIZE}"
            )));
        }
        Ok(())
    }
}

/// Builder for [`BatchConfig`].
#[derive(Debug, Default)]
pub struct BatchConfigBuilder {
    config: BatchConfig,
}

impl BatchConfigBuilder {
    /// Operations per batch call.
    pub fn max_batch_size(mut self, max_batch_size: usize) -> Self {
        self.config.max_batch_size = max_batch_size;
        self
    }

    /// Pause between consecutive batch calls.
    pub fn inter_batch_delay(mut self, inter_batch_delay: Duration) -> Self {
        self.config.inter_batch_delay = inter_batch_delay;
        self
    }

    /// Validate and produce the configuration.
    pub fn build(self) -> ConfigResult<BatchConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

/// Per-request outcomes of a batch run, aligned with the input order.
#[derive(Debug)]
pub struct BatchOutcome {
    /// `results[i]` is the outcome of the i-th submitted request
    pub results: Vec<Result<Value, ApiError>>,
}

impl BatchOutcome {
    /// Number of operations that succeeded.
    pub fn success_count(&self) -> usize {
        self.results.iter().filter(|r| r.is_ok()).count()
    }

    /// Number of operations that failed.
    pub fn failure_count(&self) -> usize {
        self.results.len() - self.success_count()
    }

    /// Total number of operations.
    pub fn len(&self) -> usize {
        self.results.len()
    }

    /// True when no operations were submitted.
    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }
}

/// Splits request lists into platform-sized batch calls.
pub struct BatchExecutor<C = SystemClock>
where
    C: Clock + Clone,
{
    executor: Arc<RequestExecutor<C>>,
    config: BatchConfig,
}

impl<C> BatchExecutor<C>
where
    C: Clock + Clone,
{
    /// Batch executor sending through `executor`.
    pub fn new(executor: Arc<RequestExecutor<C>>, config: BatchConfig) -> Self {
        Self { executor, config }
    }

    /// Execute `requests` in chunks, pacing between chunks.
    ///
    /// Never fails as a whole: a chunk whose batch call fails contributes
    /// that error at every one of its positions, and the remaining chunks
    /// still run.
    pub async fn run(&self, requests: Vec<ApiRequest>) -> BatchOutcome {
        let total = requests.len();
        let mut results = Vec::with_capacity(total);
        let chunk_count = total.div_ceil(self.config.max_batch_size.max(1));

        for (index, chunk) in requests.chunks(self.config.max_batch_size).enumerate() {
            debug!(chunk = index + 1, of = chunk_count, size = chunk.len(), "sending batch chunk");
            results.extend(self.run_chunk(chunk).await);

            let last = index + 1 == chunk_count;
            if !last && !self.config.inter_batch_delay.is_zero() {
                tokio::time::sleep(self.config.inter_batch_delay).await;
            }
        }

        BatchOutcome { results }
    }

    /// One batch call for `chunk`, returning a result per chunk position.
    async fn run_chunk(&self, chunk: &[ApiRequest]) -> Vec<Result<Value, ApiError>> {
        let entries: Vec<Value> = chunk.iter().map(batch_entry).collect();
        // Batch calls hit the graph root and are billed against the app
        // scope; per-operation scopes still attribute sub-errors below.
        let envelope = ApiRequest::post("")
            .with_body(json!({ "batch": entries }))
            .with_scope(RateLimitScope::App);

        let response = match self.executor.execute(&envelope).await {
            Ok(response) => response,
            Err(error) => return vec![Err(error); chunk.len()],
        };

        let entries = match sub_responses(&response.body) {
            Some(entries) if entries.len() == chunk.len() => entries,
            Some(entries) => {
                let error = ApiError::validation(format!(
                    "batch response carried {} entries for {} operations",
                    entries.len(),
                    chunk.len()
                ));
                return vec![Err(error); chunk.len()];
            }
            None => {
                let error =
                    ApiError::validation("batch response body is not an operation array");
                return vec![Err(error); chunk.len()];
            }
        };

        entries
            .iter()
            .zip(chunk)
            .map(|(entry, request)| sub_result(entry, &request.scope))
            .collect()
    }
}

/// Platform-shaped batch entry for one request.
fn batch_entry(request: &ApiRequest) -> Value {
    let mut relative_url = request.path.clone();
    if !request.params.is_empty() {
        let encoded: String = url::form_urlencoded::Serializer::new(String::new())
            .extend_pairs(request.params.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .finish();
        relative_url.push('?');
        relative_url.push_str(&encoded);
    }

    let mut entry = json!({
        "method": request.method.as_str(),
        "relative_url": relative_url,
    });
    if let Some(body) = &request.body {
        entry["body"] = Value::String(body.to_string());
    }
    entry
}

/// Locate the per-operation array in a batch response body.
fn sub_responses(body: &Value) -> Option<&Vec<Value>> {
    body.as_array().or_else(|| body.get("responses").and_then(Value::as_array))
}

/// Outcome of a single operation inside a successful batch envelope.
fn sub_result(entry: &Value, scope: &RateLimitScope) -> Result<Value, ApiError> {
    if entry.is_null() {
        // The platform nulls entries it gave up on; worth another try.
        return Err(ApiError::network("batch entry returned no response"));
    }

    let status = entry
        .get("code")
        .or_else(|| entry.get("status"))
        .and_then(Value::as_u64)
        .map(|code| code as u16)
        .unwrap_or(200);

    let body = match entry.get("body") {
        // Sub-response bodies arrive as JSON text inside the envelope.
        Some(Value::String(text)) => {
            serde_json::from_str(text).unwrap_or_else(|_| Value::String(text.clone()))
        }
        Some(other) => other.clone(),
        None => Value::Null,
    };

    classify_http(status, &body, scope, None)?;
    Ok(body)
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use async_trait::async_trait;

    use adbridge_common::clock::MockClock;
    use adbridge_common::resilience::{Jitter, RetryConfig};
    use adbridge_domain::AccountId;

    use super::*;
    use crate::api::executor::{ApiTransport, ExecutorConfig, RawResponse, TransportError};
    use crate::auth::StaticTokenProvider;

    /// Answers batch envelopes from a scripted outcome queue; with an empty
    /// queue it echoes a 200 entry per submitted operation. Records the
    /// entry counts it saw either way.
    struct BatchTransport {
        script: Mutex<VecDeque<Result<Value, TransportError>>>,
        seen_sizes: Mutex<Vec<usize>>,
        calls: AtomicUsize,
    }

    impl BatchTransport {
        fn new(script: Vec<Result<Value, TransportError>>) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(script.into()),
                seen_sizes: Mutex::new(Vec::new()),
                calls: AtomicUsize::new(0),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }

        fn seen_sizes(&self) -> Vec<usize> {
            self.seen_sizes.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ApiTransport for BatchTransport {
        async fn send(
            &self,
            request: &ApiRequest,
            _access_token: &str,
        ) -> Result<RawResponse, TransportError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let entries = request
                .body
                .as_ref()
                .and_then(|b| b.get("batch"))
                .and_then(Value::as_array)
                .map(Vec::len)
                .unwrap_or(0);
            self.seen_sizes.lock().unwrap().push(entries);

            let scripted = self.script.lock().unwrap().pop_front();
            match scripted {
                Some(Ok(body)) => Ok(RawResponse { status: 200, body, headers: Vec::new() }),
                Some(Err(err)) => Err(err),
                None => {
                    let echoed: Vec<Value> = (0..entries)
                        .map(|i| json!({"code": 200, "body": json!({"i": i}).to_string()}))
                        .collect();
                    Ok(RawResponse { status: 200, body: Value::Array(echoed), headers: Vec::new() })
                }
            }
        }
    }

    fn no_retry_config() -> ExecutorConfig {
        ExecutorConfig {
            retry: RetryConfig {
                max_attempts: 0,
                base_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(1),
                jitter: Jitter::None,
            },
            ..ExecutorConfig::default()
        }
    }

    fn batch_executor(
        transport: Arc<BatchTransport>,
        config: BatchConfig,
    ) -> BatchExecutor<MockClock> {
        let executor = RequestExecutor::with_clock(
            transport,
            Arc::new(StaticTokenProvider::new("test-token")),
            no_retry_config(),
            MockClock::new(),
        );
        BatchExecutor::new(Arc::new(executor), config)
    }

    fn entry_ok(body: Value) -> Value {
        json!({"code": 200, "body": body.to_string()})
    }

    #[tokio::test]
    async fn splits_into_platform_sized_chunks() {
        let transport = BatchTransport::new(Vec::new());
        // Empty script puts the transport in echo mode.
        let config = BatchConfig {
            max_batch_size: MAX_BATCH_SIZE,
            inter_batch_delay: Duration::from_millis(1),
        };
        let batch = batch_executor(Arc::clone(&transport), config);

        let requests: Vec<ApiRequest> =
            (0..120).map(|i| ApiRequest::get(format!("act_1/campaigns/{i}"))).collect();
        let outcome = batch.run(requests).await;

        assert_eq!(transport.calls(), 3);
        assert_eq!(transport.seen_sizes(), vec![50, 50, 20]);
        assert_eq!(outcome.len(), 120);
        assert_eq!(outcome.success_count(), 120);
    }

    #[tokio::test]
    async fn results_align_with_request_positions() {
        let body = Value::Array(vec![
            entry_ok(json!({"id": "c1"})),
            json!({
                "code": 500,
                "body": json!({"error": {"message": "upstream hiccup"}}).to_string(),
            }),
            entry_ok(json!({"id": "c3"})),
        ]);
        let transport = BatchTransport::new(vec![Ok(body)]);
        let batch = batch_executor(Arc::clone(&transport), BatchConfig::default());

        let requests = vec![
            ApiRequest::get("act_1/campaigns/c1"),
            ApiRequest::get("act_1/campaigns/c2"),
            ApiRequest::get("act_1/campaigns/c3"),
        ];
        let outcome = batch.run(requests).await;

        assert_eq!(outcome.len(), 3);
        assert_eq!(outcome.results[0].as_ref().unwrap()["id"], "c1");
        assert!(matches!(
            outcome.results[1],
            Err(ApiError::TransientServer { status: 500, .. })
        ));
        assert_eq!(outcome.results[2].as_ref().unwrap()["id"], "c3");
        assert_eq!(outcome.success_count(), 2);
        assert_eq!(outcome.failure_count(), 1);
    }

    #[tokio::test]
    async fn chunk_failure_marks_every_position_in_that_chunk() {
        // Chunk size 2 over 3 requests: chunks of 2 and 1. The first batch
        // call fails at transport level; the second succeeds.
        let transport = BatchTransport::new(vec![
            Err(TransportError::Network("connection reset".into())),
            Ok(Value::Array(vec![entry_ok(json!({"id": "late"}))])),
        ]);
        let config = BatchConfig { max_batch_size: 2, inter_batch_delay: Duration::ZERO };
        let batch = batch_executor(Arc::clone(&transport), config);

        let requests = vec![
            ApiRequest::get("act_1/a"),
            ApiRequest::get("act_1/b"),
            ApiRequest::get("act_1/c"),
        ];
        let outcome = batch.run(requests).await;

        assert!(matches!(outcome.results[0], Err(ApiError::Network { .. })));
        assert!(matches!(outcome.results[1], Err(ApiError::Network { .. })));
        assert_eq!(outcome.results[2].as_ref().unwrap()["id"], "late");
    }

    #[tokio::test]
    async fn null_entries_become_retryable_errors() {
        let body = Value::Array(vec![entry_ok(json!({"ok": true})), Value::Null]);
        let transport = BatchTransport::new(vec![Ok(body)]);
        let batch = batch_executor(Arc::clone(&transport), BatchConfig::default());

        let outcome = batch
            .run(vec![ApiRequest::get("act_1/a"), ApiRequest::get("act_1/b")])
            .await;

        assert!(outcome.results[0].is_ok());
        match &outcome.results[1] {
            Err(error) => assert!(error.is_retryable()),
            Ok(_) => panic!("null entry must fail"),
        }
    }

    #[tokio::test]
    async fn entry_count_mismatch_fails_the_chunk() {
        let body = Value::Array(vec![entry_ok(json!({"only": 1}))]);
        let transport = BatchTransport::new(vec![Ok(body)]);
        let batch = batch_executor(Arc::clone(&transport), BatchConfig::default());

        let outcome = batch
            .run(vec![ApiRequest::get("act_1/a"), ApiRequest::get("act_1/b")])
            .await;

        assert_eq!(outcome.failure_count(), 2);
        for result in &outcome.results {
            assert!(matches!(result, Err(ApiError::Validation { .. })));
        }
    }

    #[tokio::test]
    async fn sub_errors_attribute_to_the_operation_scope() {
        let body = Value::Array(vec![json!({
            "code": 429,
            "body": json!({"error": {"message": "limit", "code": 17}}).to_string(),
        })]);
        let transport = BatchTransport::new(vec![Ok(body)]);
        let batch = batch_executor(Arc::clone(&transport), BatchConfig::default());

        let scope = RateLimitScope::Account(AccountId::new("act_7"));
        let outcome =
            batch.run(vec![ApiRequest::get("act_7/ads").with_scope(scope)]).await;

        match &outcome.results[0] {
            Err(ApiError::QuotaExceeded { scope, .. }) => assert_eq!(scope, "account:act_7"),
            other => panic!("expected quota error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn empty_input_is_a_no_op() {
        let transport = BatchTransport::new(Vec::new());
        let batch = batch_executor(Arc::clone(&transport), BatchConfig::default());

        let outcome = batch.run(Vec::new()).await;

        assert!(outcome.is_empty());
        assert_eq!(transport.calls(), 0);
    }

    #[test]
    fn config_rejects_oversized_chunks() {
        assert!(BatchConfig::builder().max_batch_size(0).build().is_err());
        assert!(BatchConfig::builder().max_batch_size(MAX_BATCH_SIZE + 1).build().is_err());
        assert!(BatchConfig::builder().max_batch_size(MAX_BATCH_SIZE).build().is_ok());
    }

    #[test]
    fn entries_carry_encoded_urls_and_bodies() {
        let request = ApiRequest::post("act_1/campaigns")
            .with_param("fields", "id,name")
            .with_body(json!({"name": "Summer Sale"}));
        let entry = batch_entry(&request);

        assert_eq!(entry["method"], "POST");
        assert_eq!(entry["relative_url"], "act_1/campaigns?fields=id%2Cname");
        let inner: Value = serde_json::from_str(entry["body"].as_str().unwrap()).unwrap();
        assert_eq!(inner["name"], "Summer Sale");
    }
}
