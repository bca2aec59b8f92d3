//! Resilient request executor
//!
//! [`RequestExecutor`] is the single gateway every platform call goes
//! through, and the single place raw transport outcomes become the
//! [`ApiError`] taxonomy. Per call it: resolves credentials, takes quota
//! for the request's scope, passes the scope's circuit breaker, performs
//! the call, classifies the outcome, and feeds the result back into the
//! breaker and the limiter (authoritative usage headers included).
//! Retryable failures loop through [`RetryPolicy`] with the platform's
//! reset hint stretching the computed backoff.
//!
//! Layers above (batch, pagination, scheduling) see classified errors only
//! and never touch transport details.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Url;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, instrument, warn};

use adbridge_common::clock::{Clock, SystemClock};
use adbridge_common::resilience::{
    BucketUsage, CircuitBreakerConfig, CircuitBreakerRegistry, CircuitState, QuotaBucketConfig,
    RateLimitError, RateLimiter, RateLimiterConfig, RetryConfig, RetryContext, RetryDecision,
    RetryPolicy,
};
use adbridge_domain::constants::{DEFAULT_APP_QUOTA, DEFAULT_QUOTA_WINDOW_SECS};
use adbridge_domain::{ApiError, ApiRequest, ApiResponse, HttpMethod, QuotaUsage, RateLimitScope};

use super::usage;
use crate::auth::CredentialsProvider;

/// Transport-level failure, before any HTTP status was produced.
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    /// The request did not complete within the client deadline.
    #[error("transport timeout")]
    Timeout,
    /// Connect, reset, DNS, or TLS failure.
    #[error("network failure: {0}")]
    Network(String),
    /// The response arrived but its body was not valid JSON.
    #[error("undecodable response body: {0}")]
    Decode(String),
    /// The request could not be constructed (bad path or parameters).
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

/// Raw HTTP outcome handed back by a transport, not yet classified.
#[derive(Debug, Clone)]
pub struct RawResponse {
    /// HTTP status code
    pub status: u16,
    /// Decoded JSON body, `Value::Null` when the body was empty
    pub body: Value,
    /// Response headers, names lowercased
    pub headers: Vec<(String, String)>,
}

/// Performs one HTTP call against the platform.
///
/// Implementations do transport only: no retries, no classification, no
/// quota accounting. That all belongs to [`RequestExecutor`].
#[async_trait]
pub trait ApiTransport: Send + Sync {
    /// Send `request` with `access_token` attached as a bearer credential.
    async fn send(
        &self,
        request: &ApiRequest,
        access_token: &str,
    ) -> Result<RawResponse, TransportError>;
}

/// reqwest-backed [`ApiTransport`].
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: Url,
}

impl HttpTransport {
    /// Transport rooted at `base_url` with a per-request deadline.
    ///
    /// # Errors
    ///
    /// [`ApiError::Config`] when the base URL is invalid or the client
    /// cannot be constructed.
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, ApiError> {
        let base_url = Url::parse(base_url)
            .map_err(|e| ApiError::config(format!("invalid base URL: {e}")))?;
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ApiError::config(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client, base_url })
    }
}

#[async_trait]
impl ApiTransport for HttpTransport {
    async fn send(
        &self,
        request: &ApiRequest,
        access_token: &str,
    ) -> Result<RawResponse, TransportError> {
        let url = self
            .base_url
            .join(&request.path)
            .map_err(|e| TransportError::InvalidRequest(format!("bad path: {e}")))?;

        let mut builder = match request.method {
            HttpMethod::Get => self.client.get(url),
            HttpMethod::Post => self.client.post(url),
            HttpMethod::Delete => self.client.delete(url),
        };
        // Anonymous calls (the token exchange) carry no Authorization header.
        if !access_token.is_empty() {
            builder = builder.bearer_auth(access_token);
        }
        if !request.params.is_empty() {
            builder = builder.query(&request.params);
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder.send().await.map_err(map_reqwest_error)?;
        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value.to_str().ok().map(|v| (name.as_str().to_ascii_lowercase(), v.to_string()))
            })
            .collect();

        let text = response.text().await.map_err(map_reqwest_error)?;
        let body = if text.trim().is_empty() {
            Value::Null
        } else {
            serde_json::from_str(&text).map_err(|e| TransportError::Decode(e.to_string()))?
        };

        Ok(RawResponse { status, body, headers })
    }
}

fn map_reqwest_error(err: reqwest::Error) -> TransportError {
    if err.is_timeout() {
        TransportError::Timeout
    } else {
        TransportError::Network(err.to_string())
    }
}

/// Resilience settings for one executor.
#[derive(Debug, Clone, Default)]
pub struct ExecutorConfig {
    /// Quota buckets and waiting behavior
    pub limiter: RateLimiterConfig,
    /// Breaker thresholds shared by every scope
    pub breaker: CircuitBreakerConfig,
    /// Backoff shape for retryable failures
    pub retry: RetryConfig,
}

impl ExecutorConfig {
    /// Settings tuned to the platform's documented hourly quotas.
    pub fn platform_defaults() -> Self {
        Self {
            limiter: RateLimiterConfig {
                default_bucket: QuotaBucketConfig::new(
                    DEFAULT_APP_QUOTA,
                    Duration::from_secs(DEFAULT_QUOTA_WINDOW_SECS),
                ),
                ..RateLimiterConfig::default()
            },
            breaker: CircuitBreakerConfig::default(),
            retry: RetryConfig::default(),
        }
    }
}

/// The resilient gateway for all platform calls.
///
/// Cheap to share behind an `Arc`; one executor instance owns the limiter
/// and breaker registries for the whole process so every caller sees the
/// same quota and health picture.
pub struct RequestExecutor<C = SystemClock>
where
    C: Clock + Clone,
{
    transport: Arc<dyn ApiTransport>,
    credentials: Arc<dyn CredentialsProvider>,
    limiter: RateLimiter<RateLimitScope, C>,
    breakers: CircuitBreakerRegistry<RateLimitScope, C>,
    retry: RetryPolicy,
    clock: C,
}

impl RequestExecutor {
    /// Executor on the system clock.
    pub fn new(
        transport: Arc<dyn ApiTransport>,
        credentials: Arc<dyn CredentialsProvider>,
        config: ExecutorConfig,
    ) -> Self {
        Self::with_clock(transport, credentials, config, SystemClock)
    }
}

impl<C> RequestExecutor<C>
where
    C: Clock + Clone,
{
    /// Executor on an explicit clock (tests use [`MockClock`]).
    ///
    /// [`MockClock`]: adbridge_common::clock::MockClock
    pub fn with_clock(
        transport: Arc<dyn ApiTransport>,
        credentials: Arc<dyn CredentialsProvider>,
        config: ExecutorConfig,
        clock: C,
    ) -> Self {
        Self {
            transport,
            credentials,
            limiter: RateLimiter::with_clock(config.limiter, clock.clone()),
            breakers: CircuitBreakerRegistry::with_clock(config.breaker, clock.clone()),
            retry: RetryPolicy::new(config.retry),
            clock,
        }
    }

    /// Execute `request` with quota, breaker, and retry protection.
    ///
    /// # Errors
    ///
    /// A classified [`ApiError`]: fatal failures immediately, retryable
    /// failures once the retry budget is exhausted, and
    /// [`ApiError::CircuitOpen`] without any network activity while the
    /// scope's breaker is open.
    #[instrument(skip_all, fields(method = %request.method, path = %request.path, scope = %request.scope))]
    pub async fn execute(&self, request: &ApiRequest) -> Result<ApiResponse, ApiError> {
        let mut context = RetryContext::new();
        loop {
            match self.attempt(request).await {
                Ok(response) => {
                    if context.attempt > 0 {
                        debug!(attempts = context.attempt + 1, "call succeeded after retries");
                    }
                    return Ok(response);
                }
                Err(error) => {
                    let decision =
                        self.retry.decide(error.is_retryable(), error.retry_after(), &context);
                    match decision {
                        RetryDecision::Retry { after } => {
                            warn!(
                                error = %error,
                                attempt = context.attempt + 1,
                                delay_ms = after.as_millis() as u64,
                                "retrying after transient failure"
                            );
                            context.record_attempt(error.category().as_str(), after);
                            tokio::time::sleep(after).await;
                        }
                        RetryDecision::Stop => return Err(error),
                    }
                }
            }
        }
    }

    /// One protected attempt: credentials, quota, breaker, call, classify,
    /// feedback.
    async fn attempt(&self, request: &ApiRequest) -> Result<ApiResponse, ApiError> {
        let token = self.credentials.access_token().await?;

        self.limiter.acquire(&request.scope).await.map_err(map_rate_limit_error)?;

        let breaker = self.breakers.breaker(&request.scope);
        breaker.try_acquire().map_err(|retry_after| ApiError::CircuitOpen {
            scope: request.scope.key(),
            retry_after_ms: retry_after.as_millis() as u64,
        })?;

        let started = Instant::now();
        let outcome = self.transport.send(request, &token).await;
        let latency_ms = started.elapsed().as_millis() as u64;

        let now = self.now();
        let quota = outcome
            .as_ref()
            .ok()
            .and_then(|raw| usage::extract_usage(&raw.headers, now));
        if let Some(reading) = &quota {
            let resets_in = reading
                .reset_at
                .and_then(|at| at.signed_duration_since(now).to_std().ok());
            self.limiter.resync(&request.scope, reading.used_pct, resets_in);
        }

        let result = classify(outcome, &request.scope, quota, latency_ms, now);
        match &result {
            Ok(response) => {
                breaker.record_success();
                debug!(status = response.status, latency_ms, "call succeeded");
            }
            Err(error) => {
                // Only upstream-health failures trip the breaker; an
                // answered 4xx proves the dependency is alive.
                if is_health_failure(error) {
                    breaker.record_failure();
                } else {
                    breaker.record_success();
                }
                debug!(error = %error, latency_ms, "call failed");
            }
        }
        result
    }

    /// Point-in-time quota usage for `scope`, if the scope has been seen.
    pub fn usage(&self, scope: &RateLimitScope) -> Option<BucketUsage> {
        self.limiter.usage(scope)
    }

    /// Current breaker state for `scope`.
    pub fn circuit_state(&self, scope: &RateLimitScope) -> CircuitState {
        self.breakers.state(scope)
    }

    /// Install a scope-specific quota ceiling.
    pub fn set_quota_ceiling(&self, scope: RateLimitScope, capacity: u32, window: Duration) {
        self.limiter.set_ceiling(scope, capacity, window);
    }

    fn now(&self) -> DateTime<Utc> {
        DateTime::<Utc>::from(self.clock.system_time())
    }
}

fn map_rate_limit_error(err: RateLimitError) -> ApiError {
    let retry_after_ms = err.retry_after().as_millis() as u64;
    let scope = match &err {
        RateLimitError::Exhausted { scope, .. }
        | RateLimitError::WaitLimitReached { scope, .. } => scope.clone(),
    };
    ApiError::QuotaExceeded { scope, retry_after_ms }
}

fn is_health_failure(error: &ApiError) -> bool {
    matches!(
        error,
        ApiError::TransientServer { .. } | ApiError::Network { .. } | ApiError::Timeout { .. }
    )
}

/// Turn a raw transport outcome into the error taxonomy.
fn classify(
    outcome: Result<RawResponse, TransportError>,
    scope: &RateLimitScope,
    quota: Option<QuotaUsage>,
    latency_ms: u64,
    now: DateTime<Utc>,
) -> Result<ApiResponse, ApiError> {
    match outcome {
        Ok(raw) => {
            let retry_after_hint = quota
                .as_ref()
                .and_then(|q| q.reset_at)
                .and_then(|at| at.signed_duration_since(now).to_std().ok());
            classify_http(raw.status, &raw.body, scope, retry_after_hint)?;
            Ok(ApiResponse { status: raw.status, body: raw.body, quota })
        }
        Err(TransportError::Timeout) => Err(ApiError::Timeout { elapsed_ms: latency_ms }),
        Err(TransportError::Network(message)) => Err(ApiError::Network { message }),
        Err(TransportError::Decode(message)) => {
            Err(ApiError::network(format!("response decode failed: {message}")))
        }
        Err(TransportError::InvalidRequest(message)) => Err(ApiError::Validation { message }),
    }
}

/// Platform error codes that mean "rate limited" regardless of HTTP status.
const RATE_LIMIT_CODES: &[i64] = &[4, 17, 32, 613];

/// Platform error codes that mean the token is invalid or expired.
const AUTH_CODES: &[i64] = &[102, 190];

/// Classify one HTTP status/body pair. Shared with batch sub-responses so
/// classification never happens anywhere else.
pub(crate) fn classify_http(
    status: u16,
    body: &Value,
    scope: &RateLimitScope,
    retry_after_hint: Option<Duration>,
) -> Result<(), ApiError> {
    if (200..300).contains(&status) {
        return Ok(());
    }

    let error = body.get("error");
    let code = error.and_then(|e| e.get("code")).and_then(Value::as_i64);
    let message = error
        .and_then(|e| e.get("message"))
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| format!("HTTP {status}"));

    if status == 401 || code.is_some_and(|c| AUTH_CODES.contains(&c)) {
        return Err(ApiError::Auth { message });
    }
    if status == 429 || code.is_some_and(|c| RATE_LIMIT_CODES.contains(&c)) {
        let retry_after_ms = retry_after_hint.map_or(0, |d| d.as_millis() as u64);
        return Err(ApiError::QuotaExceeded { scope: scope.key(), retry_after_ms });
    }
    if status == 403 || code.is_some_and(|c| c == 10 || (200..300).contains(&c)) {
        return Err(ApiError::Permission { message });
    }
    if status >= 500 {
        return Err(ApiError::TransientServer { status, message });
    }
    Err(ApiError::Validation { message })
}
