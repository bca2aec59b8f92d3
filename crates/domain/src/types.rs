//! Request, response, and scope types shared across the integration core

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::ApiError;

/// Ad-account identifier as issued by the platform.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AccountId(String);

impl AccountId {
    /// Wrap a raw platform account id.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Raw id as handed out by the platform.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for AccountId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for AccountId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Quota partition the upstream API meters independently.
///
/// The platform tracks one window for the whole application, one per
/// authenticated user, and one per ad account. Breakers and rate-limit
/// buckets are keyed by this type so unrelated scopes never contend.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RateLimitScope {
    /// Application-wide quota window
    App,
    /// Authenticated-user quota window
    User,
    /// Per-ad-account quota window
    Account(AccountId),
}

impl RateLimitScope {
    /// Stable string key for registries and log fields.
    pub fn key(&self) -> String {
        match self {
            Self::App => "app".to_string(),
            Self::User => "user".to_string(),
            Self::Account(id) => format!("account:{id}"),
        }
    }
}

impl fmt::Display for RateLimitScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.key())
    }
}

/// HTTP verbs the platform API accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    /// Read a resource or collection
    Get,
    /// Create or mutate a resource
    Post,
    /// Remove a resource
    Delete,
}

impl HttpMethod {
    /// Wire representation of the verb.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Delete => "DELETE",
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A logical request to the platform API, independent of transport details.
///
/// `path` is relative to the configured API base URL (no leading slash).
/// Parameters ride as query string for GET/DELETE and are merged into the
/// JSON body for POST.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiRequest {
    /// HTTP verb
    pub method: HttpMethod,
    /// Path relative to the API base URL
    pub path: String,
    /// Query parameters in insertion order
    pub params: Vec<(String, String)>,
    /// Optional JSON body (POST only)
    pub body: Option<Value>,
    /// Quota scope this call is billed against
    pub scope: RateLimitScope,
}

impl ApiRequest {
    /// Build a GET request for `path` billed against the app scope.
    pub fn get(path: impl Into<String>) -> Self {
        Self::new(HttpMethod::Get, path)
    }

    /// Build a POST request for `path` billed against the app scope.
    pub fn post(path: impl Into<String>) -> Self {
        Self::new(HttpMethod::Post, path)
    }

    /// Build a DELETE request for `path` billed against the app scope.
    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(HttpMethod::Delete, path)
    }

    fn new(method: HttpMethod, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            params: Vec::new(),
            body: None,
            scope: RateLimitScope::App,
        }
    }

    /// Append a query parameter.
    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.push((key.into(), value.into()));
        self
    }

    /// Attach a JSON body.
    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    /// Bill this call against a specific scope instead of the app default.
    pub fn with_scope(mut self, scope: RateLimitScope) -> Self {
        self.scope = scope;
        self
    }
}

/// Normalized successful response from the platform.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiResponse {
    /// HTTP status code (always 2xx here)
    pub status: u16,
    /// Decoded JSON body; `Value::Null` for empty bodies
    pub body: Value,
    /// Authoritative quota reading extracted from response headers, if any
    pub quota: Option<QuotaUsage>,
}

impl ApiResponse {
    /// Decode the body into a concrete type.
    pub fn json<T: serde::de::DeserializeOwned>(&self) -> crate::errors::Result<T> {
        serde_json::from_value(self.body.clone())
            .map_err(|e| ApiError::validation(format!("response decode failed: {e}")))
    }
}

/// Authoritative quota reading the platform attaches to responses.
///
/// The platform reports consumption as a percentage of the current window
/// rather than absolute counts; buckets map the percentage back onto their
/// configured ceiling when resynchronizing.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct QuotaUsage {
    /// Percentage of the window consumed, 0.0 to 100.0 (may exceed 100 when
    /// the platform is already throttling)
    pub used_pct: f64,
    /// When the current window resets, if reported
    pub reset_at: Option<DateTime<Utc>>,
}

impl QuotaUsage {
    /// Reading with a consumption percentage and no reset hint.
    pub fn from_pct(used_pct: f64) -> Self {
        Self { used_pct, reset_at: None }
    }

    /// True once the platform reports the window as fully consumed.
    pub fn is_exhausted(&self) -> bool {
        self.used_pct >= 100.0
    }
}

/// What a sync job synchronizes: one collection of one ad account.
///
/// Jobs are keyed by target for conflict detection: two jobs with the same
/// target cover the same remote data and must not run concurrently.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SyncTarget {
    /// Ad account the data belongs to
    pub account: AccountId,
    /// Collection name within the account, e.g. `campaigns`
    pub collection: String,
}

impl SyncTarget {
    /// Target for `collection` under `account`.
    pub fn new(account: AccountId, collection: impl Into<String>) -> Self {
        Self { account, collection: collection.into() }
    }
}

impl fmt::Display for SyncTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.account, self.collection)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scope_keys_are_disjoint() {
        let app = RateLimitScope::App;
        let user = RateLimitScope::User;
        let acct = RateLimitScope::Account(AccountId::new("act_42"));

        assert_eq!(app.key(), "app");
        assert_eq!(user.key(), "user");
        assert_eq!(acct.key(), "account:act_42");
        assert_ne!(app, user);
        assert_ne!(user, acct);
    }

    #[test]
    fn request_builder_accumulates_params_in_order() {
        let req = ApiRequest::get("act_42/campaigns")
            .with_param("fields", "id,name,status")
            .with_param("limit", "100")
            .with_scope(RateLimitScope::Account(AccountId::new("act_42")));

        assert_eq!(req.method, HttpMethod::Get);
        assert_eq!(req.path, "act_42/campaigns");
        assert_eq!(req.params[0].0, "fields");
        assert_eq!(req.params[1], ("limit".to_string(), "100".to_string()));
        assert_eq!(req.scope.key(), "account:act_42");
    }

    #[test]
    fn response_json_decodes_into_concrete_type() {
        #[derive(serde::Deserialize)]
        struct Campaign {
            id: String,
        }

        let resp = ApiResponse {
            status: 200,
            body: serde_json::json!({"id": "123"}),
            quota: None,
        };

        let campaign: Campaign = resp.json().unwrap();
        assert_eq!(campaign.id, "123");
    }

    #[test]
    fn response_json_surfaces_validation_error_on_shape_mismatch() {
        let resp = ApiResponse { status: 200, body: serde_json::json!([1, 2, 3]), quota: None };
        let result: crate::errors::Result<std::collections::HashMap<String, String>> = resp.json();

        assert!(matches!(result, Err(ApiError::Validation { .. })));
    }

    #[test]
    fn quota_usage_exhaustion_threshold() {
        assert!(!QuotaUsage::from_pct(99.9).is_exhausted());
        assert!(QuotaUsage::from_pct(100.0).is_exhausted());
        assert!(QuotaUsage::from_pct(104.5).is_exhausted());
    }

    #[test]
    fn sync_targets_compare_by_account_and_collection() {
        let a = SyncTarget::new(AccountId::new("act_1"), "campaigns");
        let same = SyncTarget::new(AccountId::new("act_1"), "campaigns");
        let other = SyncTarget::new(AccountId::new("act_1"), "ad_groups");

        assert_eq!(a, same);
        assert_ne!(a, other);
        assert_eq!(a.to_string(), "act_1/campaigns");
    }
}
