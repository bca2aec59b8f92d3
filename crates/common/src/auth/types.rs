//! OAuth token and provider configuration types

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use url::Url;

use super::pkce::PkceChallenge;

/// Tokens obtained from a completed authorization flow.
///
/// `Debug` redacts both token values; log the expiry and scopes instead.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenSet {
    /// Bearer token attached to API calls
    pub access_token: String,
    /// Long-lived token for refreshing the access token, when granted
    pub refresh_token: Option<String>,
    /// Token type as reported by the provider, normally `Bearer`
    pub token_type: String,
    /// Absolute expiry instant, when the provider reported a lifetime
    pub expires_at: Option<DateTime<Utc>>,
    /// Scopes actually granted
    pub scopes: Vec<String>,
}

impl TokenSet {
    /// Token set carrying only an access token.
    pub fn new(access_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token: None,
            token_type: "Bearer".to_string(),
            expires_at: None,
            scopes: Vec::new(),
        }
    }

    /// True once the token is within `threshold` of its expiry (or past
    /// it), measured at `now`. Tokens without a reported expiry never count
    /// as expired.
    pub fn is_expired(&self, now: DateTime<Utc>, threshold: Duration) -> bool {
        match self.expires_at {
            Some(expires_at) => {
                let remaining = expires_at.signed_duration_since(now);
                remaining.num_seconds() <= threshold.as_secs() as i64
            }
            None => false,
        }
    }

    /// Whether a refresh is possible without user interaction.
    pub fn can_refresh(&self) -> bool {
        self.refresh_token.is_some()
    }
}

impl fmt::Debug for TokenSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenSet")
            .field("access_token", &"[REDACTED]")
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "[REDACTED]"))
            .field("token_type", &self.token_type)
            .field("expires_at", &self.expires_at)
            .field("scopes", &self.scopes)
            .finish()
    }
}

/// Token endpoint response as the provider sends it.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenResponse {
    /// Bearer token
    pub access_token: String,
    /// Token type, defaulting to `Bearer` when omitted
    #[serde(default)]
    pub token_type: Option<String>,
    /// Lifetime in seconds from now
    #[serde(default)]
    pub expires_in: Option<i64>,
    /// Refresh token, when the provider grants one
    #[serde(default)]
    pub refresh_token: Option<String>,
    /// Space-separated granted scopes
    #[serde(default)]
    pub scope: Option<String>,
}

impl TokenResponse {
    /// Resolve the wire response into a [`TokenSet`], anchoring the relative
    /// `expires_in` at `now`.
    pub fn into_token_set(self, now: DateTime<Utc>) -> TokenSet {
        let expires_at = self
            .expires_in
            .and_then(|seconds| chrono::Duration::try_seconds(seconds).map(|d| now + d));
        let scopes = self
            .scope
            .map(|s| s.split_whitespace().map(str::to_string).collect())
            .unwrap_or_default();
        TokenSet {
            access_token: self.access_token,
            refresh_token: self.refresh_token,
            token_type: self.token_type.unwrap_or_else(|| "Bearer".to_string()),
            expires_at,
            scopes,
        }
    }
}

/// Error payload the provider returns instead of tokens.
#[derive(Debug, Clone, Deserialize)]
pub struct OAuthProviderError {
    /// Machine-readable error code, e.g. `access_denied`
    pub error: String,
    /// Human-readable detail, when present
    #[serde(default)]
    pub error_description: Option<String>,
}

impl fmt::Display for OAuthProviderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.error_description {
            Some(description) => write!(f, "{}: {description}", self.error),
            None => write!(f, "{}", self.error),
        }
    }
}

/// Provider endpoints and client registration for one OAuth app.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OAuthConfig {
    /// Registered client identifier
    pub client_id: String,
    /// Authorization (popup) endpoint
    pub auth_endpoint: String,
    /// Code-for-token exchange endpoint
    pub token_endpoint: String,
    /// Redirect URI the popup lands on
    pub redirect_uri: String,
    /// Scopes to request
    pub scopes: Vec<String>,
    /// Origin callback messages must carry; derived from `redirect_uri`
    /// when unset
    #[serde(default)]
    pub expected_origin: Option<String>,
}

impl OAuthConfig {
    /// Origin that callback messages must match.
    pub fn origin(&self) -> Result<String, String> {
        if let Some(origin) = &self.expected_origin {
            return Ok(origin.clone());
        }
        let url = Url::parse(&self.redirect_uri)
            .map_err(|e| format!("invalid redirect_uri: {e}"))?;
        Ok(url.origin().ascii_serialization())
    }

    /// Full authorization URL for one attempt, carrying the state and PKCE
    /// challenge.
    pub fn authorization_url(
        &self,
        state: &str,
        challenge: &PkceChallenge,
    ) -> Result<String, String> {
        let mut url =
            Url::parse(&self.auth_endpoint).map_err(|e| format!("invalid auth_endpoint: {e}"))?;
        url.query_pairs_mut()
            .append_pair("response_type", "code")
            .append_pair("client_id", &self.client_id)
            .append_pair("redirect_uri", &self.redirect_uri)
            .append_pair("scope", &self.scopes.join(" "))
            .append_pair("state", state)
            .append_pair("code_challenge", challenge.challenge())
            .append_pair("code_challenge_method", PkceChallenge::method());
        Ok(url.into())
    }

    /// Reject configurations that cannot complete a flow.
    pub fn validate(&self) -> Result<(), String> {
        if self.client_id.is_empty() {
            return Err("client_id must not be empty".to_string());
        }
        Url::parse(&self.auth_endpoint).map_err(|e| format!("invalid auth_endpoint: {e}"))?;
        Url::parse(&self.token_endpoint).map_err(|e| format!("invalid token_endpoint: {e}"))?;
        Url::parse(&self.redirect_uri).map_err(|e| format!("invalid redirect_uri: {e}"))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    //! Unit tests for auth::types.
    use super::*;

    fn config() -> OAuthConfig {
        OAuthConfig {
            client_id: "client-1".to_string(),
            auth_endpoint: "https://auth.example.com/oauth/authorize".to_string(),
            token_endpoint: "https://auth.example.com/oauth/token".to_string(),
            redirect_uri: "https://app.example.com/callback".to_string(),
            scopes: vec!["ads.read".to_string(), "ads.write".to_string()],
            expected_origin: None,
        }
    }

    /// Validates `TokenSet::is_expired` behavior for the expiry threshold
    /// scenario.
    ///
    /// Assertions:
    /// - Confirms a token far from expiry is not expired.
    /// - Confirms a token inside the threshold counts as expired.
    /// - Confirms a token without expiry never counts as expired.
    #[test]
    fn expiry_respects_threshold() {
        let now = Utc::now();
        let mut tokens = TokenSet::new("at");
        tokens.expires_at = Some(now + chrono::Duration::seconds(600));

        assert!(!tokens.is_expired(now, Duration::from_secs(60)));
        assert!(tokens.is_expired(now, Duration::from_secs(600)));

        tokens.expires_at = None;
        assert!(!tokens.is_expired(now, Duration::from_secs(600)));
    }

    #[test]
    fn token_response_resolves_relative_expiry() {
        let now = Utc::now();
        let response = TokenResponse {
            access_token: "at".to_string(),
            token_type: None,
            expires_in: Some(3600),
            refresh_token: Some("rt".to_string()),
            scope: Some("ads.read ads.write".to_string()),
        };

        let tokens = response.into_token_set(now);
        assert_eq!(tokens.token_type, "Bearer");
        assert_eq!(tokens.expires_at, Some(now + chrono::Duration::seconds(3600)));
        assert_eq!(tokens.scopes, vec!["ads.read", "ads.write"]);
        assert!(tokens.can_refresh());
    }

    #[test]
    fn debug_redacts_token_values() {
        let mut tokens = TokenSet::new("super-secret-access");
        tokens.refresh_token = Some("super-secret-refresh".to_string());

        let debug = format!("{tokens:?}");
        assert!(!debug.contains("super-secret"));
        assert!(debug.contains("[REDACTED]"));
    }

    /// Validates `OAuthConfig::authorization_url` behavior for the canonical
    /// query parameters scenario.
    ///
    /// Assertions:
    /// - Confirms state, client, PKCE challenge and method all land in the
    ///   query string.
    #[test]
    fn authorization_url_carries_flow_parameters() {
        let challenge = PkceChallenge::generate();
        let url = config().authorization_url("state-123", &challenge).unwrap();

        assert!(url.starts_with("https://auth.example.com/oauth/authorize?"));
        assert!(url.contains("response_type=code"));
        assert!(url.contains("client_id=client-1"));
        assert!(url.contains("state=state-123"));
        assert!(url.contains(&format!("code_challenge={}", challenge.challenge())));
        assert!(url.contains("code_challenge_method=S256"));
        assert!(url.contains("scope=ads.read+ads.write"));
    }

    #[test]
    fn origin_derives_from_redirect_uri() {
        assert_eq!(config().origin().unwrap(), "https://app.example.com");

        let mut explicit = config();
        explicit.expected_origin = Some("https://other.example.com".to_string());
        assert_eq!(explicit.origin().unwrap(), "https://other.example.com");
    }

    #[test]
    fn validate_rejects_bad_endpoints() {
        let mut bad = config();
        bad.auth_endpoint = "not a url".to_string();
        assert!(bad.validate().is_err());

        let mut empty_client = config();
        empty_client.client_id = String::new();
        assert!(empty_client.validate().is_err());

        assert!(config().validate().is_ok());
    }
}
