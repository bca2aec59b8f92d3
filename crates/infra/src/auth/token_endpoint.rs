//! Direct token-endpoint client for the refresh grant
//!
//! Refresh happens inside the executor's credential step, so it cannot ride
//! through the executor itself; this small client posts the refresh grant
//! straight to the configured token endpoint. The interactive code exchange
//! does go through the executor (see the popup coordinator).

use std::time::Duration;

use chrono::Utc;
use tracing::debug;

use adbridge_common::auth::{OAuthConfig, OAuthProviderError, TokenResponse, TokenSet};
use adbridge_domain::ApiError;

const TOKEN_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Posts refresh grants to the OAuth token endpoint.
pub(crate) struct OAuthTokenClient {
    config: OAuthConfig,
    client: reqwest::Client,
}

impl OAuthTokenClient {
    pub(crate) fn new(config: OAuthConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(TOKEN_REQUEST_TIMEOUT)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self { config, client }
    }

    /// Exchange `refresh_token` for a fresh token set.
    ///
    /// # Errors
    ///
    /// [`ApiError::Auth`] for endpoint rejections and transport failures
    /// alike; a failed refresh always means re-authorization territory.
    pub(crate) async fn refresh(&self, refresh_token: &str) -> Result<TokenSet, ApiError> {
        if refresh_token.is_empty() {
            return Err(ApiError::auth("refresh token is empty"));
        }

        let params = [
            ("grant_type", "refresh_token"),
            ("client_id", self.config.client_id.as_str()),
            ("refresh_token", refresh_token),
        ];

        debug!(endpoint = %self.config.token_endpoint, "requesting token refresh");
        let response = self
            .client
            .post(&self.config.token_endpoint)
            .form(&params)
            .send()
            .await
            .map_err(|e| ApiError::auth(format!("token refresh request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let detail = match serde_json::from_str::<OAuthProviderError>(&body) {
                Ok(provider_error) => provider_error.to_string(),
                Err(_) => body,
            };
            return Err(ApiError::auth(format!("token refresh rejected ({status}): {detail}")));
        }

        let token_response: TokenResponse = response
            .json()
            .await
            .map_err(|e| ApiError::auth(format!("undecodable token response: {e}")))?;
        Ok(token_response.into_token_set(Utc::now()))
    }
}
