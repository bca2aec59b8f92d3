//! Popup-driven authorization flow
//!
//! [`OAuthPopupCoordinator`] runs the authorization-code flow through a
//! separate window: it builds the authorization URL (state + PKCE), opens
//! the popup through a [`PopupHost`], waits for the structured callback
//! message, validates origin and state, and exchanges the code for tokens
//! through the shared executor. The flow resolves exactly once — success,
//! provider error, window closed, timeout, or caller cancellation — and the
//! popup is closed on every one of those paths.
//!
//! The window layer itself stays behind [`PopupHost`] so desktop shells and
//! tests plug in the same way.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use adbridge_common::auth::{
    generate_state, validate_state, OAuthConfig, PkceChallenge, TokenResponse, TokenSet,
};
use adbridge_common::clock::{Clock, SystemClock};
use adbridge_domain::constants::DEFAULT_OAUTH_TIMEOUT_SECS;
use adbridge_domain::{ApiError, ApiRequest};

use crate::api::RequestExecutor;

const EVENT_CHANNEL_CAPACITY: usize = 16;

/// Lifecycle notifications emitted while an authorization flow runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthEvent {
    /// The flow started and the authorization URL was built.
    FlowStarted,
    /// The popup window is open and listening.
    PopupOpened,
    /// Tokens were received and the flow succeeded.
    TokensReceived,
    /// The flow ended without tokens.
    FlowFailed {
        /// Human-readable failure cause
        reason: String,
    },
}

/// Structured payload of a cross-window callback message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum CallbackPayload {
    /// The provider redirected back with an authorization code.
    #[serde(rename = "SUCCESS")]
    Success {
        /// Authorization code to exchange for tokens
        code: String,
        /// Anti-forgery state echoed by the provider
        state: String,
    },
    /// The provider reported a failure or the user declined.
    #[serde(rename = "ERROR")]
    Error {
        /// Provider error code
        error: String,
        /// Optional human-readable description
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error_description: Option<String>,
    },
}

/// A callback message as delivered by the window layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallbackMessage {
    /// Origin of the window that posted the message
    pub origin: String,
    /// Decoded message payload
    pub payload: CallbackPayload,
}

/// Window-layer port for the authorization popup.
///
/// `open` returns the channel on which callback messages for this popup
/// session arrive; the host drops the sender when the window closes without
/// delivering a message.
#[async_trait]
pub trait PopupHost: Send + Sync {
    /// Open the popup at `url` and start forwarding its messages.
    async fn open(&self, url: &str) -> Result<mpsc::Receiver<CallbackMessage>, ApiError>;

    /// Close the popup if it is still open. Idempotent.
    async fn close(&self);
}

/// Drives the authorization-code flow through a popup window.
pub struct OAuthPopupCoordinator<C = SystemClock>
where
    C: Clock + Clone,
{
    executor: Arc<RequestExecutor<C>>,
    config: OAuthConfig,
    timeout: Duration,
    events: broadcast::Sender<AuthEvent>,
}

impl<C> OAuthPopupCoordinator<C>
where
    C: Clock + Clone,
{
    /// Coordinator exchanging codes through `executor` using `config`'s
    /// endpoints, with the default five-minute flow timeout.
    pub fn new(executor: Arc<RequestExecutor<C>>, config: OAuthConfig) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            executor,
            config,
            timeout: Duration::from_secs(DEFAULT_OAUTH_TIMEOUT_SECS),
            events,
        }
    }

    /// Override the end-to-end flow timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Subscribe to lifecycle events for flows run by this coordinator.
    pub fn events(&self) -> broadcast::Receiver<AuthEvent> {
        self.events.subscribe()
    }

    /// Run one authorization flow to completion.
    ///
    /// # Errors
    ///
    /// [`ApiError::Auth`] describing the failure: provider error payload,
    /// state mismatch, window closed, or timeout.
    pub async fn authorize(&self, host: &dyn PopupHost) -> Result<TokenSet, ApiError> {
        let never = CancellationToken::new();
        self.authorize_with_cancel(host, &never).await
    }

    /// Run one authorization flow, abandoning it when `cancel` fires.
    ///
    /// The popup is closed before this returns, on every path.
    ///
    /// # Errors
    ///
    /// As [`Self::authorize`], plus [`ApiError::Auth`] on cancellation.
    pub async fn authorize_with_cancel(
        &self,
        host: &dyn PopupHost,
        cancel: &CancellationToken,
    ) -> Result<TokenSet, ApiError> {
        let result = self.run_flow(host, cancel).await;
        host.close().await;

        match &result {
            Ok(_) => {
                info!("authorization flow succeeded");
                let _ = self.events.send(AuthEvent::TokensReceived);
            }
            Err(error) => {
                warn!(error = %error, "authorization flow failed");
                let _ = self.events.send(AuthEvent::FlowFailed { reason: error.to_string() });
            }
        }
        result
    }

    async fn run_flow(
        &self,
        host: &dyn PopupHost,
        cancel: &CancellationToken,
    ) -> Result<TokenSet, ApiError> {
        let expected_origin = self.config.origin().map_err(ApiError::config)?;
        let challenge = PkceChallenge::generate();
        let state = generate_state();
        let url = self.config.authorization_url(&state, &challenge).map_err(ApiError::config)?;

        let _ = self.events.send(AuthEvent::FlowStarted);
        info!("starting authorization flow");

        let mut messages = host.open(&url).await?;
        let _ = self.events.send(AuthEvent::PopupOpened);

        let waited = tokio::select! {
            _ = cancel.cancelled() => Err(ApiError::auth("authorization cancelled")),
            outcome = tokio::time::timeout(
                self.timeout,
                wait_for_callback(&mut messages, &expected_origin, &state),
            ) => match outcome {
                Ok(inner) => inner,
                Err(_) => Err(ApiError::auth(format!(
                    "authorization timed out after {}s",
                    self.timeout.as_secs()
                ))),
            },
        };

        let code = waited?;
        self.exchange_code(&code, challenge.verifier()).await
    }

    /// Exchange the authorization code through the resilient executor.
    async fn exchange_code(&self, code: &str, verifier: &str) -> Result<TokenSet, ApiError> {
        debug!("exchanging authorization code for tokens");
        let request = ApiRequest::post(self.config.token_endpoint.clone())
            .with_param("grant_type", "authorization_code")
            .with_param("client_id", self.config.client_id.clone())
            .with_param("redirect_uri", self.config.redirect_uri.clone())
            .with_param("code", code)
            .with_param("code_verifier", verifier);

        let response = self.executor.execute(&request).await.map_err(|error| match error {
            auth @ ApiError::Auth { .. } => auth,
            other => ApiError::auth(format!("token exchange failed: {other}")),
        })?;

        let token_response: TokenResponse = serde_json::from_value(response.body)
            .map_err(|e| ApiError::auth(format!("undecodable token response: {e}")))?;
        Ok(token_response.into_token_set(Utc::now()))
    }
}

/// Wait for the first trustworthy terminal message.
///
/// Messages from other origins are ignored and the wait continues; a closed
/// channel means the window went away without answering.
async fn wait_for_callback(
    messages: &mut mpsc::Receiver<CallbackMessage>,
    expected_origin: &str,
    expected_state: &str,
) -> Result<String, ApiError> {
    loop {
        let Some(message) = messages.recv().await else {
            return Err(ApiError::auth("authorization window closed before completing"));
        };

        if message.origin != expected_origin {
            warn!(origin = %message.origin, "ignoring callback message from unexpected origin");
            continue;
        }

        match message.payload {
            CallbackPayload::Success { code, state } => {
                if !validate_state(expected_state, &state) {
                    return Err(ApiError::auth("state mismatch in authorization callback"));
                }
                return Ok(code);
            }
            CallbackPayload::Error { error, error_description } => {
                let detail =
                    error_description.unwrap_or_else(|| "authorization rejected".to_string());
                return Err(ApiError::auth(format!("authorization failed: {error}: {detail}")));
            }
        }
    }
}
