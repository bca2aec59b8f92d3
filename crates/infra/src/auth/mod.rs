//! Credentials and interactive authorization
//!
//! - [`providers`] — how outgoing calls obtain access tokens
//! - [`coordinator`] — the popup-driven authorization-code flow
//!
//! The refresh grant posts directly to the token endpoint (it runs inside
//! the executor's credential step); the interactive code exchange rides
//! through the executor like any other platform call.

pub mod coordinator;
pub mod providers;
mod token_endpoint;

pub use coordinator::{
    AuthEvent, CallbackMessage, CallbackPayload, OAuthPopupCoordinator, PopupHost,
};
pub use providers::{CredentialsProvider, StaticTokenProvider, VaultCredentialsProvider};
