//! Authorization-flow building blocks
//!
//! Token types, provider configuration, and the PKCE/state parameters the
//! popup flow attaches to every authorization attempt. The flow itself
//! (popup lifecycle, callback messages, token exchange) lives in the infra
//! layer; this module only defines the pure pieces it composes.

pub mod pkce;
pub mod types;

pub use pkce::{
    generate_code_challenge, generate_code_verifier, generate_state, validate_state, PkceChallenge,
};
pub use types::{OAuthConfig, OAuthProviderError, TokenResponse, TokenSet};
