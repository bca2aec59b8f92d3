//! # AdBridge Domain
//!
//! Domain types and the unified error taxonomy for the AdBridge integration
//! core.
//!
//! This crate contains:
//! - Request/response and quota-scope types (`ApiRequest`, `RateLimitScope`)
//! - The error taxonomy every component speaks (`ApiError`)
//! - Platform limits and well-known keys
//!
//! ## Architecture
//! - No dependencies on other AdBridge crates
//! - Only external dependencies allowed
//! - Pure domain models and data structures

pub mod constants;
pub mod errors;
pub mod types;

// Re-export commonly used items
pub use errors::*;
pub use types::*;
