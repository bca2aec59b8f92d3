//! Platform API access
//!
//! Everything that talks to the ads platform lives here, layered around a
//! single [`RequestExecutor`]:
//!
//! - [`executor`] — the resilient call pipeline and error classification
//! - [`batch`] — chunked multi-operation calls
//! - [`paginator`] — cursor-following page streams
//! - [`usage`] — authoritative quota readings from response headers

pub mod batch;
pub mod executor;
pub mod paginator;
pub mod usage;

pub use batch::{BatchConfig, BatchExecutor, BatchOutcome};
pub use executor::{
    ApiTransport, ExecutorConfig, HttpTransport, RawResponse, RequestExecutor, TransportError,
};
pub use paginator::{Page, PageConfig, Paginator};
