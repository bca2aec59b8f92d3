//! Cursor-following pagination
//!
//! [`Paginator`] turns a collection request into a lazy stream of pages,
//! fetching each page through the shared [`RequestExecutor`] and following
//! whatever cursor the platform hands back. Two envelope shapes are
//! recognized; anything else is treated as "no more pages" rather than an
//! error, so a malformed payload can never loop the stream forever. A hard
//! page cap backstops misbehaving endpoints that keep returning cursors.
//!
//! Streams are finite and single-use: dropping one mid-way keeps no server
//! state, and a fresh call to [`Paginator::pages`] starts over from the
//! first page.

use std::sync::Arc;

use futures::stream::{self, Stream, StreamExt};
use serde_json::Value;
use tracing::{debug, warn};

use adbridge_common::clock::{Clock, SystemClock};
use adbridge_common::resilience::{ConfigError, ConfigResult};
use adbridge_domain::constants::{DEFAULT_MAX_PAGES, DEFAULT_PAGE_LIMIT};
use adbridge_domain::{ApiError, ApiRequest};

use super::executor::RequestExecutor;

/// Page size and safety cap for one pagination run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageConfig {
    /// Items requested per page (the platform may return fewer)
    pub page_limit: u32,
    /// Hard cap on pages fetched per call to [`Paginator::pages`]
    pub max_pages: u32,
}

impl Default for PageConfig {
    fn default() -> Self {
        Self { page_limit: DEFAULT_PAGE_LIMIT, max_pages: DEFAULT_MAX_PAGES }
    }
}

impl PageConfig {
    /// Start building a pagination configuration.
    pub fn builder() -> PageConfigBuilder {
        PageConfigBuilder::default()
    }

    fn validate(&self) -> ConfigResult<()> {
        if self.page_limit == 0 {
            return Err(ConfigError::new("page_limit must be greater than 0"));
        }
        if self.max_pages == 0 {
            return Err(ConfigError::new("max_pages must be greater than 0"));
        }
        Ok(())
    }
}

/// Builder for [`PageConfig`].
#[derive(Debug, Default)]
pub struct PageConfigBuilder {
    config: PageConfig,
}

impl PageConfigBuilder {
    /// Items requested per page.
    pub fn page_limit(mut self, page_limit: u32) -> Self {
        self.config.page_limit = page_limit;
        self
    }

    /// Hard cap on pages fetched per call.
    pub fn max_pages(mut self, max_pages: u32) -> Self {
        self.config.max_pages = max_pages;
        self
    }

    /// Validate and produce the configuration.
    pub fn build(self) -> ConfigResult<PageConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

/// One fetched page of a collection.
#[derive(Debug, Clone, PartialEq)]
pub struct Page {
    /// Items in platform order
    pub items: Vec<Value>,
}

impl Page {
    /// Number of items on this page.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// True when the platform returned an empty page.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

enum Cursor {
    Start,
    Next(String),
    Done,
}

struct PageState<C>
where
    C: Clock + Clone,
{
    executor: Arc<RequestExecutor<C>>,
    spec: ApiRequest,
    cursor: Cursor,
    fetched: u32,
    config: PageConfig,
}

/// Streams collection pages through a shared executor.
pub struct Paginator<C = SystemClock>
where
    C: Clock + Clone,
{
    executor: Arc<RequestExecutor<C>>,
    config: PageConfig,
}

impl<C> Paginator<C>
where
    C: Clock + Clone,
{
    /// Paginator fetching through `executor`.
    pub fn new(executor: Arc<RequestExecutor<C>>, config: PageConfig) -> Self {
        Self { executor, config }
    }

    /// Lazy stream of pages for the collection described by `spec`.
    ///
    /// `spec`'s own params are preserved; `limit` and `after` are appended
    /// per fetch. The stream ends after the last recognized page, after the
    /// page cap, or after yielding the first error.
    pub fn pages(&self, spec: ApiRequest) -> impl Stream<Item = Result<Page, ApiError>> + Send {
        let state = PageState {
            executor: Arc::clone(&self.executor),
            spec,
            cursor: Cursor::Start,
            fetched: 0,
            config: self.config.clone(),
        };

        stream::unfold(state, |mut state| async move {
            if matches!(state.cursor, Cursor::Done) {
                return None;
            }
            if state.fetched >= state.config.max_pages {
                warn!(
                    pages = state.fetched,
                    path = %state.spec.path,
                    "page cap reached, ending pagination early"
                );
                return None;
            }

            let mut request = state
                .spec
                .clone()
                .with_param("limit", state.config.page_limit.to_string());
            if let Cursor::Next(after) = &state.cursor {
                request = request.with_param("after", after.clone());
            }

            match state.executor.execute(&request).await {
                Err(error) => {
                    state.cursor = Cursor::Done;
                    Some((Err(error), state))
                }
                Ok(response) => match parse_page(&response.body) {
                    Some((items, next)) => {
                        state.fetched += 1;
                        state.cursor = match next {
                            Some(cursor) => Cursor::Next(cursor),
                            None => Cursor::Done,
                        };
                        Some((Ok(Page { items }), state))
                    }
                    None => {
                        debug!(
                            path = %state.spec.path,
                            "unrecognized page envelope, treating as end of collection"
                        );
                        None
                    }
                },
            }
        })
    }

    /// Drain every page and flatten the items, failing on the first error.
    ///
    /// # Errors
    ///
    /// The first [`ApiError`] the underlying stream yields.
    pub async fn collect_all(&self, spec: ApiRequest) -> Result<Vec<Value>, ApiError> {
        let mut stream = std::pin::pin!(self.pages(spec));
        let mut items = Vec::new();
        while let Some(page) = stream.next().await {
            items.extend(page?.items);
        }
        Ok(items)
    }
}

/// Extract items and the next cursor from a recognized envelope.
///
/// Recognized shapes, in priority order:
/// 1. `{"data": [...], "next": "<cursor-or-url>"}` (top-level cursor)
/// 2. `{"data": [...], "paging": {"cursors": {"after": "..."}, "next": ...}}`
///    where the `after` cursor only counts while `paging.next` is present,
///    since the platform echoes a final `after` on the last page too.
///
/// Returns `None` for anything without a `data` array.
fn parse_page(body: &Value) -> Option<(Vec<Value>, Option<String>)> {
    let items = body.get("data")?.as_array()?.clone();

    let top_level = body.get("next").and_then(Value::as_str).map(cursor_from_token);
    let nested = body.get("paging").and_then(|paging| {
        paging.get("next")?;
        paging
            .get("cursors")
            .and_then(|cursors| cursors.get("after"))
            .and_then(Value::as_str)
            .map(str::to_string)
    });

    Some((items, top_level.or(nested)))
}

/// A top-level `next` may be a bare cursor or a full page URL; for a URL
/// the real cursor rides in its `after` query parameter.
fn cursor_from_token(token: &str) -> String {
    if let Ok(url) = url::Url::parse(token) {
        if let Some((_, after)) = url.query_pairs().find(|(name, _)| name == "after") {
            return after.into_owned();
        }
    }
    token.to_string()
}
