//! Collaborator interfaces used by the orchestrator
//!
//! Implementations talk to the remote site. Expected failures (network errors,
//! non-200 responses, unparsable pages) are returned as [`ExtractError`]
//! values, never as panics.
//!
//! [`ExtractError`]: crate::ExtractError

use crate::extract::{DetailMap, DetailReference, RawRecord, SearchQuery};
use crate::ExtractResult;
use async_trait::async_trait;

/// Estimates how many records match a query
#[async_trait]
pub trait TotalRecordCounter: Send + Sync {
    /// Returns the total matching record count, or `Ok(0)` when the site
    /// answered but the count could not be read
    async fn count(&self, query: &SearchQuery) -> ExtractResult<u64>;
}

/// Fetches one page of search results
#[async_trait]
pub trait PageExtractor: Send + Sync {
    /// Extracts the summary records on `page_index` (zero-based)
    ///
    /// Returned records carry `page == page_index` and their position on the page.
    async fn extract_page(&self, page_index: u64, query: &SearchQuery)
        -> ExtractResult<Vec<RawRecord>>;
}

/// Fetches the detail page behind a summary record
#[async_trait]
pub trait DetailExtractor: Send + Sync {
    async fn extract_detail(&self, reference: &DetailReference) -> ExtractResult<DetailMap>;
}
