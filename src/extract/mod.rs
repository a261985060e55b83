//! Extraction of contract records from the remote site
//!
//! The orchestrator only sees the collaborator traits in [`traits`]. The
//! production implementation is [`FpdsClient`], which fetches pages with
//! `reqwest` and parses them with `scraper`.
//!
//! # Components
//!
//! - `types`: queries and record types
//! - `traits`: `TotalRecordCounter`, `PageExtractor`, `DetailExtractor`
//! - `fetcher`: the HTTP client
//! - `parser`: search, count and detail page parsers
//! - `selector`: configurable `[[detail-field]]` rules

mod fetcher;
mod parser;
mod selector;
mod traits;
mod types;

pub use fetcher::{build_http_client, FpdsClient};
pub use parser::{
    clean_field_name, parse_detail_page, parse_search_page, parse_total_count, parse_view_link,
};
pub use selector::{apply_rules, Extraction, FieldRule, Transform};
pub use traits::{DetailExtractor, PageExtractor, TotalRecordCounter};
pub use types::{DateRange, DetailMap, DetailReference, ExtractedRecord, RawRecord, SearchQuery};
