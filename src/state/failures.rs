//! Failed extraction attempts
//!
//! Every page or detail fetch that fails is tracked here with enough context
//! to be attempted again: the query it belonged to, the page number and, for
//! detail failures, the summary record waiting for its detail.

use crate::extract::{DateRange, RawRecord, SearchQuery};
use crate::state::lock_unpoisoned;
use crate::storage::{FailureSink, StorageResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Which stage of the pipeline failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FailureKind {
    /// A search result page could not be fetched or parsed
    #[serde(rename = "index")]
    IndexPage,
    /// A record's detail page could not be fetched or parsed
    #[serde(rename = "detail")]
    DetailPage,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::IndexPage => f.write_str("index"),
            Self::DetailPage => f.write_str("detail"),
        }
    }
}

/// One failed attempt, as persisted to the failure files
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailedRequest {
    #[serde(rename = "type")]
    pub kind: FailureKind,
    pub page_number: u64,
    pub date_range: DateRange,
    #[serde(default)]
    pub filters: BTreeMap<String, String>,
    pub timestamp: DateTime<Utc>,
    /// The record waiting for its detail; set for `DetailPage` only
    #[serde(default)]
    pub partial_record: Option<RawRecord>,
    #[serde(default)]
    pub error_info: Option<String>,
}

impl FailedRequest {
    pub fn new(
        kind: FailureKind,
        page_number: u64,
        query: &SearchQuery,
        partial_record: Option<RawRecord>,
        error_info: Option<String>,
    ) -> Self {
        Self {
            kind,
            page_number,
            date_range: query.date_range,
            filters: query.filters.clone(),
            timestamp: Utc::now(),
            partial_record: match kind {
                FailureKind::IndexPage => None,
                FailureKind::DetailPage => partial_record,
            },
            error_info,
        }
    }

    /// Rebuilds the query the failed attempt belonged to
    pub fn query(&self) -> SearchQuery {
        SearchQuery {
            date_range: self.date_range,
            filters: self.filters.clone(),
        }
    }
}

/// Counts of failed attempts per kind
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FailureCounts {
    pub index_page: usize,
    pub detail_page: usize,
}

impl FailureCounts {
    pub fn total(&self) -> usize {
        self.index_page + self.detail_page
    }

    fn of(requests: &[FailedRequest]) -> Self {
        requests.iter().fold(Self::default(), |mut counts, request| {
            match request.kind {
                FailureKind::IndexPage => counts.index_page += 1,
                FailureKind::DetailPage => counts.detail_page += 1,
            }
            counts
        })
    }
}

impl fmt::Display for FailureCounts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} index, {} detail (total: {})",
            self.index_page,
            self.detail_page,
            self.total()
        )
    }
}

/// Thread-safe list of failed attempts awaiting retry
#[derive(Debug, Default)]
pub struct FailureTracker {
    failed: Mutex<Vec<FailedRequest>>,
}

impl FailureTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds a tracker with previously persisted failures
    pub fn from_requests(requests: Vec<FailedRequest>) -> Self {
        Self {
            failed: Mutex::new(requests),
        }
    }

    /// Records a failed attempt
    ///
    /// # Arguments
    ///
    /// * `kind` - Index page or detail page
    /// * `page_number` - Page the attempt belonged to
    /// * `query` - Date range and filters of the run
    /// * `partial_record` - Summary record awaiting its detail (detail failures only)
    /// * `error_info` - Human-readable cause
    pub fn track(
        &self,
        kind: FailureKind,
        page_number: u64,
        query: &SearchQuery,
        partial_record: Option<RawRecord>,
        error_info: Option<String>,
    ) {
        self.push(FailedRequest::new(
            kind,
            page_number,
            query,
            partial_record,
            error_info,
        ));
    }

    /// Puts back a request whose retry failed again
    pub fn retrack(&self, mut request: FailedRequest, error_info: Option<String>) {
        request.timestamp = Utc::now();
        if error_info.is_some() {
            request.error_info = error_info;
        }
        self.push(request);
    }

    fn push(&self, request: FailedRequest) {
        let counts = {
            let mut failed = lock_unpoisoned(&self.failed);
            failed.push(request);
            FailureCounts::of(&failed)
        };
        tracing::info!("Failed requests tracked: {}", counts);
    }

    /// Atomically takes every tracked failure, leaving the tracker empty
    pub fn drain_for_retry(&self) -> Vec<FailedRequest> {
        std::mem::take(&mut *lock_unpoisoned(&self.failed))
    }

    pub fn count_by_kind(&self) -> FailureCounts {
        FailureCounts::of(&lock_unpoisoned(&self.failed))
    }

    pub fn len(&self) -> usize {
        lock_unpoisoned(&self.failed).len()
    }

    pub fn is_empty(&self) -> bool {
        lock_unpoisoned(&self.failed).is_empty()
    }

    /// Copy of the current list
    pub fn snapshot(&self) -> Vec<FailedRequest> {
        lock_unpoisoned(&self.failed).clone()
    }

    /// Writes the current failures through `sink`
    ///
    /// # Returns
    ///
    /// * `Ok(Some(path))` - Where the failures were written
    /// * `Ok(None)` - Nothing to persist
    /// * `Err(StorageError)` - The sink failed; the tracker keeps its contents
    pub fn persist(
        &self,
        sink: &dyn FailureSink,
        destination: &Path,
    ) -> StorageResult<Option<PathBuf>> {
        let failed = self.snapshot();
        if failed.is_empty() {
            return Ok(None);
        }
        let path = sink.persist(&failed, destination)?;
        tracing::info!(
            count = failed.len(),
            path = %path.display(),
            "Failed requests saved"
        );
        Ok(Some(path))
    }
}
