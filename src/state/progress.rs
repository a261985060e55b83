use crate::state::lock_unpoisoned;
use serde::Serialize;
use std::sync::Mutex;
use std::time::{Duration, Instant};

#[derive(Debug)]
struct ProgressInner {
    total_processed: u64,
    current_page: u64,
    pages_done: u64,
}

/// Run-wide progress counters
///
/// Updated by every batch after each page; the target check and the counter
/// update happen under the same lock so exactly one page observes the
/// crossing of the target.
#[derive(Debug)]
pub struct ProgressState {
    total_pages: u64,
    target_records: u64,
    start_time: Instant,
    inner: Mutex<ProgressInner>,
}

/// Copy of the counters at one point in time
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ProgressSnapshot {
    pub total_processed: u64,
    pub current_page: u64,
    pub pages_done: u64,
    pub total_pages: u64,
    pub target_records: u64,
    pub elapsed: Duration,
}

impl ProgressSnapshot {
    pub fn records_per_second(&self) -> f64 {
        let seconds = self.elapsed.as_secs_f64();
        if seconds > 0.0 {
            self.total_processed as f64 / seconds
        } else {
            0.0
        }
    }

    pub fn target_reached(&self) -> bool {
        self.total_processed >= self.target_records
    }
}

impl ProgressState {
    /// Creates the progress state for one run
    ///
    /// # Arguments
    ///
    /// * `total_pages` - Pages planned for the run
    /// * `target_records` - Record count after which no new pages are started
    pub fn new(total_pages: u64, target_records: u64) -> Self {
        Self {
            total_pages,
            target_records,
            start_time: Instant::now(),
            inner: Mutex::new(ProgressInner {
                total_processed: 0,
                current_page: 0,
                pages_done: 0,
            }),
        }
    }

    /// Adds the records of one finished page
    ///
    /// # Returns
    ///
    /// `true` if the processed total has reached the target
    pub fn record_page(&self, page: u64, records: usize) -> bool {
        let snapshot = {
            let mut inner = lock_unpoisoned(&self.inner);
            inner.total_processed += records as u64;
            inner.current_page = inner.current_page.max(page + 1);
            inner.pages_done += 1;
            self.snapshot_of(&inner)
        };

        let page_pct = if snapshot.total_pages > 0 {
            snapshot.pages_done as f64 / snapshot.total_pages as f64 * 100.0
        } else {
            0.0
        };
        tracing::info!(
            records = snapshot.total_processed,
            target = snapshot.target_records,
            page = snapshot.current_page,
            total_pages = snapshot.total_pages,
            pages_pct = format!("{:.1}%", page_pct),
            rate = format!("{:.1} records/s", snapshot.records_per_second()),
            elapsed = ?snapshot.elapsed,
            "Progress"
        );

        snapshot.target_reached()
    }

    pub fn target_reached(&self) -> bool {
        lock_unpoisoned(&self.inner).total_processed >= self.target_records
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        let inner = lock_unpoisoned(&self.inner);
        self.snapshot_of(&inner)
    }

    fn snapshot_of(&self, inner: &ProgressInner) -> ProgressSnapshot {
        ProgressSnapshot {
            total_processed: inner.total_processed,
            current_page: inner.current_page,
            pages_done: inner.pages_done,
            total_pages: self.total_pages,
            target_records: self.target_records,
            elapsed: self.start_time.elapsed(),
        }
    }
}
