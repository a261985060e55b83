//! Sizing and batch partitioning
//!
//! Turns a record target and the site's total count into a page count and a
//! list of contiguous page ranges, one per batch.

use serde::Serialize;
use std::ops::Range;

/// Everything decided before the first batch is dispatched
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HarvestPlan {
    /// Total matches reported by the site (0 if unknown)
    pub total_available: u64,
    /// Records the run aims for
    pub actual_target: u64,
    pub total_pages: u64,
    pub batch_size: u64,
    pub batches: Vec<Range<u64>>,
}

impl HarvestPlan {
    /// Builds the plan for a run
    ///
    /// # Arguments
    ///
    /// * `requested_target` - Records asked for by the operator
    /// * `total_available` - Count reported by the site, 0 if it could not be read
    /// * `records_per_page` - Records per search result page
    /// * `worker_count` - Size of the worker pool
    /// * `batch_target_multiplier` - Minimum batches per worker to aim for
    pub fn new(
        requested_target: u64,
        total_available: u64,
        records_per_page: u32,
        worker_count: u32,
        batch_target_multiplier: u32,
    ) -> Self {
        let actual_target = actual_target(requested_target, total_available);
        let total_pages = plan_pages(actual_target, records_per_page);
        let batch_size = optimal_batch_size(total_pages, worker_count, batch_target_multiplier);

        Self {
            total_available,
            actual_target,
            total_pages,
            batch_size,
            batches: plan_batches(total_pages, batch_size),
        }
    }
}

/// Clamps the requested target to what the site has, unless the count is unknown
pub fn actual_target(requested_target: u64, total_available: u64) -> u64 {
    if total_available > 0 {
        requested_target.min(total_available)
    } else {
        requested_target
    }
}

/// Number of pages needed to cover `target` records
pub fn plan_pages(target: u64, records_per_page: u32) -> u64 {
    target.div_ceil(u64::from(records_per_page.max(1)))
}

/// Pages per batch, chosen so there are at least `workers * multiplier` batches
///
/// The multiplier keeps the pool busy when page latency varies a lot; it is a
/// tuning knob, not a guarantee.
pub fn optimal_batch_size(total_pages: u64, worker_count: u32, batch_target_multiplier: u32) -> u64 {
    let desired_batches =
        u64::from(worker_count.max(1)) * u64::from(batch_target_multiplier.max(1));
    (total_pages / desired_batches).max(1)
}

/// Splits `[0, total_pages)` into contiguous ranges of `batch_size` pages
///
/// The last range is shorter when `total_pages` is not a multiple of
/// `batch_size`.
pub fn plan_batches(total_pages: u64, batch_size: u64) -> Vec<Range<u64>> {
    let batch_size = batch_size.max(1);
    (0..total_pages)
        .step_by(batch_size as usize)
        .map(|start| start..(start + batch_size).min(total_pages))
        .collect()
}
