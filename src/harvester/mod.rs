//! Harvest orchestration
//!
//! This module contains the run driver:
//! - Sizing the result set and planning page batches
//! - Running batches on a bounded worker pool
//! - Retrying failed pages and details
//! - Handing the aggregate to storage

mod orchestrator;
mod plan;

pub use orchestrator::{
    Collaborators, ExtractionOrchestrator, HarvestReport, HarvestSettings, RetryTally, StopHandle,
};
pub use plan::{actual_target, optimal_batch_size, plan_batches, plan_pages, HarvestPlan};
