//! Request pacing and batch admission
//!
//! Two independent throttles govern how hard the harvester pushes the remote
//! site:
//!
//! - [`DelayEstimator`]: fine-grained, adaptive delay applied before every page request
//! - [`BatchAdmissionController`]: coarse cap on concurrently running batches plus a
//!   minimum spacing between batch starts
//!
//! Each one owns its own lock; neither ever takes the other's.

mod admission;
mod delay;

pub use admission::{BatchAdmissionController, BatchSlot};
pub use delay::{DelayEstimator, DelaySettings, DelayStats, RateMode, RequestOutcome};
