//! Output module for run reports and statistics
//!
//! This module handles:
//! - Printing the end-of-run report
//! - Loading and printing statistics of stored runs

mod report;
pub mod stats;

pub use report::{format_report, print_report};
pub use stats::{format_statistics, load_statistics, print_statistics, RunStatistics};
