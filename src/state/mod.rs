//! Shared run state
//!
//! Everything here is constructed once per harvest run and shared between the
//! batch tasks behind an `Arc`. Each structure guards itself with its own
//! mutex; locks are never nested.
//!
//! # Components
//!
//! - `ProgressState`: records processed so far and whether the target was reached
//! - `FailureTracker`: failed index/detail attempts waiting for a retry

mod failures;
mod progress;

use std::sync::{Mutex, MutexGuard, PoisonError};

pub use failures::{FailedRequest, FailureCounts, FailureKind, FailureTracker};
pub use progress::{ProgressSnapshot, ProgressState};

/// Locks a mutex, recovering the data if a previous holder panicked
///
/// All state behind these mutexes is updated in single statements, so a
/// poisoned lock never exposes a half-applied change.
pub(crate) fn lock_unpoisoned<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
