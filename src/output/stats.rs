//! Statistics of stored harvest runs
//!
//! Backs the `--stats` mode: loads counters for the latest run from the
//! database and prints them.

use crate::storage::{RunRecord, SqliteStore, StorageResult};
use chrono::{DateTime, Utc};
use std::fmt;

/// Counters for one stored run
#[derive(Debug, Clone)]
pub struct RunStatistics {
    pub run: RunRecord,
    pub contracts: u64,
    pub contracts_with_detail: u64,
    pub pages: u64,
    /// Contracts across every run in the database
    pub total_contracts: u64,
}

impl RunStatistics {
    /// Seconds between start and finish, if the run finished
    pub fn duration_seconds(&self) -> Option<i64> {
        let started = self.run.started_at.parse::<DateTime<Utc>>().ok()?;
        let finished = self.run.finished_at.as_ref()?.parse::<DateTime<Utc>>().ok()?;
        Some((finished - started).num_seconds())
    }

    /// Share of stored contracts that carry a detail map, in percent
    pub fn detail_coverage(&self) -> f64 {
        if self.contracts == 0 {
            0.0
        } else {
            self.contracts_with_detail as f64 / self.contracts as f64 * 100.0
        }
    }
}

/// Loads statistics for the most recent run
///
/// # Arguments
///
/// * `store` - The opened harvest database
///
/// # Returns
///
/// * `Ok(Some(RunStatistics))` - Counters of the latest run
/// * `Ok(None)` - The database holds no runs yet
/// * `Err(StorageError)` - A query failed
pub fn load_statistics(store: &SqliteStore) -> StorageResult<Option<RunStatistics>> {
    let Some(run) = store.get_latest_run()? else {
        return Ok(None);
    };

    Ok(Some(RunStatistics {
        contracts: store.count_contracts(run.id)?,
        contracts_with_detail: store.count_contracts_with_detail(run.id)?,
        pages: store.count_pages(run.id)?,
        total_contracts: store.count_total_contracts()?,
        run,
    }))
}

impl fmt::Display for RunStatistics {
    /// Writes the text printed by `--stats`
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let run = &self.run;

        writeln!(f, "=== Harvest Statistics ===\n")?;
        writeln!(f, "Latest run:")?;
        writeln!(f, "  Run ID: {}", run.id)?;
        writeln!(f, "  Status: {}", run.status.to_db_string())?;
        writeln!(f, "  Query: {}", run.query)?;
        writeln!(f, "  Started: {}", run.started_at)?;
        if let Some(finished) = &run.finished_at {
            writeln!(f, "  Finished: {}", finished)?;
        }
        if let Some(seconds) = self.duration_seconds() {
            writeln!(f, "  Duration: {}s", seconds)?;
        }
        writeln!(f, "  Config hash: {}", run.config_hash)?;
        writeln!(f)?;

        writeln!(f, "Contracts:")?;
        writeln!(f, "  Stored: {}", self.contracts)?;
        writeln!(
            f,
            "  With detail: {} ({:.1}%)",
            self.contracts_with_detail,
            self.detail_coverage()
        )?;
        writeln!(f, "  Pages covered: {}", self.pages)?;
        writeln!(f, "  All runs: {}", self.total_contracts)
    }
}

/// Formats statistics as the text printed by `--stats`
pub fn format_statistics(stats: &RunStatistics) -> String {
    stats.to_string()
}

pub fn print_statistics(stats: &RunStatistics) {
    print!("{}", stats);
}
