//! Storage module for persisting harvest results
//!
//! This module handles:
//! - SQLite database initialization and schema management
//! - Bulk insertion of extracted records, typed by the value formatter
//! - Run tracking
//! - Failure files for out-of-band retries

mod failure_file;
mod format;
mod schema;
mod sqlite;
mod traits;

pub use failure_file::{failure_files, load_failed_requests, JsonFailureSink, LoadedFailures};
pub use format::{format_fields, format_value};
pub use sqlite::SqliteStore;
pub use traits::{BulkStore, FailureSink, StorageError, StorageResult};

use std::path::Path;

/// Opens or creates the harvest database
///
/// # Arguments
///
/// * `path` - Path to the SQLite database file
///
/// # Returns
///
/// * `Ok(SqliteStore)` - Successfully opened storage
/// * `Err(StorageError)` - Failed to open storage
pub fn open_storage(path: &Path) -> StorageResult<SqliteStore> {
    SqliteStore::open(path)
}

/// Represents a harvest run
#[derive(Debug, Clone)]
pub struct RunRecord {
    pub id: i64,
    pub started_at: String,
    pub finished_at: Option<String>,
    pub config_hash: String,
    pub query: String,
    pub status: RunStatus,
}

/// Status of a harvest run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Running,
    Completed,
    Interrupted,
    Failed,
}

impl RunStatus {
    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Interrupted => "interrupted",
            Self::Failed => "failed",
        }
    }

    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "running" => Some(Self::Running),
            "completed" => Some(Self::Completed),
            "interrupted" => Some(Self::Interrupted),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}
