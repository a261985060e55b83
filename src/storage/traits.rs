//! Storage traits and error types
//!
//! This module defines the two persistence boundaries of a harvest run: the
//! bulk store receiving finished records and the sink receiving failures that
//! could not be recovered.

use crate::extract::ExtractedRecord;
use crate::state::FailedRequest;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors that can occur during storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Run not found: {0}")]
    RunNotFound(i64),

    #[error("No run has been started on this store")]
    NoActiveRun,
}

impl From<serde_json::Error> for StorageError {
    fn from(error: serde_json::Error) -> Self {
        Self::Serialization(error.to_string())
    }
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Destination of finished records
pub trait BulkStore: Send {
    /// Persists `records` and returns their ids, in input order
    ///
    /// Either every record is stored or none is.
    fn store_many(&mut self, records: &[ExtractedRecord]) -> StorageResult<Vec<i64>>;
}

/// Destination of failures left over after the retry passes
pub trait FailureSink: Send + Sync {
    /// Writes `failed` below `destination` and returns the written path
    fn persist(&self, failed: &[FailedRequest], destination: &Path) -> StorageResult<PathBuf>;
}
