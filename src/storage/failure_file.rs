//! JSON files of unrecovered failures
//!
//! Failures left over after the retry passes are written to
//! `failed_requests_<timestamp>.json` so a later `--retry-failed` run can pick
//! them up again.

use crate::state::FailedRequest;
use crate::storage::traits::{FailureSink, StorageResult};
use chrono::Local;
use std::fs;
use std::path::{Path, PathBuf};

const FILE_PREFIX: &str = "failed_requests_";

/// Writes failure lists as pretty-printed JSON arrays
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonFailureSink;

impl JsonFailureSink {
    pub fn new() -> Self {
        Self
    }
}

impl FailureSink for JsonFailureSink {
    fn persist(&self, failed: &[FailedRequest], destination: &Path) -> StorageResult<PathBuf> {
        fs::create_dir_all(destination)?;

        let stamp = Local::now().format("%Y%m%d_%H%M%S");
        let mut path = destination.join(format!("{}{}.json", FILE_PREFIX, stamp));
        // two runs finishing in the same second
        let mut suffix = 1;
        while path.exists() {
            path = destination.join(format!("{}{}_{}.json", FILE_PREFIX, stamp, suffix));
            suffix += 1;
        }

        let json = serde_json::to_string_pretty(failed)?;
        fs::write(&path, json)?;
        Ok(path)
    }
}

/// Failure requests read back from disk, with the files they came from
#[derive(Debug, Default)]
pub struct LoadedFailures {
    /// Files that parsed; unreadable files are never listed here
    pub files: Vec<PathBuf>,
    pub requests: Vec<FailedRequest>,
}

impl LoadedFailures {
    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }

    /// Deletes the files that were loaded, once their requests are handled
    ///
    /// Returns the number of files removed. Files that cannot be removed are
    /// logged and left in place.
    pub fn remove_files(&self) -> usize {
        let mut removed = 0;
        for file in &self.files {
            match fs::remove_file(file) {
                Ok(()) => removed += 1,
                Err(e) => {
                    tracing::warn!(file = %file.display(), error = %e, "Could not remove consumed failure file");
                }
            }
        }
        removed
    }
}

/// Loads every failure file in `dir`
///
/// Files are read in name order. Files that cannot be read or parsed are
/// logged and skipped, and are not part of the result.
///
/// # Returns
///
/// * `Ok(LoadedFailures)` - All failures found (empty if `dir` does not exist)
/// * `Err(StorageError)` - `dir` exists but could not be listed
pub fn load_failed_requests(dir: &Path) -> StorageResult<LoadedFailures> {
    let mut loaded = LoadedFailures::default();

    for file in failure_files(dir)? {
        let parsed = fs::read_to_string(&file)
            .map_err(|e| e.to_string())
            .and_then(|content| {
                serde_json::from_str::<Vec<FailedRequest>>(&content).map_err(|e| e.to_string())
            });

        match parsed {
            Ok(requests) => {
                tracing::info!(file = %file.display(), count = requests.len(), "Loaded failed requests");
                loaded.requests.extend(requests);
                loaded.files.push(file);
            }
            Err(error) => {
                tracing::error!(file = %file.display(), %error, "Skipping unreadable failure file");
            }
        }
    }

    Ok(loaded)
}

/// Lists the `*.json` files of `dir` in name order
pub fn failure_files(dir: &Path) -> StorageResult<Vec<PathBuf>> {
    if !dir.exists() {
        return Ok(Vec::new());
    }

    let mut files = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_file() && path.extension().is_some_and(|ext| ext == "json") {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}
