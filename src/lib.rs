//! FPDS Harvester: an adaptive, polite contract-award crawler
//!
//! This crate crawls the FPDS ezsearch portal, extracts contract-award records
//! from paginated search results and their detail pages, and persists them.
//! Throughput is governed by an adaptive per-request delay and a coarse
//! batch-admission limiter; partial failures are tracked and retried.

pub mod config;
pub mod extract;
pub mod harvester;
pub mod output;
pub mod state;
pub mod storage;
pub mod throttle;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Main error type for harvester operations
#[derive(Debug, Error)]
pub enum HarvestError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Could not size the result set: {source}")]
    Sizing { source: ExtractError },

    #[error("Storage error: {0}")]
    Storage(#[from] storage::StorageError),

    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Configuration-specific errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid URL in config: {0}")]
    InvalidUrl(String),
}

/// Failure reported by a page, detail or count extraction.
///
/// These are expected outcomes of talking to a remote site, so collaborators
/// return them as values instead of failing the surrounding batch.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ExtractError {
    #[error("network error: {0}")]
    Network(String),

    #[error("request timed out")]
    Timeout,

    #[error("HTTP {status}")]
    Http { status: u16 },

    #[error("blocked by remote site (HTTP {status})")]
    Blocked { status: u16 },

    #[error("could not parse page: {0}")]
    Parse(String),

    #[error("record has no detail reference")]
    MissingDetailReference,
}

impl ExtractError {
    /// Returns true if the remote site refused the request (rate limit or ban)
    pub fn is_blocked(&self) -> bool {
        matches!(self, Self::Blocked { .. })
    }

    /// Returns true if the failure came from the transport rather than the page content
    pub fn is_unreachable(&self) -> bool {
        matches!(
            self,
            Self::Network(_) | Self::Timeout | Self::Http { .. } | Self::Blocked { .. }
        )
    }
}

/// Result type alias for harvester operations
pub type Result<T> = std::result::Result<T, HarvestError>;

/// Result type alias for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Result type alias for a single extraction attempt
pub type ExtractResult<T> = std::result::Result<T, ExtractError>;

// Re-export commonly used types
pub use config::Config;
pub use extract::{DateRange, ExtractedRecord, RawRecord, SearchQuery};
pub use harvester::{ExtractionOrchestrator, HarvestReport, StopHandle};
pub use state::{FailedRequest, FailureKind, FailureTracker, ProgressState};
pub use throttle::{BatchAdmissionController, DelayEstimator, RateMode};
