use crate::extract::{DateRange, FieldRule, SearchQuery};
use crate::ConfigError;
use serde::Deserialize;
use std::time::Duration;

/// Main configuration structure for the harvester
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub harvester: HarvesterConfig,
    #[serde(rename = "rate-limit", default)]
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub batching: BatchingConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    pub query: QueryConfig,
    #[serde(default)]
    pub site: SiteConfig,
    pub output: OutputConfig,
    #[serde(rename = "detail-field", default)]
    pub detail_fields: Vec<FieldRule>,
}

/// Worker pool and sizing configuration
#[derive(Debug, Clone, Deserialize)]
pub struct HarvesterConfig {
    /// Number of batches processed concurrently
    #[serde(rename = "worker-count", default = "default_worker_count")]
    pub worker_count: u32,

    /// Minimum number of batches per worker; a tunable, not a hard law
    #[serde(rename = "batch-target-multiplier", default = "default_batch_multiplier")]
    pub batch_target_multiplier: u32,

    /// Records shown on one search results page
    #[serde(rename = "records-per-page", default = "default_records_per_page")]
    pub records_per_page: u32,

    /// Number of records the caller wants
    #[serde(rename = "target-records", default = "default_target_records")]
    pub target_records: u64,
}

impl Default for HarvesterConfig {
    fn default() -> Self {
        Self {
            worker_count: default_worker_count(),
            batch_target_multiplier: default_batch_multiplier(),
            records_per_page: default_records_per_page(),
            target_records: default_target_records(),
        }
    }
}

/// Adaptive per-request delay configuration
#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitConfig {
    #[serde(rename = "initial-delay-ms", default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,

    #[serde(rename = "min-delay-ms", default = "default_min_delay_ms")]
    pub min_delay_ms: u64,

    #[serde(rename = "max-delay-ms", default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    /// Success rate at or above which the estimator speeds up
    #[serde(rename = "success-threshold", default = "default_success_threshold")]
    pub success_threshold: f64,

    /// Success rate below which the estimator slows down
    #[serde(rename = "failure-threshold", default = "default_failure_threshold")]
    pub failure_threshold: f64,

    /// Number of request outcomes kept in the rolling window
    #[serde(rename = "window-size", default = "default_window_size")]
    pub window_size: usize,

    #[serde(
        rename = "adjustment-cooldown-seconds",
        default = "default_adjustment_cooldown"
    )]
    pub adjustment_cooldown_seconds: u64,
}

impl RateLimitConfig {
    pub fn initial_delay(&self) -> Duration {
        Duration::from_millis(self.initial_delay_ms)
    }

    pub fn min_delay(&self) -> Duration {
        Duration::from_millis(self.min_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }

    pub fn adjustment_cooldown(&self) -> Duration {
        Duration::from_secs(self.adjustment_cooldown_seconds)
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            initial_delay_ms: default_initial_delay_ms(),
            min_delay_ms: default_min_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            success_threshold: default_success_threshold(),
            failure_threshold: default_failure_threshold(),
            window_size: default_window_size(),
            adjustment_cooldown_seconds: default_adjustment_cooldown(),
        }
    }
}

/// Batch admission configuration
#[derive(Debug, Clone, Deserialize)]
pub struct BatchingConfig {
    #[serde(
        rename = "max-concurrent-batches",
        default = "default_max_concurrent_batches"
    )]
    pub max_concurrent_batches: u32,

    /// Minimum spacing between two batch starts (milliseconds)
    #[serde(rename = "batch-delay-ms", default = "default_batch_delay_ms")]
    pub batch_delay_ms: u64,

    /// How often a waiting batch re-checks for a free slot (milliseconds)
    #[serde(rename = "poll-interval-ms", default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

impl BatchingConfig {
    pub fn batch_delay(&self) -> Duration {
        Duration::from_millis(self.batch_delay_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

impl Default for BatchingConfig {
    fn default() -> Self {
        Self {
            max_concurrent_batches: default_max_concurrent_batches(),
            batch_delay_ms: default_batch_delay_ms(),
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

/// Retry loop configuration
#[derive(Debug, Clone, Deserialize)]
pub struct RetryConfig {
    #[serde(rename = "enable-retry", default = "default_true")]
    pub enable_retry: bool,

    #[serde(rename = "max-retries", default = "default_max_retries")]
    pub max_retries: u32,

    /// Fixed pause between two retry attempts (milliseconds)
    #[serde(rename = "retry-delay-ms", default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
}

impl RetryConfig {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            enable_retry: true,
            max_retries: default_max_retries(),
            retry_delay_ms: default_retry_delay_ms(),
        }
    }
}

/// Search query configuration
#[derive(Debug, Clone, Deserialize)]
pub struct QueryConfig {
    /// First completion date, `YYYY/MM/DD`
    #[serde(rename = "start-date")]
    pub start_date: String,

    /// Last completion date, `YYYY/MM/DD`
    #[serde(rename = "end-date")]
    pub end_date: String,

    /// Contracting agency name filter
    #[serde(default)]
    pub agency: Option<String>,

    /// Vendor (UEI name) filter
    #[serde(default)]
    pub vendor: Option<String>,
}

impl QueryConfig {
    /// Builds the search query, mapping filters onto FPDS index fields
    pub fn search_query(&self) -> Result<SearchQuery, ConfigError> {
        let range =
            DateRange::parse(&self.start_date, &self.end_date).map_err(ConfigError::Validation)?;
        let mut query = SearchQuery::new(range);
        if let Some(agency) = &self.agency {
            query = query.with_filter("CONTRACTING_AGENCY_NAME", agency.trim());
        }
        if let Some(vendor) = &self.vendor {
            query = query.with_filter("UEI_NAME", vendor.trim());
        }
        Ok(query)
    }
}

/// Target site configuration
#[derive(Debug, Clone, Deserialize)]
pub struct SiteConfig {
    #[serde(rename = "base-url", default = "default_base_url")]
    pub base_url: String,

    #[serde(rename = "user-agent", default = "default_user_agent")]
    pub user_agent: String,

    #[serde(rename = "timeout-seconds", default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
}

impl SiteConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

impl Default for SiteConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            user_agent: default_user_agent(),
            timeout_seconds: default_timeout_seconds(),
        }
    }
}

/// Output configuration
#[derive(Debug, Clone, Deserialize)]
pub struct OutputConfig {
    /// Path to the SQLite database file
    #[serde(rename = "database-path")]
    pub database_path: String,

    /// Directory receiving failed-request files
    #[serde(rename = "failed-dir", default = "default_failed_dir")]
    pub failed_dir: String,
}

fn default_worker_count() -> u32 {
    16
}

fn default_batch_multiplier() -> u32 {
    2
}

fn default_records_per_page() -> u32 {
    30
}

fn default_target_records() -> u64 {
    100_000
}

fn default_initial_delay_ms() -> u64 {
    500
}

fn default_min_delay_ms() -> u64 {
    100
}

fn default_max_delay_ms() -> u64 {
    2_000
}

fn default_success_threshold() -> f64 {
    0.95
}

fn default_failure_threshold() -> f64 {
    0.80
}

fn default_window_size() -> usize {
    100
}

fn default_adjustment_cooldown() -> u64 {
    30
}

fn default_max_concurrent_batches() -> u32 {
    16
}

fn default_batch_delay_ms() -> u64 {
    1_000
}

fn default_poll_interval_ms() -> u64 {
    1_000
}

fn default_true() -> bool {
    true
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_delay_ms() -> u64 {
    1_000
}

fn default_base_url() -> String {
    "https://www.fpds.gov".to_string()
}

fn default_user_agent() -> String {
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36".to_string()
}

fn default_timeout_seconds() -> u64 {
    30
}

fn default_failed_dir() -> String {
    "./failed_request_data".to_string()
}
