//! Configuration module for the harvester
//!
//! This module handles loading, parsing, and validating TOML configuration files.
//! Invalid configuration is rejected here, before any network activity.
//!
//! # Example
//!
//! ```no_run
//! use fpds_harvester::config::load_config;
//! use std::path::Path;
//!
//! let config = load_config(Path::new("harvest.toml")).unwrap();
//! println!("Workers: {}", config.harvester.worker_count);
//! ```

mod parser;
mod types;
mod validation;

// Re-export types
pub use types::{
    BatchingConfig, Config, HarvesterConfig, OutputConfig, QueryConfig, RateLimitConfig,
    RetryConfig, SiteConfig,
};

// Re-export parser functions
pub use parser::{compute_config_hash, load_config, load_config_with_hash, parse_config};
pub use validation::validate;
