use crate::config::types::{
    BatchingConfig, Config, HarvesterConfig, OutputConfig, QueryConfig, RateLimitConfig,
    RetryConfig, SiteConfig,
};
use crate::extract::{DateRange, FieldRule};
use crate::ConfigError;
use url::Url;

/// Validates the entire configuration
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    validate_harvester_config(&config.harvester)?;
    validate_rate_limit_config(&config.rate_limit)?;
    validate_batching_config(&config.batching)?;
    validate_retry_config(&config.retry)?;
    validate_query_config(&config.query)?;
    validate_site_config(&config.site)?;
    validate_output_config(&config.output)?;
    validate_detail_fields(&config.detail_fields)?;
    Ok(())
}

fn validate_harvester_config(config: &HarvesterConfig) -> Result<(), ConfigError> {
    if config.worker_count < 1 || config.worker_count > 256 {
        return Err(ConfigError::Validation(format!(
            "worker_count must be between 1 and 256, got {}",
            config.worker_count
        )));
    }

    if config.batch_target_multiplier < 1 {
        return Err(ConfigError::Validation(
            "batch_target_multiplier must be >= 1".to_string(),
        ));
    }

    if config.records_per_page < 1 {
        return Err(ConfigError::Validation(
            "records_per_page must be >= 1".to_string(),
        ));
    }

    if config.target_records < 1 {
        return Err(ConfigError::Validation(
            "target_records must be >= 1".to_string(),
        ));
    }

    Ok(())
}

fn validate_rate_limit_config(config: &RateLimitConfig) -> Result<(), ConfigError> {
    if config.min_delay_ms == 0 {
        return Err(ConfigError::Validation(
            "min_delay_ms must be > 0".to_string(),
        ));
    }

    // min <= initial <= max
    if config.initial_delay_ms < config.min_delay_ms || config.initial_delay_ms > config.max_delay_ms
    {
        return Err(ConfigError::Validation(format!(
            "delays must satisfy min <= initial <= max, got {} <= {} <= {}",
            config.min_delay_ms, config.initial_delay_ms, config.max_delay_ms
        )));
    }

    for (name, value) in [
        ("success_threshold", config.success_threshold),
        ("failure_threshold", config.failure_threshold),
    ] {
        if !(value > 0.0 && value <= 1.0) {
            return Err(ConfigError::Validation(format!(
                "{} must be in (0, 1], got {}",
                name, value
            )));
        }
    }

    if config.failure_threshold > config.success_threshold {
        return Err(ConfigError::Validation(format!(
            "failure_threshold ({}) cannot exceed success_threshold ({})",
            config.failure_threshold, config.success_threshold
        )));
    }

    if config.window_size < 10 {
        return Err(ConfigError::Validation(format!(
            "window_size must be >= 10, got {}",
            config.window_size
        )));
    }

    Ok(())
}

fn validate_batching_config(config: &BatchingConfig) -> Result<(), ConfigError> {
    if config.max_concurrent_batches < 1 {
        return Err(ConfigError::Validation(
            "max_concurrent_batches must be >= 1".to_string(),
        ));
    }

    if config.poll_interval_ms == 0 {
        return Err(ConfigError::Validation(
            "poll_interval_ms must be > 0".to_string(),
        ));
    }

    Ok(())
}

fn validate_retry_config(config: &RetryConfig) -> Result<(), ConfigError> {
    if config.max_retries > 20 {
        return Err(ConfigError::Validation(format!(
            "max_retries must be <= 20, got {}",
            config.max_retries
        )));
    }
    Ok(())
}

fn validate_query_config(config: &QueryConfig) -> Result<(), ConfigError> {
    DateRange::parse(&config.start_date, &config.end_date)
        .map_err(ConfigError::Validation)?;

    for (name, value) in [("agency", &config.agency), ("vendor", &config.vendor)] {
        if let Some(value) = value {
            if value.trim().is_empty() {
                return Err(ConfigError::Validation(format!(
                    "{} filter cannot be blank",
                    name
                )));
            }
            if value.contains('"') {
                return Err(ConfigError::Validation(format!(
                    "{} filter cannot contain double quotes",
                    name
                )));
            }
        }
    }

    Ok(())
}

fn validate_site_config(config: &SiteConfig) -> Result<(), ConfigError> {
    let url = Url::parse(&config.base_url)
        .map_err(|e| ConfigError::InvalidUrl(format!("Invalid base_url: {}", e)))?;

    if url.scheme() != "https" && url.scheme() != "http" {
        return Err(ConfigError::InvalidUrl(format!(
            "base_url '{}' must use http or https",
            config.base_url
        )));
    }

    if config.user_agent.is_empty() {
        return Err(ConfigError::Validation(
            "user_agent cannot be empty".to_string(),
        ));
    }

    if config.timeout_seconds == 0 {
        return Err(ConfigError::Validation(
            "timeout_seconds must be > 0".to_string(),
        ));
    }

    Ok(())
}

fn validate_output_config(config: &OutputConfig) -> Result<(), ConfigError> {
    if config.database_path.is_empty() {
        return Err(ConfigError::Validation(
            "database_path cannot be empty".to_string(),
        ));
    }

    if config.failed_dir.is_empty() {
        return Err(ConfigError::Validation(
            "failed_dir cannot be empty".to_string(),
        ));
    }

    Ok(())
}

fn validate_detail_fields(rules: &[FieldRule]) -> Result<(), ConfigError> {
    for rule in rules {
        if rule.name.trim().is_empty() {
            return Err(ConfigError::Validation(
                "detail-field name cannot be empty".to_string(),
            ));
        }
        rule.check_selectors().map_err(ConfigError::Validation)?;
    }
    Ok(())
}
