use crate::config::types::{
    Config, CrawlerConfig, ListingConfig, OutputConfig, PolitenessConfig, RetryConfig,
};
use crate::model::CategorySpec;
use crate::ConfigError;
use scraper::Selector;
use std::collections::HashSet;
use url::Url;

/// Validates the entire configuration
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    validate_crawler_config(&config.crawler)?;
    validate_politeness_config(&config.politeness)?;
    validate_retry_config(&config.retry)?;
    validate_listing_config(&config.listing)?;
    validate_output_config(&config.output)?;
    validate_categories(&config.categories)?;
    Ok(())
}

fn check_range(name: &str, value: u32, min: u32, max: u32) -> Result<(), ConfigError> {
    if value < min || value > max {
        return Err(ConfigError::Validation(format!(
            "{} must be between {} and {}, got {}",
            name, min, max, value
        )));
    }
    Ok(())
}

/// Validates concurrency limits and timeouts
fn validate_crawler_config(config: &CrawlerConfig) -> Result<(), ConfigError> {
    check_range("category-parallelism", config.category_parallelism, 1, 64)?;
    check_range("detail-workers", config.detail_workers, 1, 256)?;
    check_range("queue-depth", config.queue_depth, 1, 100_000)?;

    if config.request_timeout_ms < 100 {
        return Err(ConfigError::Validation(format!(
            "request-timeout-ms must be >= 100ms, got {}ms",
            config.request_timeout_ms
        )));
    }

    if config.checkpoint_interval_secs == 0 && config.checkpoint_every_items == 0 {
        return Err(ConfigError::Validation(
            "at least one of checkpoint-interval-secs and checkpoint-every-items must be set"
                .to_string(),
        ));
    }

    Ok(())
}

/// Validates delay, backoff, and identity settings
fn validate_politeness_config(config: &PolitenessConfig) -> Result<(), ConfigError> {
    // Must be > 1 so consecutive backoffs strictly increase the delay
    if config.backoff_multiplier <= 1.0 || !config.backoff_multiplier.is_finite() {
        return Err(ConfigError::Validation(format!(
            "backoff-multiplier must be a finite number > 1.0, got {}",
            config.backoff_multiplier
        )));
    }

    // A zero delay cannot grow by multiplication
    if config.base_delay_ms == 0 {
        return Err(ConfigError::Validation(
            "base-delay-ms must be >= 1".to_string(),
        ));
    }

    if config.max_delay_ms < config.base_delay_ms {
        return Err(ConfigError::Validation(format!(
            "max-delay-ms ({}) must be >= base-delay-ms ({})",
            config.max_delay_ms, config.base_delay_ms
        )));
    }

    if config.relax_after == 0 {
        return Err(ConfigError::Validation(
            "relax-after must be >= 1".to_string(),
        ));
    }

    if config.identities.is_empty() {
        return Err(ConfigError::Validation(
            "identities cannot be empty".to_string(),
        ));
    }

    if let Some(bad) = config.identities.iter().find(|id| id.trim().is_empty()) {
        return Err(ConfigError::Validation(format!(
            "identities cannot contain blank entries, got '{}'",
            bad
        )));
    }

    Ok(())
}

/// Validates retry budgets
fn validate_retry_config(config: &RetryConfig) -> Result<(), ConfigError> {
    check_range("transient-attempts", config.transient_attempts, 1, 20)?;
    check_range("listing-attempts", config.listing_attempts, 1, 20)?;
    check_range("requeue-limit", config.requeue_limit, 0, 10)?;

    if config.backoff_max_ms < config.backoff_base_ms {
        return Err(ConfigError::Validation(format!(
            "backoff-max-ms ({}) must be >= backoff-base-ms ({})",
            config.backoff_max_ms, config.backoff_base_ms
        )));
    }

    Ok(())
}

/// Validates listing traversal settings
fn validate_listing_config(config: &ListingConfig) -> Result<(), ConfigError> {
    Selector::parse(&config.item_selector).map_err(|e| {
        ConfigError::InvalidSelector(format!("'{}': {:?}", config.item_selector, e))
    })?;

    if config.max_items_per_page == 0 {
        return Err(ConfigError::Validation(
            "max-items-per-page must be >= 1".to_string(),
        ));
    }

    check_range("empty-pages-before-stop", config.empty_pages_before_stop, 1, 100)?;

    Ok(())
}

/// Validates output configuration
fn validate_output_config(config: &OutputConfig) -> Result<(), ConfigError> {
    for (name, value) in [
        ("records-path", &config.records_path),
        ("failures-path", &config.failures_path),
        ("checkpoint-path", &config.checkpoint_path),
    ] {
        if value.is_empty() {
            return Err(ConfigError::Validation(format!("{} cannot be empty", name)));
        }
    }

    Ok(())
}

/// Validates category entries
fn validate_categories(categories: &[CategorySpec]) -> Result<(), ConfigError> {
    if categories.is_empty() {
        return Err(ConfigError::Validation(
            "at least one [[category]] must be configured".to_string(),
        ));
    }

    let mut seen = HashSet::new();
    for category in categories {
        validate_category_id(&category.id)?;

        if !seen.insert(category.id.as_str()) {
            return Err(ConfigError::Validation(format!(
                "duplicate category id '{}'",
                category.id
            )));
        }

        let url = Url::parse(&category.seed_url).map_err(|e| {
            ConfigError::InvalidUrl(format!("Invalid seed URL '{}': {}", category.seed_url, e))
        })?;

        if url.scheme() != "https" && url.scheme() != "http" {
            return Err(ConfigError::Validation(format!(
                "Seed URL '{}' must use HTTP or HTTPS",
                category.seed_url
            )));
        }

        if category.max_pages == 0 {
            return Err(ConfigError::Validation(format!(
                "Category '{}' must allow at least one page",
                category.id
            )));
        }
    }

    Ok(())
}

/// Category ids end up in file names and database keys
fn validate_category_id(id: &str) -> Result<(), ConfigError> {
    if id.is_empty() {
        return Err(ConfigError::Validation(
            "category id cannot be empty".to_string(),
        ));
    }

    if !id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(ConfigError::Validation(format!(
            "category id must contain only alphanumeric characters, '-' and '_', got '{}'",
            id
        )));
    }

    Ok(())
}
