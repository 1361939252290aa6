use crate::model::CategorySpec;
use serde::Deserialize;

/// Main configuration structure for Market-Harvest
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub crawler: CrawlerConfig,
    #[serde(default)]
    pub politeness: PolitenessConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub listing: ListingConfig,
    pub output: OutputConfig,
    #[serde(default, rename = "category")]
    pub categories: Vec<CategorySpec>,
}

/// Concurrency and session configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct CrawlerConfig {
    /// Number of categories traversed at the same time
    pub category_parallelism: u32,

    /// Size of the detail enrichment worker pool
    pub detail_workers: u32,

    /// Bound of the work queue between listing crawlers and workers
    pub queue_depth: u32,

    /// Seconds between time-based checkpoints
    pub checkpoint_interval_secs: u64,

    /// Delivered records between count-based checkpoints
    pub checkpoint_every_items: u64,

    /// How long in-flight work may run after a stop signal (milliseconds)
    pub shutdown_grace_ms: u64,

    /// Timeout applied to every fetch and render call (milliseconds)
    pub request_timeout_ms: u64,
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        Self {
            category_parallelism: 2,
            detail_workers: 8,
            queue_depth: 32,
            checkpoint_interval_secs: 30,
            checkpoint_every_items: 100,
            shutdown_grace_ms: 5_000,
            request_timeout_ms: 10_000,
        }
    }
}

/// How identities are picked from the pool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum IdentityRotation {
    RoundRobin,
    Random,
}

/// Politeness (rate limit and identity) configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct PolitenessConfig {
    /// Baseline delay between two requests of the same host class (milliseconds)
    pub base_delay_ms: u64,

    /// Upper bound of the random jitter added to each grant (milliseconds)
    pub jitter_ms: u64,

    /// Factor applied to the delay on rate-limit, server-error or timeout outcomes
    pub backoff_multiplier: f64,

    /// Ceiling for the adaptive delay (milliseconds)
    pub max_delay_ms: u64,

    /// Pause applied to a host class after a rate-limit response (milliseconds)
    pub cooldown_ms: u64,

    /// Consecutive successes needed to relax the delay one step
    pub relax_after: u32,

    /// Outbound user-agent strings
    pub identities: Vec<String>,

    pub rotation: IdentityRotation,
}

impl Default for PolitenessConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: 1_500,
            jitter_ms: 400,
            backoff_multiplier: 2.0,
            max_delay_ms: 30_000,
            cooldown_ms: 10_000,
            relax_after: 5,
            identities: vec![
                "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 Chrome/120 Safari/537.36"
                    .to_string(),
            ],
            rotation: IdentityRotation::RoundRobin,
        }
    }
}

/// Retry budgets per failure class
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct RetryConfig {
    /// Attempts per enrichment for transient failures
    pub transient_attempts: u32,

    /// How many times an exhausted transient item goes back to the queue
    pub requeue_limit: u32,

    /// Attempts per listing page navigation
    pub listing_attempts: u32,

    /// First retry delay (milliseconds), doubled per attempt
    pub backoff_base_ms: u64,

    /// Ceiling for the retry delay (milliseconds)
    pub backoff_max_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            transient_attempts: 3,
            requeue_limit: 1,
            listing_attempts: 3,
            backoff_base_ms: 1_000,
            backoff_max_ms: 20_000,
        }
    }
}

/// Listing traversal configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct ListingConfig {
    /// CSS selector matching item links on a listing page
    pub item_selector: String,

    /// Cap on stubs taken from one listing page
    pub max_items_per_page: usize,

    /// Load-more (scroll) actions performed on each page before extraction
    pub scroll_steps: u32,

    /// Wait after navigation (milliseconds)
    pub settle_ms: u64,

    /// Wait after each load-more action (milliseconds)
    pub scroll_settle_ms: u64,

    /// Consecutive pages without new stubs that end a category
    pub empty_pages_before_stop: u32,
}

impl Default for ListingConfig {
    fn default() -> Self {
        Self {
            item_selector: "a.titles, a[href*='/proddetail/']".to_string(),
            max_items_per_page: 20,
            scroll_steps: 3,
            settle_ms: 1_500,
            scroll_settle_ms: 400,
            empty_pages_before_stop: 2,
        }
    }
}

/// Output configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct OutputConfig {
    /// JSON-lines file receiving enriched records
    pub records_path: String,

    /// JSON-lines file receiving failure-log entries
    pub failures_path: String,

    /// SQLite database holding checkpoints
    pub checkpoint_path: String,
}
