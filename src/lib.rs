//! Market-Harvest: a polite two-tier marketplace crawler
//!
//! This crate walks category listing pages of a paginated B2B marketplace,
//! extracts lightweight item references from them, and enriches every item
//! with a fast detail fetch. Work is deduplicated across categories, rate
//! limited per host class, and checkpointed so an interrupted session can
//! resume without re-enriching anything.

pub mod config;
pub mod crawler;
pub mod ledger;
pub mod model;
pub mod output;
pub mod politeness;
pub mod state;
pub mod storage;
pub mod url;

use thiserror::Error;

/// Main error type for Market-Harvest operations
#[derive(Debug, Error)]
pub enum HarvestError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Storage error: {0}")]
    Storage(#[from] storage::StorageError),

    #[error("Output error: {0}")]
    Output(#[from] output::OutputError),

    #[error("URL error: {0}")]
    Url(#[from] UrlError),

    #[error("Extraction rule error: {0}")]
    Extract(#[from] crawler::ExtractError),

    #[error("HTTP client error: {0}")]
    Reqwest(#[from] reqwest::Error),

    #[error("Fatal: {0}")]
    Fatal(String),

    #[error("Invalid session transition: {from:?} -> {to:?}")]
    InvalidTransition {
        from: state::SessionState,
        to: state::SessionState,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
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

    #[error("Invalid selector: {0}")]
    InvalidSelector(String),
}

/// URL-specific errors
#[derive(Debug, Error)]
pub enum UrlError {
    #[error("Failed to parse URL: {0}")]
    Parse(String),

    #[error("Invalid URL scheme: {0}")]
    InvalidScheme(String),

    #[error("Missing host in URL")]
    MissingHost,
}

/// Result type alias for Market-Harvest operations
pub type Result<T> = std::result::Result<T, HarvestError>;

/// Result type alias for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Result type alias for URL operations
pub type UrlResult<T> = std::result::Result<T, UrlError>;

// Re-export commonly used types
pub use config::Config;
pub use crawler::CrawlCoordinator;
pub use ledger::DedupLedger;
pub use model::{CategorySpec, ItemRecord, ItemStub, RecordQuality};
pub use output::SessionSummary;
pub use politeness::{HostClass, PolitenessController};
pub use state::{CrawlSession, SessionState};
