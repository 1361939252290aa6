//! Crawler module: the two-tier crawl engine
//!
//! This module contains the core crawling logic, including:
//! - Render and fetch backends (`PageRenderer`, `ContentFetcher`)
//! - Listing page traversal and stub extraction
//! - Detail page enrichment with retries
//! - The worker pool and the session coordinator

mod backend;
mod coordinator;
mod enricher;
mod extract;
mod fetcher;
mod listing;
mod worker;

pub use backend::{
    ContentFetcher, FetchError, FetchedContent, PageRenderer, RenderError, RenderSession,
};
pub use coordinator::CrawlCoordinator;
pub use enricher::{retry_backoff, DetailEnricher, EnrichError, PermanentCause, TransientCause};
pub use extract::{
    clean_text, ExtractError, ExtractedFields, Field, FieldRule, FieldRules, ListingExtractor,
    Page,
};
pub use fetcher::{build_http_client, HttpContentFetcher, StaticPageRenderer};
pub use listing::{ListingBatch, ListingCrawler, ListingDeps, TraversalEnd};
pub use worker::{spawn_workers, CrawlEvent, WorkQueue, WorkerContext};
