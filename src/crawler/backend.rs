//! Render and fetch capabilities
//!
//! The listing crawler needs a stateful, multi-step navigation capability
//! (`PageRenderer` / `RenderSession`); the detail enricher needs a single
//! request (`ContentFetcher`). One render session is opened per category;
//! one fetch is issued per item attempt.

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

/// Raw content returned by a lightweight fetch
#[derive(Debug, Clone)]
pub struct FetchedContent {
    /// URL after redirects
    pub final_url: String,

    /// HTTP status code
    pub status: u16,
    pub body: String,
}

/// Errors raised before any HTTP status is available
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FetchError {
    #[error("request timed out")]
    Timeout,

    #[error("network error: {0}")]
    Network(String),
}

/// Errors raised by a render backend
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RenderError {
    /// No rendering session can be established at all
    #[error("renderer unavailable: {0}")]
    Unavailable(String),

    #[error("navigation timed out")]
    Timeout,

    /// The page answered with a non-success status
    #[error("page returned HTTP {0}")]
    Status(u16),

    #[error("navigation failed: {0}")]
    Navigation(String),

    /// `content` or `load_more` called before a successful `navigate`
    #[error("no page loaded")]
    NoPage,
}

/// Capability to open rendering sessions
#[async_trait]
pub trait PageRenderer: Send + Sync {
    /// Opens a new session; each listing crawler owns one
    async fn open(&self) -> Result<Box<dyn RenderSession>, RenderError>;

    /// Checks that `url` can be reached at all before a session starts
    ///
    /// Any answer from the site counts as reachable; only a backend that
    /// cannot get a response returns `Unavailable`. The default opens and
    /// closes one session.
    async fn probe(
        &self,
        _url: &str,
        _identity: &str,
        _timeout: Duration,
    ) -> Result<(), RenderError> {
        let mut session = self.open().await?;
        session.close().await;
        Ok(())
    }
}

/// One rendering session (a browser tab, for a headless backend)
#[async_trait]
pub trait RenderSession: Send {
    /// Loads `url` with `identity` as the outbound user agent
    async fn navigate(
        &mut self,
        url: &str,
        identity: &str,
        timeout: Duration,
    ) -> Result<(), RenderError>;

    /// Waits for dynamic content to settle
    async fn settle(&mut self, wait: Duration) -> Result<(), RenderError>;

    /// Current DOM serialized as HTML
    async fn content(&mut self) -> Result<String, RenderError>;

    /// Triggers one "load more" action (scroll or click)
    ///
    /// Returns false if the backend has nothing more to load.
    async fn load_more(&mut self) -> Result<bool, RenderError>;

    /// Releases the session
    async fn close(&mut self);
}

/// Capability to fetch raw content by URL
#[async_trait]
pub trait ContentFetcher: Send + Sync {
    async fn fetch(
        &self,
        url: &str,
        identity: &str,
        timeout: Duration,
    ) -> Result<FetchedContent, FetchError>;
}
