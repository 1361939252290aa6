//! Listing crawler: walks the listing pages of one category
//!
//! A `ListingCrawler` owns one render session and one cursor. Each call to
//! `next_batch` renders pages until one of them shows stubs that were not
//! seen earlier in the traversal, and returns them. Once a termination
//! condition is met the crawler closes its session and keeps returning None.

use crate::config::{ListingConfig, RetryConfig};
use crate::crawler::backend::{RenderError, RenderSession};
use crate::crawler::enricher::retry_backoff;
use crate::crawler::extract::ListingExtractor;
use crate::ledger::DedupLedger;
use crate::model::{CategorySpec, ItemStub, ListingPageCursor};
use crate::politeness::{HostClass, Outcome, PolitenessController};
use crate::url::listing_page_url;
use chrono::Utc;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use url::Url;

/// Shared collaborators of every listing crawler
#[derive(Clone)]
pub struct ListingDeps {
    pub politeness: Arc<PolitenessController>,
    pub ledger: Arc<DedupLedger>,
    pub extractor: Arc<ListingExtractor>,
    pub listing: ListingConfig,
    pub retry: RetryConfig,

    /// Bound on every render call
    pub timeout: Duration,
}

/// Stubs found on one listing page
#[derive(Debug, Clone)]
pub struct ListingBatch {
    pub page_index: u32,
    pub page_url: String,

    /// Stubs not seen earlier in this traversal
    pub stubs: Vec<ItemStub>,
}

/// Why a traversal ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TraversalEnd {
    /// The category's `max_pages` was reached
    MaxPages,

    /// Too many consecutive pages without new stubs
    EndOfResults,

    /// A page could not be rendered after every attempt
    Structural { page_index: u32, reason: String },
}

impl TraversalEnd {
    /// Returns true if the category was walked to its end
    pub fn is_exhausted(&self) -> bool {
        !matches!(self, Self::Structural { .. })
    }
}

impl fmt::Display for TraversalEnd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MaxPages => f.write_str("max pages reached"),
            Self::EndOfResults => f.write_str("no new items"),
            Self::Structural { page_index, reason } => {
                write!(f, "page {} failed: {}", page_index, reason)
            }
        }
    }
}

/// Lazy, restartable traversal of one category
pub struct ListingCrawler {
    spec: CategorySpec,
    session: Box<dyn RenderSession>,
    deps: ListingDeps,
    cursor: ListingPageCursor,
    seen: HashSet<String>,
    empty_streak: u32,

    /// Page opened in the ledger and not yet completed
    open_page: Option<u32>,

    /// Pages that produced nothing new since the last `take_empty_pages`
    empty_pages: Vec<u32>,
    finished: Option<TraversalEnd>,
    closed: bool,
}

impl ListingCrawler {
    /// Creates a crawler positioned at `start_cursor`
    ///
    /// # Arguments
    ///
    /// * `spec` - The category to walk
    /// * `session` - Render session owned by this crawler until it finishes
    /// * `deps` - Shared collaborators
    /// * `start_cursor` - Where to start; page 1 for a fresh category
    pub fn new(
        spec: CategorySpec,
        session: Box<dyn RenderSession>,
        deps: ListingDeps,
        start_cursor: ListingPageCursor,
    ) -> Self {
        let mut cursor = start_cursor;
        cursor.page_index = cursor.page_index.max(1);

        Self {
            spec,
            session,
            deps,
            cursor,
            seen: HashSet::new(),
            empty_streak: 0,
            open_page: None,
            empty_pages: Vec::new(),
            finished: None,
            closed: false,
        }
    }

    pub fn category_id(&self) -> &str {
        &self.spec.id
    }

    pub fn cursor(&self) -> &ListingPageCursor {
        &self.cursor
    }

    /// Why the traversal ended, once it has
    pub fn finish_reason(&self) -> Option<&TraversalEnd> {
        self.finished.as_ref()
    }

    /// Drains the pages visited without producing a batch
    pub fn take_empty_pages(&mut self) -> Vec<u32> {
        std::mem::take(&mut self.empty_pages)
    }

    /// Renders pages until one yields new stubs
    ///
    /// The page of the previous batch is marked visited in the ledger when
    /// this is called, so callers must claim a batch's stubs before asking
    /// for the next one.
    pub async fn next_batch(&mut self) -> Option<ListingBatch> {
        self.complete_open_page();

        while self.finished.is_none() {
            if let Some(end) = self.termination() {
                self.finish(end).await;
                break;
            }

            let page_index = self.cursor.page_index;
            if !self.deps.ledger.should_visit_page(&self.spec.id, &self.cursor) {
                tracing::debug!("Skipping visited page {} of {}", page_index, self.spec.id);
                self.cursor.advance_page();
                continue;
            }
            self.open_page = Some(page_index);

            let page_url = match listing_page_url(&self.spec.seed_url, page_index) {
                Ok(url) => url,
                Err(e) => {
                    self.release_open_page();
                    self.finish(TraversalEnd::Structural {
                        page_index,
                        reason: e.to_string(),
                    })
                    .await;
                    break;
                }
            };

            let stubs = match self.load_page(&page_url).await {
                Ok(stubs) => stubs,
                Err(e) => {
                    self.release_open_page();
                    self.finish(TraversalEnd::Structural {
                        page_index,
                        reason: e.to_string(),
                    })
                    .await;
                    break;
                }
            };

            let fresh: Vec<ItemStub> = stubs
                .into_iter()
                .filter(|stub| self.seen.insert(stub.item_url.clone()))
                .collect();

            self.cursor.advance_page();

            if fresh.is_empty() {
                self.empty_streak += 1;
                self.empty_pages.push(page_index);
                self.complete_open_page();
                tracing::debug!(
                    "Page {} of {} had no new items ({} in a row)",
                    page_index,
                    self.spec.id,
                    self.empty_streak
                );
                continue;
            }

            self.empty_streak = 0;
            tracing::debug!(
                "Page {} of {} yielded {} new items",
                page_index,
                self.spec.id,
                fresh.len()
            );
            return Some(ListingBatch {
                page_index,
                page_url,
                stubs: fresh,
            });
        }

        None
    }

    /// Stops the traversal without completing the current page
    ///
    /// A page whose batch was handed out but not yet completed is released,
    /// so a resumed session walks it again.
    pub async fn abandon(&mut self) {
        self.release_open_page();
        self.close().await;
    }

    /// Closes the render session; safe to call more than once
    pub async fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.session.close().await;
        }
    }

    fn termination(&self) -> Option<TraversalEnd> {
        if self.cursor.page_index > self.spec.max_pages {
            return Some(TraversalEnd::MaxPages);
        }
        if self.empty_streak >= self.deps.listing.empty_pages_before_stop.max(1) {
            return Some(TraversalEnd::EndOfResults);
        }
        None
    }

    async fn finish(&mut self, end: TraversalEnd) {
        match &end {
            TraversalEnd::Structural { .. } => {
                tracing::warn!("Category {} ended early: {}", self.spec.id, end)
            }
            _ => tracing::info!("Category {} finished: {}", self.spec.id, end),
        }
        self.finished = Some(end);
        self.close().await;
    }

    fn complete_open_page(&mut self) {
        if let Some(page_index) = self.open_page.take() {
            self.deps.ledger.complete_page(&self.spec.id, page_index);
        }
    }

    fn release_open_page(&mut self) {
        if let Some(page_index) = self.open_page.take() {
            self.deps.ledger.release_page(&self.spec.id, page_index);
        }
    }

    /// Renders one page, retrying with backoff, and extracts its stubs
    async fn load_page(&mut self, page_url: &str) -> Result<Vec<ItemStub>, RenderError> {
        let base = Url::parse(page_url).map_err(|e| RenderError::Navigation(e.to_string()))?;
        let max_attempts = self.deps.retry.listing_attempts.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;

            match self.render(page_url).await {
                Ok(html) => {
                    return Ok(self.deps.extractor.extract(&html, &base, &self.spec.id));
                }
                Err(e) if attempt >= max_attempts => return Err(e),
                Err(e) => {
                    let backoff = retry_backoff(&self.deps.retry, attempt);
                    tracing::warn!(
                        "Rendering {} failed (attempt {}/{}): {}, retrying in {:?}",
                        page_url,
                        attempt,
                        max_attempts,
                        e,
                        backoff
                    );
                    tokio::time::sleep(backoff).await;
                }
            }
        }
    }

    /// Navigates, settles, loads more content and returns the page HTML
    async fn render(&mut self, page_url: &str) -> Result<String, RenderError> {
        let politeness = self.deps.politeness.clone();
        let wait = self.deps.timeout;

        let permit = politeness.acquire(HostClass::Listing).await;
        let identity = politeness.next_identity();

        let navigated = timeout(wait, self.session.navigate(page_url, &identity, wait))
            .await
            .unwrap_or(Err(RenderError::Timeout));

        if let Err(e) = navigated {
            politeness.report_outcome(&permit, navigation_outcome(&e));
            return Err(e);
        }
        politeness.report_outcome(&permit, Outcome::Success);

        let settle = Duration::from_millis(self.deps.listing.settle_ms);
        timeout(settle + wait, self.session.settle(settle))
            .await
            .unwrap_or(Err(RenderError::Timeout))?;
        self.cursor.scroll_step = 0;
        self.cursor.rendered_at = Some(Utc::now());

        let scroll_settle = Duration::from_millis(self.deps.listing.scroll_settle_ms);
        for _ in 0..self.deps.listing.scroll_steps {
            let permit = politeness.acquire(HostClass::Listing).await;
            let loaded = timeout(wait, self.session.load_more())
                .await
                .unwrap_or(Err(RenderError::Timeout));

            match loaded {
                Ok(true) => {
                    politeness.report_outcome(&permit, Outcome::Success);
                    self.cursor.scroll_step += 1;
                    timeout(scroll_settle + wait, self.session.settle(scroll_settle))
                        .await
                        .unwrap_or(Err(RenderError::Timeout))?;
                }
                Ok(false) => break,
                Err(e) => {
                    // Extract what is already on screen
                    tracing::debug!("Load more stopped on {}: {}", page_url, e);
                    break;
                }
            }
        }

        timeout(wait, self.session.content())
            .await
            .unwrap_or(Err(RenderError::Timeout))
    }
}

fn navigation_outcome(error: &RenderError) -> Outcome {
    match error {
        RenderError::Timeout => Outcome::Timeout,
        RenderError::Status(429) => Outcome::RateLimited,
        RenderError::Status(status) if *status >= 500 => Outcome::ServerError,
        RenderError::Status(_) => Outcome::ClientError,
        RenderError::Navigation(_) | RenderError::Unavailable(_) => Outcome::ServerError,
        RenderError::NoPage => Outcome::ClientError,
    }
}
