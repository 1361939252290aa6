//! Scripted backends and configuration shared by the integration tests

use async_trait::async_trait;
use market_harvest::config::{
    Config, CrawlerConfig, ListingConfig, OutputConfig, PolitenessConfig, RetryConfig,
};
use market_harvest::crawler::{
    ContentFetcher, FetchError, FetchedContent, PageRenderer, RenderError, RenderSession,
};
use market_harvest::model::CategorySpec;
use market_harvest::url::listing_page_url;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Semaphore;

pub const DETAIL_PAGE: &str = r#"<html><head>
    <title>Borewell Pump | Acme</title>
    <meta property="og:title" content="Acme Pumps Pvt Ltd" />
    <meta name="description" content="Stainless steel borewell pump, 1 HP" />
    </head><body>
    <h1>Borewell Pump</h1>
    <p>₹ 12,500 / piece</p>
    <p>Coimbatore, Tamil Nadu</p>
    </body></html>"#;

pub fn category(id: &str, max_pages: u32) -> CategorySpec {
    CategorySpec {
        id: id.to_string(),
        display_name: id.to_uppercase(),
        seed_url: format!("https://market.test/impcat/{}.html", id),
        max_pages,
    }
}

pub fn page_url(category: &CategorySpec, page: u32) -> String {
    listing_page_url(&category.seed_url, page).unwrap()
}

pub fn item_url(id: u32) -> String {
    format!("https://market.test/proddetail/{}.html", id)
}

/// A listing page with one card per item id
pub fn listing_page(ids: impl IntoIterator<Item = u32>) -> String {
    let cards: String = ids
        .into_iter()
        .map(|id| {
            format!(
                r#"<div class="card"><a class="titles" href="/proddetail/{id}.html">Item {id}</a><span>₹ {id}00</span></div>"#
            )
        })
        .collect();
    format!("<html><body><div class=\"grid\">{}</div></body></html>", cards)
}

/// Fast, deterministic configuration
pub fn test_config(categories: Vec<CategorySpec>) -> Config {
    Config {
        crawler: CrawlerConfig {
            category_parallelism: 2,
            detail_workers: 4,
            queue_depth: 8,
            checkpoint_interval_secs: 3_600,
            checkpoint_every_items: 1_000,
            shutdown_grace_ms: 500,
            request_timeout_ms: 60_000,
        },
        politeness: PolitenessConfig {
            base_delay_ms: 10,
            jitter_ms: 0,
            cooldown_ms: 100,
            identities: vec!["AgentA/1.0".to_string(), "AgentB/1.0".to_string()],
            ..PolitenessConfig::default()
        },
        retry: RetryConfig {
            transient_attempts: 2,
            requeue_limit: 1,
            listing_attempts: 2,
            backoff_base_ms: 20,
            backoff_max_ms: 100,
        },
        listing: ListingConfig {
            scroll_steps: 0,
            settle_ms: 0,
            scroll_settle_ms: 0,
            ..ListingConfig::default()
        },
        output: OutputConfig {
            records_path: "records.jsonl".to_string(),
            failures_path: "failures.jsonl".to_string(),
            checkpoint_path: "checkpoints.db".to_string(),
        },
        categories,
    }
}

/// Render backend serving canned listing pages
///
/// Unknown URLs render as an empty page.
#[derive(Clone, Default)]
pub struct FakeSite {
    pages: Arc<HashMap<String, Result<String, RenderError>>>,
    navigations: Arc<Mutex<Vec<String>>>,
    unavailable: bool,
}

impl FakeSite {
    pub fn new(pages: Vec<(String, Result<String, RenderError>)>) -> Self {
        Self {
            pages: Arc::new(pages.into_iter().collect()),
            ..Self::default()
        }
    }

    /// A backend that cannot open any session
    pub fn unavailable() -> Self {
        Self {
            unavailable: true,
            ..Self::default()
        }
    }

    pub fn navigations(&self) -> Vec<String> {
        self.navigations.lock().unwrap().clone()
    }
}

#[async_trait]
impl PageRenderer for FakeSite {
    async fn open(&self) -> Result<Box<dyn RenderSession>, RenderError> {
        if self.unavailable {
            return Err(RenderError::Unavailable("no browser".to_string()));
        }
        Ok(Box::new(FakeTab {
            site: self.clone(),
            current: None,
        }))
    }
}

struct FakeTab {
    site: FakeSite,
    current: Option<String>,
}

#[async_trait]
impl RenderSession for FakeTab {
    async fn navigate(
        &mut self,
        url: &str,
        _identity: &str,
        _timeout: Duration,
    ) -> Result<(), RenderError> {
        self.site.navigations.lock().unwrap().push(url.to_string());
        match self.site.pages.get(url) {
            Some(Err(e)) => Err(e.clone()),
            Some(Ok(html)) => {
                self.current = Some(html.clone());
                Ok(())
            }
            None => {
                self.current = Some("<html><body></body></html>".to_string());
                Ok(())
            }
        }
    }

    async fn settle(&mut self, _wait: Duration) -> Result<(), RenderError> {
        Ok(())
    }

    async fn content(&mut self) -> Result<String, RenderError> {
        self.current.clone().ok_or(RenderError::NoPage)
    }

    async fn load_more(&mut self) -> Result<bool, RenderError> {
        Ok(false)
    }

    async fn close(&mut self) {}
}

enum Mode {
    Instant,
    Gated(Arc<Semaphore>),
    Hang,
}

/// Detail backend answering every URL with `DETAIL_PAGE`
pub struct FakeDetails {
    mode: Mode,
    calls: Mutex<Vec<String>>,
}

impl FakeDetails {
    pub fn instant() -> Arc<Self> {
        Self::with_mode(Mode::Instant)
    }

    /// Every fetch waits for one permit of `gate`
    pub fn gated(gate: Arc<Semaphore>) -> Arc<Self> {
        Self::with_mode(Mode::Gated(gate))
    }

    /// Fetches never complete
    pub fn hanging() -> Arc<Self> {
        Self::with_mode(Mode::Hang)
    }

    fn with_mode(mode: Mode) -> Arc<Self> {
        Arc::new(Self {
            mode,
            calls: Mutex::new(Vec::new()),
        })
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ContentFetcher for FakeDetails {
    async fn fetch(
        &self,
        url: &str,
        _identity: &str,
        _timeout: Duration,
    ) -> Result<FetchedContent, FetchError> {
        self.calls.lock().unwrap().push(url.to_string());

        match &self.mode {
            Mode::Instant => {}
            Mode::Gated(gate) => {
                gate.acquire()
                    .await
                    .map_err(|e| FetchError::Network(e.to_string()))?
                    .forget();
            }
            Mode::Hang => std::future::pending::<()>().await,
        }

        Ok(FetchedContent {
            final_url: url.to_string(),
            status: 200,
            body: DETAIL_PAGE.to_string(),
        })
    }
}
