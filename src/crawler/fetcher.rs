//! HTTP backends
//!
//! - `HttpContentFetcher`: plain GET for item detail pages
//! - `StaticPageRenderer`: render sessions for server-rendered listing pages,
//!   where "load more" has nothing to do

use crate::crawler::backend::{
    ContentFetcher, FetchError, FetchedContent, PageRenderer, RenderError, RenderSession,
};
use async_trait::async_trait;
use reqwest::header::USER_AGENT;
use reqwest::{redirect::Policy, Client};
use std::time::Duration;

/// Builds the HTTP client shared by both backends
///
/// The outbound identity is set per request, so the client carries no
/// default user agent.
///
/// # Arguments
///
/// * `timeout` - Default request timeout; callers pass their own per request
pub fn build_http_client(timeout: Duration) -> Result<Client, reqwest::Error> {
    Client::builder()
        .timeout(timeout)
        .connect_timeout(timeout.min(Duration::from_secs(10)))
        .redirect(Policy::limited(10))
        .gzip(true)
        .brotli(true)
        .build()
}

fn classify(error: reqwest::Error) -> FetchError {
    if error.is_timeout() {
        FetchError::Timeout
    } else if error.is_connect() {
        FetchError::Network(format!("connection failed: {}", error))
    } else {
        FetchError::Network(error.to_string())
    }
}

async fn get(
    client: &Client,
    url: &str,
    identity: &str,
    timeout: Duration,
) -> Result<FetchedContent, FetchError> {
    let response = client
        .get(url)
        .header(USER_AGENT, identity)
        .timeout(timeout)
        .send()
        .await
        .map_err(classify)?;

    let status = response.status().as_u16();
    let final_url = response.url().to_string();
    let body = response.text().await.map_err(classify)?;

    Ok(FetchedContent {
        final_url,
        status,
        body,
    })
}

/// Lightweight fetcher for item detail pages
#[derive(Debug, Clone)]
pub struct HttpContentFetcher {
    client: Client,
}

impl HttpContentFetcher {
    pub fn new(timeout: Duration) -> Result<Self, reqwest::Error> {
        Ok(Self {
            client: build_http_client(timeout)?,
        })
    }

    pub fn with_client(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ContentFetcher for HttpContentFetcher {
    async fn fetch(
        &self,
        url: &str,
        identity: &str,
        timeout: Duration,
    ) -> Result<FetchedContent, FetchError> {
        get(&self.client, url, identity, timeout).await
    }
}

/// Renderer for listing pages that need no script execution
#[derive(Debug, Clone)]
pub struct StaticPageRenderer {
    client: Client,
}

impl StaticPageRenderer {
    pub fn new(timeout: Duration) -> Result<Self, reqwest::Error> {
        Ok(Self {
            client: build_http_client(timeout)?,
        })
    }

    pub fn with_client(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl PageRenderer for StaticPageRenderer {
    async fn open(&self) -> Result<Box<dyn RenderSession>, RenderError> {
        Ok(Box::new(StaticRenderSession {
            client: self.client.clone(),
            html: None,
        }))
    }

    async fn probe(&self, url: &str, identity: &str, timeout: Duration) -> Result<(), RenderError> {
        self.client
            .head(url)
            .header(USER_AGENT, identity)
            .timeout(timeout)
            .send()
            .await
            .map(|_| ())
            .map_err(|e| RenderError::Unavailable(classify(e).to_string()))
    }
}

struct StaticRenderSession {
    client: Client,
    html: Option<String>,
}

#[async_trait]
impl RenderSession for StaticRenderSession {
    async fn navigate(
        &mut self,
        url: &str,
        identity: &str,
        timeout: Duration,
    ) -> Result<(), RenderError> {
        self.html = None;

        let page = get(&self.client, url, identity, timeout)
            .await
            .map_err(|e| match e {
                FetchError::Timeout => RenderError::Timeout,
                FetchError::Network(message) => RenderError::Navigation(message),
            })?;

        if !(200..300).contains(&page.status) {
            return Err(RenderError::Status(page.status));
        }

        self.html = Some(page.body);
        Ok(())
    }

    async fn settle(&mut self, _wait: Duration) -> Result<(), RenderError> {
        Ok(())
    }

    async fn content(&mut self) -> Result<String, RenderError> {
        self.html.clone().ok_or(RenderError::NoPage)
    }

    async fn load_more(&mut self) -> Result<bool, RenderError> {
        if self.html.is_none() {
            return Err(RenderError::NoPage);
        }
        Ok(false)
    }

    async fn close(&mut self) {
        self.html = None;
    }
}
