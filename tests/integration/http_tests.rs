//! HTTP backends against a mock marketplace

use crate::common::{listing_page, test_config, DETAIL_PAGE};
use market_harvest::crawler::{
    ContentFetcher, FetchError, HttpContentFetcher, PageRenderer, RenderError,
    StaticPageRenderer,
};
use market_harvest::model::{CategorySpec, FailureKind, FailureRecord, ItemRecord};
use market_harvest::output::{JsonLinesSink, MemorySink};
use market_harvest::storage::{CheckpointStore, MemoryCheckpointStore, SqliteCheckpointStore};
use market_harvest::{CrawlCoordinator, SessionState};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

async fn mount_html(server: &MockServer, at: &str, status: u16, body: &str) {
    Mock::given(method("GET"))
        .and(path(at))
        .respond_with(
            ResponseTemplate::new(status)
                .set_body_string(body.to_string())
                .insert_header("content-type", "text/html"),
        )
        .mount(server)
        .await;
}

fn read_lines<T: serde::de::DeserializeOwned>(path: &std::path::Path) -> Vec<T> {
    std::fs::read_to_string(path)
        .unwrap()
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect()
}

#[tokio::test]
async fn test_fetcher_sends_identity_and_reports_status() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/proddetail/1.html"))
        .and(header("user-agent", "AgentA/1.0"))
        .respond_with(ResponseTemplate::new(200).set_body_string(DETAIL_PAGE))
        .expect(1)
        .mount(&server)
        .await;
    mount_html(&server, "/proddetail/2.html", 404, "gone").await;

    let fetcher = HttpContentFetcher::new(Duration::from_secs(5)).unwrap();

    let ok = fetcher
        .fetch(
            &format!("{}/proddetail/1.html", server.uri()),
            "AgentA/1.0",
            Duration::from_secs(5),
        )
        .await
        .unwrap();
    assert_eq!(ok.status, 200);
    assert!(ok.body.contains("Borewell Pump"));

    let missing = fetcher
        .fetch(
            &format!("{}/proddetail/2.html", server.uri()),
            "AgentA/1.0",
            Duration::from_secs(5),
        )
        .await
        .unwrap();
    assert_eq!(missing.status, 404);
}

#[tokio::test]
async fn test_fetcher_times_out() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(2)))
        .mount(&server)
        .await;

    let fetcher = HttpContentFetcher::new(Duration::from_secs(5)).unwrap();
    let result = fetcher
        .fetch(&server.uri(), "AgentA/1.0", Duration::from_millis(100))
        .await;

    assert_eq!(result.unwrap_err(), FetchError::Timeout);
}

#[tokio::test]
async fn test_static_renderer_rejects_error_pages() {
    let server = MockServer::start().await;
    mount_html(&server, "/impcat/pumps.html", 503, "busy").await;

    let renderer = StaticPageRenderer::new(Duration::from_secs(5)).unwrap();
    let mut session = renderer.open().await.unwrap();

    let result = session
        .navigate(
            &format!("{}/impcat/pumps.html", server.uri()),
            "AgentA/1.0",
            Duration::from_secs(5),
        )
        .await;

    assert_eq!(result, Err(RenderError::Status(503)));
    assert_eq!(session.content().await, Err(RenderError::NoPage));
}

#[tokio::test]
async fn test_crawl_against_mock_marketplace() {
    let server = MockServer::start().await;
    // Later pages repeat the first one, which ends the category
    mount_html(&server, "/impcat/pumps.html", 200, &listing_page([1, 2, 3])).await;
    mount_html(&server, "/proddetail/1.html", 200, DETAIL_PAGE).await;
    mount_html(&server, "/proddetail/2.html", 200, DETAIL_PAGE).await;
    mount_html(&server, "/proddetail/3.html", 404, "not found").await;

    let dir = TempDir::new().unwrap();
    let records_path = dir.path().join("out/records.jsonl");
    let failures_path = dir.path().join("out/failures.jsonl");
    let db_path = dir.path().join("checkpoints.db");

    let pumps = CategorySpec {
        id: "pumps".to_string(),
        display_name: "Pumps".to_string(),
        seed_url: format!("{}/impcat/pumps.html", server.uri()),
        max_pages: 5,
    };
    let timeout = Duration::from_secs(5);

    let mut coordinator = CrawlCoordinator::new(
        test_config(vec![pumps]),
        Arc::new(StaticPageRenderer::new(timeout).unwrap()),
        Arc::new(HttpContentFetcher::new(timeout).unwrap()),
        Arc::new(JsonLinesSink::open(&records_path, &failures_path, true).unwrap()),
        Box::new(SqliteCheckpointStore::new(&db_path).unwrap()),
    )
    .with_config_hash("mock");

    let summary = coordinator
        .start(None, CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(summary.state, SessionState::Completed);
    assert_eq!(summary.items_complete, 2);
    assert_eq!(summary.failures.get(FailureKind::Permanent), 1);
    assert_eq!(summary.pages_visited, 3);

    let records: Vec<ItemRecord> = read_lines(&records_path);
    assert_eq!(records.len(), 2);
    assert!(records.iter().all(|r| r.supplier.is_some()));

    let failures: Vec<FailureRecord> = read_lines(&failures_path);
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].kind, FailureKind::Permanent);
    assert!(failures[0].url.ends_with("/proddetail/3.html"));

    let store = SqliteCheckpointStore::new(&db_path).unwrap();
    let checkpoint = store.load_latest().unwrap().unwrap();
    assert_eq!(checkpoint.session.state, SessionState::Completed);
    assert_eq!(checkpoint.session.config_hash, "mock");
    assert_eq!(checkpoint.ledger.done.len(), 3);
}

#[tokio::test]
async fn test_unreachable_site_aborts_before_crawling() {
    let pumps = CategorySpec {
        id: "pumps".to_string(),
        display_name: "Pumps".to_string(),
        seed_url: "http://127.0.0.1:1/impcat/pumps.html".to_string(),
        max_pages: 5,
    };
    let timeout = Duration::from_secs(2);
    let sink = MemorySink::new();

    let mut coordinator = CrawlCoordinator::new(
        test_config(vec![pumps]),
        Arc::new(StaticPageRenderer::new(timeout).unwrap()),
        Arc::new(HttpContentFetcher::new(timeout).unwrap()),
        Arc::new(sink.clone()),
        Box::new(MemoryCheckpointStore::new()),
    );

    let summary = coordinator
        .start(None, CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(summary.state, SessionState::Aborted);
    assert_eq!(summary.failures.get(FailureKind::Fatal), 1);
    assert_eq!(summary.pages_visited, 0);

    let failures = sink.failures();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].kind, FailureKind::Fatal);
    assert!(failures[0].url.ends_with("/impcat/pumps.html"));
}
