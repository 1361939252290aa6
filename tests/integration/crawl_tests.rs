//! End-to-end sessions against scripted backends

use crate::common::{
    category, item_url, listing_page, page_url, test_config, FakeDetails, FakeSite,
};
use market_harvest::crawler::RenderError;
use market_harvest::model::{FailureKind, RecordQuality};
use market_harvest::output::MemorySink;
use market_harvest::state::CategoryStatus;
use market_harvest::storage::{CheckpointStore, MemoryCheckpointStore};
use market_harvest::{CrawlCoordinator, SessionState};
use std::collections::HashSet;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

#[tokio::test(start_paused = true)]
async fn test_overlapping_categories_enrich_each_item_once() {
    let pumps = category("pumps", 5);
    let valves = category("valves", 5);
    let site = FakeSite::new(vec![
        (page_url(&pumps, 1), Ok(listing_page([1, 2, 3]))),
        (page_url(&pumps, 2), Ok(listing_page([3, 4]))),
        (page_url(&valves, 1), Ok(listing_page([4, 5, 1]))),
    ]);
    let details = FakeDetails::instant();
    let sink = MemorySink::new();
    let store = MemoryCheckpointStore::new();

    let mut coordinator = CrawlCoordinator::new(
        test_config(vec![pumps, valves]),
        Arc::new(site.clone()),
        details.clone(),
        Arc::new(sink.clone()),
        Box::new(store.clone()),
    )
    .with_config_hash("hash-1");

    let summary = coordinator
        .start(None, CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(summary.state, SessionState::Completed);
    assert_eq!(summary.items_complete, 5);
    assert_eq!(summary.failures.total(), 0);
    assert_eq!(summary.pending_claims, 0);
    assert!(summary
        .categories
        .iter()
        .all(|c| c.status == CategoryStatus::Exhausted));

    let records = sink.records();
    let urls: HashSet<String> = records.iter().map(|r| r.item_url.clone()).collect();
    assert_eq!(records.len(), 5);
    assert_eq!(urls.len(), 5);
    assert!(records.iter().all(|r| r.quality == RecordQuality::Complete));
    assert_eq!(details.calls().len(), 5);
    assert!(sink.flush_count() >= 1);

    let last = store.load_latest().unwrap().unwrap();
    assert_eq!(last.session.state, SessionState::Completed);
    assert_eq!(last.session.config_hash, "hash-1");
    assert_eq!(last.ledger.done.len(), 5);
    assert!(last.ledger.pending.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_unavailable_renderer_aborts_session() {
    let sink = MemorySink::new();
    let store = MemoryCheckpointStore::new();

    let mut coordinator = CrawlCoordinator::new(
        test_config(vec![category("pumps", 3)]),
        Arc::new(FakeSite::unavailable()),
        FakeDetails::instant(),
        Arc::new(sink.clone()),
        Box::new(store.clone()),
    );

    let summary = coordinator
        .start(None, CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(summary.state, SessionState::Aborted);
    assert_eq!(summary.failures.get(FailureKind::Fatal), 1);
    assert_eq!(sink.failures()[0].kind, FailureKind::Fatal);
    assert!(sink.records().is_empty());

    assert_eq!(store.save_count(), 1);
    assert_eq!(
        store.load_latest().unwrap().unwrap().session.state,
        SessionState::Aborted
    );
}

#[tokio::test(start_paused = true)]
async fn test_structural_failure_ends_only_its_category() {
    let pumps = category("pumps", 5);
    let valves = category("valves", 5);
    let site = FakeSite::new(vec![
        (page_url(&pumps, 1), Ok(listing_page([1, 2]))),
        (page_url(&pumps, 2), Err(RenderError::Status(503))),
        (page_url(&valves, 1), Ok(listing_page([10, 11]))),
    ]);
    let sink = MemorySink::new();

    let mut coordinator = CrawlCoordinator::new(
        test_config(vec![pumps.clone(), valves]),
        Arc::new(site.clone()),
        FakeDetails::instant(),
        Arc::new(sink.clone()),
        Box::new(MemoryCheckpointStore::new()),
    );

    let summary = coordinator
        .start(None, CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(summary.state, SessionState::Completed);
    assert_eq!(summary.categories_with_status(CategoryStatus::Partial), vec!["pumps"]);
    assert_eq!(
        summary.categories_with_status(CategoryStatus::Exhausted),
        vec!["valves"]
    );
    assert_eq!(summary.items_enriched(), 4);
    assert_eq!(summary.failures.get(FailureKind::Structural), 1);

    let failures = sink.failures();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].kind, FailureKind::Structural);
    assert_eq!(failures[0].url, page_url(&pumps, 2));

    // Both listing attempts hit the failing page
    let retries = site
        .navigations()
        .iter()
        .filter(|url| **url == page_url(&pumps, 2))
        .count();
    assert_eq!(retries, 2);
}

#[tokio::test(start_paused = true)]
async fn test_records_keep_listing_context() {
    let pumps = category("pumps", 1);
    let site = FakeSite::new(vec![(page_url(&pumps, 1), Ok(listing_page([7])))]);
    let sink = MemorySink::new();

    let mut coordinator = CrawlCoordinator::new(
        test_config(vec![pumps]),
        Arc::new(site),
        FakeDetails::instant(),
        Arc::new(sink.clone()),
        Box::new(MemoryCheckpointStore::new()),
    );
    coordinator
        .start(None, CancellationToken::new())
        .await
        .unwrap();

    let records = sink.records();
    assert_eq!(records.len(), 1);
    let record = &records[0];
    assert_eq!(record.item_url, item_url(7));
    assert_eq!(record.category_id, "pumps");
    assert_eq!(record.title.as_deref(), Some("Borewell Pump"));
    assert_eq!(record.price_raw.as_deref(), Some("₹ 12,500"));
    assert_eq!(record.location.as_deref(), Some("Tamil Nadu"));
    assert_eq!(record.attempts, 1);
}
