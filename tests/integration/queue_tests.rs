//! Backpressure and stop-signal behavior of the work queue

use crate::common::{category, listing_page, page_url, test_config, FakeDetails, FakeSite};
use market_harvest::output::MemorySink;
use market_harvest::storage::{CheckpointStore, MemoryCheckpointStore};
use market_harvest::{CrawlCoordinator, SessionState};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

#[tokio::test(start_paused = true)]
async fn test_full_queue_suspends_listing_production() {
    let pumps = category("pumps", 10);
    let site = FakeSite::new(vec![
        (page_url(&pumps, 1), Ok(listing_page(1..=20))),
        (page_url(&pumps, 2), Ok(listing_page(21..=25))),
    ]);
    let gate = Arc::new(Semaphore::new(0));
    let details = FakeDetails::gated(gate.clone());
    let sink = MemorySink::new();

    let mut config = test_config(vec![pumps.clone()]);
    config.crawler.detail_workers = 1;
    config.crawler.queue_depth = 5;

    let mut coordinator = CrawlCoordinator::new(
        config,
        Arc::new(site.clone()),
        details.clone(),
        Arc::new(sink.clone()),
        Box::new(MemoryCheckpointStore::new()),
    );
    let session = tokio::spawn(async move {
        coordinator.start(None, CancellationToken::new()).await
    });

    tokio::time::sleep(Duration::from_secs(5)).await;

    // One stub in flight, five queued, the producer waiting on the sixth
    assert_eq!(details.calls().len(), 1);
    assert_eq!(site.navigations(), vec![page_url(&pumps, 1)]);

    gate.add_permits(1_000);
    let summary = session.await.unwrap().unwrap();

    assert_eq!(summary.state, SessionState::Completed);
    let records = sink.records();
    let urls: HashSet<String> = records.iter().map(|r| r.item_url.clone()).collect();
    assert_eq!(records.len(), 25);
    assert_eq!(urls.len(), 25);
    assert!(site.navigations().contains(&page_url(&pumps, 2)));
}

#[tokio::test(start_paused = true)]
async fn test_stop_releases_in_flight_and_keeps_queued_claims() {
    let pumps = category("pumps", 1);
    let site = FakeSite::new(vec![(page_url(&pumps, 1), Ok(listing_page(1..=14)))]);
    let details = FakeDetails::hanging();
    let sink = MemorySink::new();
    let store = MemoryCheckpointStore::new();

    let mut config = test_config(vec![pumps]);
    config.crawler.detail_workers = 4;
    config.crawler.queue_depth = 10;

    let mut coordinator = CrawlCoordinator::new(
        config,
        Arc::new(site),
        details.clone(),
        Arc::new(sink.clone()),
        Box::new(store.clone()),
    );
    let stop = CancellationToken::new();
    let session = {
        let stop = stop.clone();
        tokio::spawn(async move { coordinator.start(None, stop).await })
    };

    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(details.calls().len(), 4);

    stop.cancel();
    let summary = session.await.unwrap().unwrap();

    assert_eq!(summary.state, SessionState::Aborted);
    assert_eq!(summary.pending_claims, 14);
    assert!(sink.records().is_empty());

    let checkpoint = store.load_latest().unwrap().unwrap();
    assert_eq!(checkpoint.session.state, SessionState::Aborted);
    assert!(checkpoint.ledger.done.is_empty());
    assert_eq!(checkpoint.ledger.pending.len(), 14);

    let pending: HashSet<String> = checkpoint
        .ledger
        .pending
        .iter()
        .map(|claim| claim.stub.item_url.clone())
        .collect();
    assert!(details.calls().iter().all(|url| pending.contains(url)));
}
