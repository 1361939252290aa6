//! Crash and resume: unfinished claims are re-queued, finished ones never are

use crate::common::{category, listing_page, page_url, test_config, FakeDetails, FakeSite};
use market_harvest::model::ItemRecord;
use market_harvest::output::{JsonLinesSink, MemorySink};
use market_harvest::storage::{
    Checkpoint, CheckpointStore, MemoryCheckpointStore, SqliteCheckpointStore, StorageResult,
};
use market_harvest::{CrawlCoordinator, SessionState};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

/// Records, at every save, how many records are on disk and how many items
/// the checkpoint lists as done
#[derive(Clone)]
struct OnDiskAtSave {
    inner: MemoryCheckpointStore,
    records_path: PathBuf,
    seen: Arc<Mutex<Vec<(usize, usize)>>>,
}

impl OnDiskAtSave {
    fn new(records_path: &Path) -> Self {
        Self {
            inner: MemoryCheckpointStore::new(),
            records_path: records_path.to_path_buf(),
            seen: Arc::new(Mutex::new(Vec::new())),
        }
    }

    fn seen(&self) -> Vec<(usize, usize)> {
        self.seen.lock().unwrap().clone()
    }
}

impl CheckpointStore for OnDiskAtSave {
    fn save(&mut self, checkpoint: &Checkpoint) -> StorageResult<()> {
        let on_disk = std::fs::read_to_string(&self.records_path)
            .map(|text| text.lines().count())
            .unwrap_or(0);
        self.seen
            .lock()
            .unwrap()
            .push((on_disk, checkpoint.ledger.done.len()));
        self.inner.save(checkpoint)
    }

    fn load_latest(&self) -> StorageResult<Option<Checkpoint>> {
        self.inner.load_latest()
    }

    fn load_session(&self, session_id: &str) -> StorageResult<Checkpoint> {
        self.inner.load_session(session_id)
    }
}

fn record_urls(path: &Path) -> Vec<String> {
    std::fs::read_to_string(path)
        .unwrap()
        .lines()
        .map(|line| serde_json::from_str::<ItemRecord>(line).unwrap().item_url)
        .collect()
}

#[tokio::test(start_paused = true)]
async fn test_resume_from_mid_drain_checkpoint() {
    let pumps = category("pumps", 1);
    let site = FakeSite::new(vec![(page_url(&pumps, 1), Ok(listing_page(1..=10)))]);
    let store = MemoryCheckpointStore::new();

    let mut config = test_config(vec![pumps]);
    config.crawler.detail_workers = 1;
    config.crawler.queue_depth = 16;
    config.crawler.checkpoint_every_items = 3;

    let mut first = CrawlCoordinator::new(
        config.clone(),
        Arc::new(site.clone()),
        FakeDetails::instant(),
        Arc::new(MemorySink::new()),
        Box::new(store.clone()),
    );
    first.start(None, CancellationToken::new()).await.unwrap();

    // Pretend the process died right after this checkpoint
    let crash_point = store
        .history()
        .into_iter()
        .find(|c| !c.ledger.pending.is_empty() && !c.ledger.done.is_empty())
        .expect("a checkpoint taken while the queue was draining");

    let done: HashSet<String> = crash_point
        .ledger
        .done
        .iter()
        .map(|entry| entry.item_url.clone())
        .collect();
    let pending: HashSet<String> = crash_point
        .ledger
        .pending
        .iter()
        .map(|claim| claim.stub.item_url.clone())
        .collect();

    let sink = MemorySink::new();
    let mut resumed = CrawlCoordinator::new(
        config,
        Arc::new(site),
        FakeDetails::instant(),
        Arc::new(sink.clone()),
        Box::new(MemoryCheckpointStore::new()),
    );
    let summary = resumed
        .start(Some(crash_point.clone()), CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(summary.state, SessionState::Completed);
    assert_eq!(summary.session_id, crash_point.session.session_id);

    let records = sink.records();
    let delivered: HashSet<String> = records.iter().map(|r| r.item_url.clone()).collect();
    assert_eq!(records.len(), pending.len());
    assert_eq!(delivered, pending);
    assert!(delivered.is_disjoint(&done));
    assert_eq!(done.len() + delivered.len(), 10);
}

#[tokio::test(start_paused = true)]
async fn test_aborted_session_resumes_from_sqlite() {
    let dir = TempDir::new().unwrap();
    let db_path = dir.path().join("checkpoints.db");

    let pumps = category("pumps", 1);
    let site = FakeSite::new(vec![(page_url(&pumps, 1), Ok(listing_page(1..=6)))]);

    let mut config = test_config(vec![pumps]);
    config.crawler.detail_workers = 2;

    let mut first = CrawlCoordinator::new(
        config.clone(),
        Arc::new(site.clone()),
        FakeDetails::hanging(),
        Arc::new(MemorySink::new()),
        Box::new(SqliteCheckpointStore::new(&db_path).unwrap()),
    );
    let stop = CancellationToken::new();
    let run = {
        let stop = stop.clone();
        tokio::spawn(async move { first.start(None, stop).await })
    };
    tokio::time::sleep(Duration::from_secs(1)).await;
    stop.cancel();
    assert_eq!(run.await.unwrap().unwrap().state, SessionState::Aborted);

    let store = SqliteCheckpointStore::new(&db_path).unwrap();
    let checkpoint = store.load_latest().unwrap().unwrap();
    assert_eq!(checkpoint.session.state, SessionState::Aborted);
    assert_eq!(checkpoint.ledger.pending.len(), 6);
    assert_eq!(checkpoint.ledger.visited_pages.len(), 1);

    let navigated_before = site.navigations().len();
    let sink = MemorySink::new();
    let mut resumed = CrawlCoordinator::new(
        config,
        Arc::new(site.clone()),
        FakeDetails::instant(),
        Arc::new(sink.clone()),
        Box::new(store),
    );
    let summary = resumed
        .start(Some(checkpoint), CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(summary.state, SessionState::Completed);
    assert_eq!(sink.records().len(), 6);
    assert_eq!(summary.pending_claims, 0);
    // The listing page was completed before the stop
    assert_eq!(site.navigations().len(), navigated_before);
}

#[tokio::test(start_paused = true)]
async fn test_checkpointed_done_items_are_on_disk() {
    let dir = TempDir::new().unwrap();
    let records_path = dir.path().join("records.jsonl");
    let failures_path = dir.path().join("failures.jsonl");

    let pumps = category("pumps", 1);
    let site = FakeSite::new(vec![(page_url(&pumps, 1), Ok(listing_page(1..=10)))]);

    let mut config = test_config(vec![pumps]);
    config.crawler.detail_workers = 1;
    config.crawler.queue_depth = 16;
    config.crawler.checkpoint_every_items = 3;

    let store = OnDiskAtSave::new(&records_path);
    let mut coordinator = CrawlCoordinator::new(
        config,
        Arc::new(site),
        FakeDetails::instant(),
        Arc::new(JsonLinesSink::open(&records_path, &failures_path, true).unwrap()),
        Box::new(store.clone()),
    );
    let summary = coordinator
        .start(None, CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(summary.state, SessionState::Completed);
    let seen = store.seen();
    assert!(seen.len() >= 2);
    for (on_disk, done) in seen {
        assert!(on_disk >= done, "{} done but {} records on disk", done, on_disk);
    }
}

#[tokio::test(start_paused = true)]
async fn test_resume_skips_items_written_after_the_checkpoint() {
    let dir = TempDir::new().unwrap();
    let records_path = dir.path().join("records.jsonl");
    let failures_path = dir.path().join("failures.jsonl");

    let pumps = category("pumps", 1);
    let site = FakeSite::new(vec![(page_url(&pumps, 1), Ok(listing_page(1..=10)))]);

    let mut config = test_config(vec![pumps]);
    config.crawler.detail_workers = 1;
    config.crawler.queue_depth = 16;
    config.crawler.checkpoint_every_items = 3;

    let store = MemoryCheckpointStore::new();
    let mut first = CrawlCoordinator::new(
        config.clone(),
        Arc::new(site.clone()),
        FakeDetails::instant(),
        Arc::new(JsonLinesSink::open(&records_path, &failures_path, true).unwrap()),
        Box::new(store.clone()),
    );
    first.start(None, CancellationToken::new()).await.unwrap();
    assert_eq!(record_urls(&records_path).len(), 10);

    // Every record reached the file but the process died right after an
    // earlier checkpoint that still lists some of them as pending
    let crash_point = store
        .history()
        .into_iter()
        .find(|c| !c.ledger.pending.is_empty() && !c.ledger.done.is_empty())
        .expect("a checkpoint taken while the queue was draining");

    let details = FakeDetails::instant();
    let mut resumed = CrawlCoordinator::new(
        config,
        Arc::new(site),
        details.clone(),
        Arc::new(JsonLinesSink::open(&records_path, &failures_path, false).unwrap()),
        Box::new(MemoryCheckpointStore::new()),
    );
    let summary = resumed
        .start(Some(crash_point), CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(summary.state, SessionState::Completed);
    assert_eq!(summary.pending_claims, 0);
    assert!(details.calls().is_empty());

    let urls = record_urls(&records_path);
    let unique: HashSet<&String> = urls.iter().collect();
    assert_eq!(urls.len(), 10);
    assert_eq!(unique.len(), 10);
}
