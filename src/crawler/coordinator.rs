//! Crawl coordinator - session lifecycle and the producer/worker pipeline
//!
//! This module owns the main crawl loop:
//! - Restoring the session and ledger from a checkpoint
//! - Driving one listing crawler per category, up to the category budget
//! - Feeding claimed stubs through the bounded work queue to the workers
//! - Applying progress events to the session and checkpointing it
//! - Handling the stop signal and producing the final summary

use crate::config::Config;
use crate::crawler::backend::{ContentFetcher, PageRenderer};
use crate::crawler::enricher::DetailEnricher;
use crate::crawler::extract::{FieldRules, ListingExtractor};
use crate::crawler::listing::{ListingCrawler, ListingDeps, TraversalEnd};
use crate::crawler::worker::{spawn_workers, CrawlEvent, WorkerContext};
use crate::ledger::{DedupLedger, DoneOutcome};
use crate::model::{CategorySpec, FailureKind, FailureRecord, ItemStub, ListingPageCursor};
use crate::output::{OutputSink, SessionSummary};
use crate::politeness::PolitenessController;
use crate::state::{CategoryStatus, CrawlSession, SessionState};
use crate::storage::{Checkpoint, CheckpointStore};
use crate::url::listing_page_url;
use crate::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex, Semaphore};
use tokio::task::JoinSet;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// Drives a crawl session from start (or resume) to its final state
pub struct CrawlCoordinator {
    config: Arc<Config>,
    config_hash: String,
    renderer: Arc<dyn PageRenderer>,
    fetcher: Arc<dyn ContentFetcher>,
    sink: Arc<dyn OutputSink>,
    store: Box<dyn CheckpointStore>,
}

/// Shared by the producer side: one task per category plus the re-queue
struct ProducerContext {
    renderer: Arc<dyn PageRenderer>,
    deps: ListingDeps,
    sink: Arc<dyn OutputSink>,
    queue: mpsc::Sender<ItemStub>,
    events: mpsc::UnboundedSender<CrawlEvent>,
    halt: CancellationToken,
}

impl ProducerContext {
    fn emit(&self, event: CrawlEvent) {
        let _ = self.events.send(event);
    }

    /// Sends a claimed stub to the workers, waiting while the queue is full
    ///
    /// Returns false if the session is stopping.
    async fn enqueue(&self, stub: ItemStub) -> bool {
        tokio::select! {
            biased;
            _ = self.halt.cancelled() => false,
            sent = self.queue.send(stub) => sent.is_ok(),
        }
    }

    /// Writes a structural failure for a category and reports it
    fn record_structural(&self, spec: &CategorySpec, page_index: u32, reason: &str) {
        let url = listing_page_url(&spec.seed_url, page_index)
            .unwrap_or_else(|_| spec.seed_url.clone());
        let failure = FailureRecord::new(
            url,
            spec.id.as_str(),
            self.deps.retry.listing_attempts,
            FailureKind::Structural,
            reason,
        );

        match self.sink.record_failure(&failure) {
            Ok(()) => self.emit(CrawlEvent::Failed {
                kind: FailureKind::Structural,
            }),
            Err(e) => self.emit(CrawlEvent::SinkFailed {
                message: e.to_string(),
            }),
        }
    }
}

impl CrawlCoordinator {
    /// Creates a new coordinator
    ///
    /// # Arguments
    ///
    /// * `config` - The validated configuration
    /// * `renderer` - Render backend for listing pages
    /// * `fetcher` - Fetch backend for detail pages
    /// * `sink` - Receives records and failure-log entries
    /// * `store` - Receives checkpoints
    pub fn new(
        config: Config,
        renderer: Arc<dyn PageRenderer>,
        fetcher: Arc<dyn ContentFetcher>,
        sink: Arc<dyn OutputSink>,
        store: Box<dyn CheckpointStore>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            config_hash: String::new(),
            renderer,
            fetcher,
            sink,
            store,
        }
    }

    /// Sets the hash recorded in new sessions and compared on resume
    pub fn with_config_hash(mut self, config_hash: impl Into<String>) -> Self {
        self.config_hash = config_hash.into();
        self
    }

    /// Runs a session to completion or until `stop` is cancelled
    ///
    /// # Arguments
    ///
    /// * `resume_from` - Checkpoint of an interrupted session, if any
    /// * `stop` - External stop signal
    ///
    /// # Returns
    ///
    /// * `Ok(SessionSummary)` - The session ended as `Completed` or `Aborted`
    /// * `Err(HarvestError)` - Setup failed or the final checkpoint could
    ///   not be written
    pub async fn start(
        &mut self,
        resume_from: Option<Checkpoint>,
        stop: CancellationToken,
    ) -> Result<SessionSummary> {
        let config = self.config.clone();
        let ledger = Arc::new(DedupLedger::new(config.retry.requeue_limit));

        let mut session = match resume_from {
            Some(checkpoint) => {
                if checkpoint.session.config_hash != self.config_hash {
                    tracing::warn!(
                        "Configuration changed since session {} was checkpointed",
                        checkpoint.session.session_id
                    );
                }
                ledger.restore(checkpoint.ledger);
                let mut session = checkpoint.session.resume(&config.categories);
                self.settle_persisted(&mut session, &ledger)?;
                tracing::info!(
                    "Resuming session {} ({} pending claims)",
                    session.session_id,
                    ledger.stats().pending
                );
                session
            }
            None => {
                let session = CrawlSession::new(&self.config_hash, &config.categories);
                tracing::info!("Starting session {}", session.session_id);
                session
            }
        };

        let timeout = Duration::from_millis(config.crawler.request_timeout_ms);
        let politeness = Arc::new(PolitenessController::new(config.politeness.clone()));
        let extractor = Arc::new(ListingExtractor::new(&config.listing)?);
        let rules = Arc::new(FieldRules::standard()?);

        session.transition(SessionState::Running)?;

        let renderer = self.renderer.clone();
        let probe_url = config
            .categories
            .first()
            .map(|spec| spec.seed_url.clone())
            .unwrap_or_default();
        if let Err(e) = renderer
            .probe(&probe_url, &politeness.next_identity(), timeout)
            .await
        {
            tracing::error!("Cannot establish a rendering session: {}", e);
            let failure = FailureRecord::new(
                probe_url,
                "",
                1,
                FailureKind::Fatal,
                e.to_string(),
            );
            if let Err(e) = self.sink.record_failure(&failure) {
                tracing::error!("Failed to write failure log: {}", e);
            }
            session.record_failure(FailureKind::Fatal);
            return self.finish(session, &ledger, SessionState::Aborted);
        }

        // Sink failures stop the session the same way the external signal does
        let halt = stop.child_token();
        let (queue_tx, queue_rx) = mpsc::channel(config.crawler.queue_depth.max(1) as usize);
        let (events_tx, mut events_rx) = mpsc::unbounded_channel();

        let enricher = Arc::new(DetailEnricher::new(
            politeness.clone(),
            self.fetcher.clone(),
            rules,
            config.retry.clone(),
            timeout,
        ));
        let mut workers = spawn_workers(
            config.crawler.detail_workers as usize,
            Arc::new(WorkerContext {
                enricher,
                ledger: ledger.clone(),
                sink: self.sink.clone(),
                retry: config.retry.clone(),
                events: events_tx.clone(),
                stop: halt.clone(),
                grace: Duration::from_millis(config.crawler.shutdown_grace_ms),
            }),
            Arc::new(Mutex::new(queue_rx)),
        );

        let producer = Arc::new(ProducerContext {
            renderer: self.renderer.clone(),
            deps: ListingDeps {
                politeness,
                ledger: ledger.clone(),
                extractor,
                listing: config.listing.clone(),
                retry: config.retry.clone(),
                timeout,
            },
            sink: self.sink.clone(),
            queue: queue_tx,
            events: events_tx,
            halt: halt.clone(),
        });
        let plan = traversal_plan(&session, &config.categories);
        tracing::info!(
            "Traversing {} of {} categories",
            plan.len(),
            config.categories.len()
        );
        let producer_task = tokio::spawn(produce(
            producer,
            ledger.pending(),
            plan,
            config.crawler.category_parallelism.max(1) as usize,
        ));

        let period = Duration::from_secs(config.crawler.checkpoint_interval_secs.max(1));
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let started = Instant::now();
        let mut since_checkpoint = 0u64;
        let mut sink_failure = None;

        loop {
            tokio::select! {
                event = events_rx.recv() => {
                    let Some(event) = event else {
                        break;
                    };

                    match event {
                        CrawlEvent::PageVisited { category_id, page_index, new_items } => {
                            session.record_page(&category_id, page_index, new_items);
                        }
                        CrawlEvent::CategoryFinished { category_id, status } => {
                            session.finish_category(&category_id, status);
                        }
                        CrawlEvent::Delivered { quality } => {
                            session.record_delivery(quality);
                            since_checkpoint += 1;
                            self.log_progress(&session, &ledger, started);
                        }
                        CrawlEvent::Failed { kind } => {
                            session.record_failure(kind);
                            since_checkpoint += 1;
                        }
                        CrawlEvent::SinkFailed { message } => {
                            if sink_failure.is_none() {
                                tracing::error!("Output sink failed, stopping: {}", message);
                                sink_failure = Some(message);
                                halt.cancel();
                            }
                        }
                    }

                    if since_checkpoint >= config.crawler.checkpoint_every_items.max(1) {
                        since_checkpoint = 0;
                        self.checkpoint(&mut session, &ledger);
                    }
                }
                _ = ticker.tick() => {
                    since_checkpoint = 0;
                    self.checkpoint(&mut session, &ledger);
                }
            }
        }

        if let Err(e) = producer_task.await {
            tracing::error!("Listing producer task failed: {}", e);
        }
        while let Some(joined) = workers.join_next().await {
            if let Err(e) = joined {
                tracing::error!("Worker task failed: {}", e);
            }
        }

        let final_state = if stop.is_cancelled() || sink_failure.is_some() {
            session.mark_unreached_skipped();
            SessionState::Aborted
        } else if !session.all_categories_finished() {
            tracing::error!("Listing producers ended before every category finished");
            session.mark_unreached_skipped();
            SessionState::Aborted
        } else {
            SessionState::Completed
        };

        self.finish(session, &ledger, final_state)
    }

    /// Writes a periodic checkpoint
    ///
    /// A failed periodic save is logged and the session keeps running; the
    /// next checkpoint replaces it.
    fn checkpoint(&mut self, session: &mut CrawlSession, ledger: &DedupLedger) {
        if let Err(e) = session.transition(SessionState::Checkpointing) {
            tracing::warn!("Skipping checkpoint: {}", e);
            return;
        }

        // Snapshot before flushing: every item done in the snapshot was
        // delivered before it was marked done
        let snapshot = ledger.snapshot();
        if let Err(e) = self.sink.flush() {
            tracing::warn!("Skipping checkpoint, output flush failed: {}", e);
        } else {
            self.save_checkpoint(Checkpoint::new(session.clone(), snapshot));
        }

        if let Err(e) = session.transition(SessionState::Running) {
            tracing::warn!("Session left checkpointing state: {}", e);
        }
    }

    fn save_checkpoint(&mut self, checkpoint: Checkpoint) {
        match self.store.save(&checkpoint) {
            Ok(()) => tracing::debug!(
                "Checkpoint saved ({} done, {} pending)",
                checkpoint.ledger.done.len(),
                checkpoint.ledger.pending.len()
            ),
            Err(e) => tracing::warn!("Failed to save checkpoint: {}", e),
        }
    }

    /// Moves the session to its final state and writes the last checkpoint
    fn finish(
        &mut self,
        mut session: CrawlSession,
        ledger: &DedupLedger,
        final_state: SessionState,
    ) -> Result<SessionSummary> {
        session.transition(final_state)?;

        let snapshot = ledger.snapshot();
        if let Err(e) = self.sink.flush() {
            tracing::error!("Failed to flush output, final checkpoint not written: {}", e);
            return Err(e.into());
        }
        self.store.save(&Checkpoint::new(session.clone(), snapshot))?;

        let stats = ledger.stats();
        let summary = SessionSummary::from_session(
            &session,
            &self.config.categories,
            stats.pending + stats.in_flight,
        );

        match final_state {
            SessionState::Completed => tracing::info!(
                "Session {} completed: {} items enriched, {} failed",
                session.session_id,
                summary.items_enriched(),
                summary.failures.total()
            ),
            _ => tracing::warn!(
                "Session {} aborted: {} items enriched, {} left pending",
                session.session_id,
                summary.items_enriched(),
                summary.pending_claims
            ),
        }

        Ok(summary)
    }

    /// Settles restored claims whose output was written after the checkpoint
    ///
    /// The records and failure log are durable before the checkpoint that
    /// marks them done, so a crash in between leaves pending claims that
    /// already have output. Those are finalized here instead of re-enriched.
    fn settle_persisted(&self, session: &mut CrawlSession, ledger: &DedupLedger) -> Result<()> {
        let persisted = self.sink.persisted()?;
        let mut settled = 0usize;

        for (url, quality) in &persisted.records {
            if ledger.settle(url, DoneOutcome::Enriched) {
                session.record_delivery(*quality);
                settled += 1;
            }
        }
        for (url, kind) in &persisted.failures {
            if ledger.settle(url, DoneOutcome::Failed(*kind)) {
                session.record_failure(*kind);
                settled += 1;
            }
        }

        if settled > 0 {
            tracing::info!("{} pending claims already had output, not re-queued", settled);
        }
        Ok(())
    }

    fn log_progress(&self, session: &CrawlSession, ledger: &DedupLedger, started: Instant) {
        let enriched = session.counters.items_enriched();
        if enriched == 0 || enriched % 50 != 0 {
            return;
        }

        let rate = enriched as f64 / started.elapsed().as_secs_f64().max(f64::EPSILON);
        tracing::info!(
            "Progress: {} items enriched, {} pending, {} pages visited, {:.2} items/sec",
            enriched,
            ledger.stats().pending,
            session.counters.pages_visited,
            rate
        );
    }
}

/// Categories still to traverse and the page each one starts at
fn traversal_plan(session: &CrawlSession, categories: &[CategorySpec]) -> Vec<(CategorySpec, u32)> {
    categories
        .iter()
        .filter_map(|spec| match session.category(&spec.id) {
            Some(progress) if progress.status.is_finished() => None,
            Some(progress) => Some((spec.clone(), progress.next_page)),
            None => Some((spec.clone(), 1)),
        })
        .collect()
}

/// Producer side: re-queues unfinished claims, then walks the categories
async fn produce(
    context: Arc<ProducerContext>,
    requeue: Vec<ItemStub>,
    plan: Vec<(CategorySpec, u32)>,
    parallelism: usize,
) {
    if !requeue.is_empty() {
        tracing::info!("Re-queueing {} unfinished items", requeue.len());
    }
    for stub in requeue {
        if !context.enqueue(stub).await {
            return;
        }
    }

    let budget = Arc::new(Semaphore::new(parallelism));
    let mut categories = JoinSet::new();

    for (spec, start_page) in plan {
        let context = context.clone();
        let budget = budget.clone();

        categories.spawn(async move {
            let permit = tokio::select! {
                biased;
                _ = context.halt.cancelled() => return,
                permit = budget.acquire_owned() => permit,
            };
            let Ok(_permit) = permit else {
                return;
            };
            crawl_category(&context, spec, start_page).await;
        });
    }

    while let Some(joined) = categories.join_next().await {
        if let Err(e) = joined {
            tracing::error!("Category task failed: {}", e);
        }
    }
}

/// Walks one category, claiming and enqueueing every new stub
async fn crawl_category(context: &ProducerContext, spec: CategorySpec, start_page: u32) {
    let session = match context.renderer.open().await {
        Ok(session) => session,
        Err(e) => {
            tracing::warn!("Cannot open a render session for {}: {}", spec.id, e);
            context.record_structural(&spec, start_page, &e.to_string());
            context.emit(CrawlEvent::CategoryFinished {
                category_id: spec.id.clone(),
                status: CategoryStatus::Partial,
            });
            return;
        }
    };

    tracing::info!("Traversing {} from page {}", spec.id, start_page);
    let cursor = ListingPageCursor::at_page(&spec.id, start_page);
    let mut crawler = ListingCrawler::new(spec.clone(), session, context.deps.clone(), cursor);

    loop {
        let next = tokio::select! {
            biased;
            _ = context.halt.cancelled() => None,
            batch = crawler.next_batch() => Some(batch),
        };
        let Some(batch) = next else {
            crawler.abandon().await;
            return;
        };

        for page_index in crawler.take_empty_pages() {
            context.emit(CrawlEvent::PageVisited {
                category_id: spec.id.clone(),
                page_index,
                new_items: 0,
            });
        }

        let Some(batch) = batch else {
            break;
        };

        let claimed: Vec<ItemStub> = batch
            .stubs
            .into_iter()
            .filter(|stub| context.deps.ledger.should_enrich(stub))
            .collect();

        tracing::debug!(
            "{} page {}: {} items claimed",
            spec.id,
            batch.page_index,
            claimed.len()
        );
        context.emit(CrawlEvent::PageVisited {
            category_id: spec.id.clone(),
            page_index: batch.page_index,
            new_items: claimed.len() as u32,
        });

        for stub in claimed {
            if !context.enqueue(stub).await {
                crawler.abandon().await;
                return;
            }
        }
    }

    let status = match crawler.finish_reason() {
        Some(TraversalEnd::Structural { page_index, reason }) => {
            context.record_structural(&spec, *page_index, reason);
            CategoryStatus::Partial
        }
        _ => CategoryStatus::Exhausted,
    };
    context.emit(CrawlEvent::CategoryFinished {
        category_id: spec.id,
        status,
    });
}
