//! Detail enrichment worker pool
//!
//! Workers share one bounded queue receiver. Each worker claims a stub in
//! the ledger, enriches it, hands the result to the output sink and only
//! then finalizes the claim. Progress is reported to the coordinator as
//! `CrawlEvent`s.

use crate::config::RetryConfig;
use crate::crawler::enricher::{retry_backoff, DetailEnricher, EnrichError};
use crate::ledger::{ClaimOutcome, DedupLedger, Disposition};
use crate::model::{FailureKind, FailureRecord, ItemRecord, ItemStub, RecordQuality};
use crate::output::OutputSink;
use crate::state::CategoryStatus;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

/// Progress reported back to the coordinator
#[derive(Debug, Clone, PartialEq)]
pub enum CrawlEvent {
    /// A listing page was rendered and its new stubs claimed
    PageVisited {
        category_id: String,
        page_index: u32,
        new_items: u32,
    },

    /// A category traversal ended
    CategoryFinished {
        category_id: String,
        status: CategoryStatus,
    },

    /// A record reached the output sink
    Delivered { quality: RecordQuality },

    /// A failure-log entry was written
    Failed { kind: FailureKind },

    /// The output sink rejected a write; the session cannot continue
    SinkFailed { message: String },
}

/// Receiving end of the work queue, shared by all workers
pub type WorkQueue = Arc<Mutex<mpsc::Receiver<ItemStub>>>;

/// Everything a worker needs
pub struct WorkerContext {
    pub enricher: Arc<DetailEnricher>,
    pub ledger: Arc<DedupLedger>,
    pub sink: Arc<dyn OutputSink>,
    pub retry: RetryConfig,
    pub events: mpsc::UnboundedSender<CrawlEvent>,

    /// Cancelled on stop; workers stop taking new work
    pub stop: CancellationToken,

    /// How long an in-flight enrichment may run after `stop`
    pub grace: Duration,
}

impl WorkerContext {
    fn emit(&self, event: CrawlEvent) {
        // The coordinator outlives the pool; a closed channel means it is gone
        let _ = self.events.send(event);
    }
}

/// Spawns `count` workers draining `queue`
///
/// Workers exit when the queue is closed and empty, or on stop.
pub fn spawn_workers(count: usize, context: Arc<WorkerContext>, queue: WorkQueue) -> JoinSet<()> {
    let mut workers = JoinSet::new();
    for id in 0..count.max(1) {
        let context = context.clone();
        let queue = queue.clone();
        workers.spawn(async move { run_worker(id, context, queue).await });
    }
    workers
}

async fn run_worker(id: usize, context: Arc<WorkerContext>, queue: WorkQueue) {
    tracing::debug!("Worker {} started", id);

    loop {
        let next = {
            let mut receiver = queue.lock().await;
            tokio::select! {
                biased;
                _ = context.stop.cancelled() => None,
                stub = receiver.recv() => stub,
            }
        };

        let Some(stub) = next else {
            break;
        };

        if !context.ledger.begin(&stub.item_url) {
            tracing::debug!("Worker {} skipping {}: not pending", id, stub.item_url);
            continue;
        }

        if !process(&context, &stub).await {
            break;
        }
    }

    tracing::debug!("Worker {} stopped", id);
}

/// Runs `enrich` to completion, or until the grace period after stop ends
async fn enrich_with_grace(
    context: &WorkerContext,
    stub: &ItemStub,
) -> Option<Result<ItemRecord, EnrichError>> {
    let work = context.enricher.enrich(stub);
    tokio::pin!(work);

    tokio::select! {
        result = &mut work => Some(result),
        _ = context.stop.cancelled() => {
            tokio::time::timeout(context.grace, &mut work).await.ok()
        }
    }
}

/// Handles one claimed stub until its claim is final or released
///
/// Returns false if the worker must stop.
async fn process(context: &WorkerContext, stub: &ItemStub) -> bool {
    let url = stub.item_url.as_str();

    loop {
        let Some(result) = enrich_with_grace(context, stub).await else {
            tracing::debug!("Dropping in-flight enrichment of {} on stop", url);
            context.ledger.release(url);
            return false;
        };

        match result {
            Ok(record) => {
                if let Err(e) = context.sink.deliver(&record) {
                    context.ledger.release(url);
                    context.emit(CrawlEvent::SinkFailed {
                        message: e.to_string(),
                    });
                    return false;
                }
                context
                    .ledger
                    .mark_done(url, ClaimOutcome::Enriched, record.attempts);
                tracing::debug!("Enriched {} ({})", url, record.quality);
                context.emit(CrawlEvent::Delivered {
                    quality: record.quality,
                });
                return true;
            }

            Err(error @ EnrichError::Transient { .. }) if context.ledger.can_requeue(url) => {
                let disposition =
                    context
                        .ledger
                        .mark_done(url, ClaimOutcome::Retryable, error.attempts());
                if disposition != Disposition::Requeue {
                    return true;
                }

                let backoff = retry_backoff(&context.retry, context.retry.transient_attempts);
                tracing::warn!("Requeueing {} after {}, next round in {:?}", url, error, backoff);

                tokio::select! {
                    _ = tokio::time::sleep(backoff) => {}
                    _ = context.stop.cancelled() => return false,
                }

                if !context.ledger.begin(url) {
                    return true;
                }
            }

            Err(error) => {
                let kind = error.kind();
                let failure = FailureRecord::new(
                    url,
                    stub.category_id.as_str(),
                    error.attempts(),
                    kind,
                    error.to_string(),
                );

                if let Err(e) = context.sink.record_failure(&failure) {
                    context.ledger.release(url);
                    context.emit(CrawlEvent::SinkFailed {
                        message: e.to_string(),
                    });
                    return false;
                }

                let outcome = match kind {
                    FailureKind::Transient => ClaimOutcome::Retryable,
                    kind => ClaimOutcome::Failed(kind),
                };
                context.ledger.mark_done(url, outcome, error.attempts());
                tracing::warn!("Giving up on {}: {}", url, error);
                context.emit(CrawlEvent::Failed { kind });
                return true;
            }
        }
    }
}
