//! Dedup ledger: which items and listing pages have already been handled
//!
//! Every item stub passes through the ledger before it reaches the work
//! queue. Claiming is a single check-and-mark under one lock, so two listing
//! crawlers that find the same item (overlapping categories) or two workers
//! can never enrich it twice. The ledger also keeps the stub of every
//! unfinished claim, which is what a resumed session re-queues.

mod snapshot;

pub use snapshot::{DoneEntry, DoneOutcome, LedgerSnapshot, PendingClaim, VisitedPage};

use crate::model::{FailureKind, ItemStub, ListingPageCursor};
use std::collections::{BTreeSet, HashMap};
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Lifecycle of one claimed item
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimStatus {
    /// Claimed and waiting in (or on its way to) the work queue
    Pending,

    /// A worker is enriching it
    InFlight,

    /// Finished, successfully or not
    Done(DoneOutcome),
}

/// Result of one enrichment as reported to the ledger
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimOutcome {
    Enriched,

    /// Failure that must not be retried
    Failed(FailureKind),

    /// Transient failure; the item may be tried again
    Retryable,
}

/// What the caller must do after `mark_done`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// The claim is final
    Finalized,

    /// The claim went back to pending; enqueue the item again
    Requeue,

    /// Retryable failure with no requeue budget left; now final
    Exhausted,

    /// The URL was never claimed, or already final
    Unknown,
}

#[derive(Debug, Clone)]
struct Claim {
    stub: ItemStub,
    status: ClaimStatus,
    attempts: u32,
    requeues: u32,
}

#[derive(Debug, Default)]
struct LedgerState {
    claims: HashMap<String, Claim>,

    /// Pages whose stubs are all claimed
    visited_pages: BTreeSet<VisitedPage>,

    /// Pages being rendered or extracted right now
    open_pages: BTreeSet<VisitedPage>,
}

/// Counts of claims per status
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LedgerStats {
    pub pending: usize,
    pub in_flight: usize,
    pub enriched: usize,
    pub failed: usize,
    pub pages_visited: usize,
}

/// Thread-safe dedup ledger
pub struct DedupLedger {
    state: Mutex<LedgerState>,
    requeue_limit: u32,
}

impl DedupLedger {
    /// Creates an empty ledger
    ///
    /// # Arguments
    ///
    /// * `requeue_limit` - How many times a retryable failure is sent back
    ///   to the queue before it becomes final
    pub fn new(requeue_limit: u32) -> Self {
        Self {
            state: Mutex::new(LedgerState::default()),
            requeue_limit,
        }
    }

    fn state(&self) -> MutexGuard<'_, LedgerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Atomically checks and claims an item
    ///
    /// Returns false if the item URL is already claimed, in flight, or done.
    pub fn should_enrich(&self, stub: &ItemStub) -> bool {
        let mut state = self.state();
        if state.claims.contains_key(&stub.item_url) {
            return false;
        }

        state.claims.insert(
            stub.item_url.clone(),
            Claim {
                stub: stub.clone(),
                status: ClaimStatus::Pending,
                attempts: 0,
                requeues: 0,
            },
        );
        true
    }

    /// Marks a pending claim as in flight
    ///
    /// Returns false if the URL is not a pending claim; the caller must not
    /// enrich it in that case.
    pub fn begin(&self, item_url: &str) -> bool {
        let mut state = self.state();
        match state.claims.get_mut(item_url) {
            Some(claim) if claim.status == ClaimStatus::Pending => {
                claim.status = ClaimStatus::InFlight;
                true
            }
            _ => false,
        }
    }

    /// Finalizes a claim, or releases it for another round
    ///
    /// # Arguments
    ///
    /// * `item_url` - The claimed URL
    /// * `outcome` - How the enrichment ended
    /// * `attempts` - Fetch attempts spent in this round
    pub fn mark_done(&self, item_url: &str, outcome: ClaimOutcome, attempts: u32) -> Disposition {
        let requeue_limit = self.requeue_limit;
        let mut state = self.state();
        let Some(claim) = state.claims.get_mut(item_url) else {
            return Disposition::Unknown;
        };

        if matches!(claim.status, ClaimStatus::Done(_)) {
            return Disposition::Unknown;
        }

        claim.attempts += attempts;

        match outcome {
            ClaimOutcome::Enriched => {
                claim.status = ClaimStatus::Done(DoneOutcome::Enriched);
                Disposition::Finalized
            }
            ClaimOutcome::Failed(kind) => {
                claim.status = ClaimStatus::Done(DoneOutcome::Failed(kind));
                Disposition::Finalized
            }
            ClaimOutcome::Retryable if claim.requeues < requeue_limit => {
                claim.requeues += 1;
                claim.status = ClaimStatus::Pending;
                Disposition::Requeue
            }
            ClaimOutcome::Retryable => {
                claim.status = ClaimStatus::Done(DoneOutcome::Failed(FailureKind::Transient));
                Disposition::Exhausted
            }
        }
    }

    /// Returns true if a retryable failure of this claim would be requeued
    pub fn can_requeue(&self, item_url: &str) -> bool {
        let requeue_limit = self.requeue_limit;
        self.state()
            .claims
            .get(item_url)
            .is_some_and(|claim| claim.requeues < requeue_limit)
    }

    /// Returns an in-flight claim to pending without counting an attempt
    ///
    /// Used when enrichment is abandoned (stop signal, sink failure) so a
    /// resumed session picks the item up again.
    pub fn release(&self, item_url: &str) {
        let mut state = self.state();
        if let Some(claim) = state.claims.get_mut(item_url) {
            if claim.status == ClaimStatus::InFlight {
                claim.status = ClaimStatus::Pending;
            }
        }
    }

    /// Finalizes an unfinished claim whose output already exists
    ///
    /// Returns false if the URL was never claimed or is already done.
    pub fn settle(&self, item_url: &str, outcome: DoneOutcome) -> bool {
        let mut state = self.state();
        match state.claims.get_mut(item_url) {
            Some(claim) if !matches!(claim.status, ClaimStatus::Done(_)) => {
                claim.status = ClaimStatus::Done(outcome);
                true
            }
            _ => false,
        }
    }

    /// Atomically checks and opens a listing page
    ///
    /// Returns false if the page is already open or completed. An open page
    /// must end in `complete_page` or `release_page`.
    pub fn should_visit_page(&self, category_id: &str, cursor: &ListingPageCursor) -> bool {
        let page = VisitedPage {
            category_id: category_id.to_string(),
            page_index: cursor.page_index,
        };
        let mut state = self.state();
        if state.visited_pages.contains(&page) {
            return false;
        }
        state.open_pages.insert(page)
    }

    /// Marks an open page as visited once every stub it produced is claimed
    pub fn complete_page(&self, category_id: &str, page_index: u32) {
        let page = VisitedPage {
            category_id: category_id.to_string(),
            page_index,
        };
        let mut state = self.state();
        state.open_pages.remove(&page);
        state.visited_pages.insert(page);
    }

    /// Forgets an open page that was abandoned before its stubs were claimed
    pub fn release_page(&self, category_id: &str, page_index: u32) {
        let page = VisitedPage {
            category_id: category_id.to_string(),
            page_index,
        };
        self.state().open_pages.remove(&page);
    }

    /// Returns the status of a claim, if any
    pub fn status(&self, item_url: &str) -> Option<ClaimStatus> {
        self.state().claims.get(item_url).map(|claim| claim.status)
    }

    /// Returns the stubs of every claim that is not done, in URL order
    pub fn pending(&self) -> Vec<ItemStub> {
        let state = self.state();
        let mut stubs: Vec<ItemStub> = state
            .claims
            .values()
            .filter(|claim| !matches!(claim.status, ClaimStatus::Done(_)))
            .map(|claim| claim.stub.clone())
            .collect();
        stubs.sort_by(|a, b| a.item_url.cmp(&b.item_url));
        stubs
    }

    /// Counts claims per status
    pub fn stats(&self) -> LedgerStats {
        let state = self.state();
        let mut stats = LedgerStats {
            pages_visited: state.visited_pages.len(),
            ..LedgerStats::default()
        };

        for claim in state.claims.values() {
            match claim.status {
                ClaimStatus::Pending => stats.pending += 1,
                ClaimStatus::InFlight => stats.in_flight += 1,
                ClaimStatus::Done(DoneOutcome::Enriched) => stats.enriched += 1,
                ClaimStatus::Done(DoneOutcome::Failed(_)) => stats.failed += 1,
            }
        }

        stats
    }

    /// Captures the ledger for a checkpoint
    pub fn snapshot(&self) -> LedgerSnapshot {
        let state = self.state();
        let mut snapshot = LedgerSnapshot {
            visited_pages: state.visited_pages.iter().cloned().collect(),
            ..LedgerSnapshot::default()
        };

        for (url, claim) in &state.claims {
            match claim.status {
                ClaimStatus::Done(outcome) => snapshot.done.push(DoneEntry {
                    item_url: url.clone(),
                    category_id: claim.stub.category_id.clone(),
                    outcome,
                    attempts: claim.attempts,
                }),
                ClaimStatus::Pending | ClaimStatus::InFlight => {
                    snapshot.pending.push(PendingClaim {
                        stub: claim.stub.clone(),
                        attempts: claim.attempts,
                        requeues: claim.requeues,
                    })
                }
            }
        }

        snapshot.done.sort_by(|a, b| a.item_url.cmp(&b.item_url));
        snapshot
            .pending
            .sort_by(|a, b| a.stub.item_url.cmp(&b.stub.item_url));
        snapshot
    }

    /// Replaces the ledger contents with a snapshot
    ///
    /// Done entries keep no stub data beyond their URL and category.
    pub fn restore(&self, snapshot: LedgerSnapshot) {
        let mut state = self.state();
        state.claims.clear();
        state.open_pages.clear();
        state.visited_pages = snapshot.visited_pages.into_iter().collect();

        for entry in snapshot.done {
            let stub = ItemStub {
                item_url: entry.item_url.clone(),
                category_id: entry.category_id,
                snippet: Default::default(),
            };
            state.claims.insert(
                entry.item_url,
                Claim {
                    stub,
                    status: ClaimStatus::Done(entry.outcome),
                    attempts: entry.attempts,
                    requeues: 0,
                },
            );
        }

        for pending in snapshot.pending {
            state.claims.insert(
                pending.stub.item_url.clone(),
                Claim {
                    stub: pending.stub,
                    status: ClaimStatus::Pending,
                    attempts: pending.attempts,
                    requeues: pending.requeues,
                },
            );
        }
    }
}
