//! Session summary
//!
//! Every session, complete or not, ends with a summary that tells a full
//! run apart from a partial one: records enriched, failures by kind, and
//! the status of every category.

use crate::model::{CategorySpec, FailureKind};
use crate::state::{CategoryStatus, CrawlSession, FailureCounts, SessionState};
use chrono::{DateTime, Utc};
use serde::Serialize;

/// Final state of one category
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CategorySummary {
    pub category_id: String,
    pub display_name: String,
    pub status: CategoryStatus,
    pub pages_visited: u32,
    pub items_found: u32,
}

/// Summary of a crawl session
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionSummary {
    pub session_id: String,
    pub state: SessionState,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub config_hash: String,

    pub pages_visited: u64,
    pub items_complete: u64,
    pub items_partial: u64,
    pub failures: FailureCounts,

    /// Claims left unfinished, re-queued by a resumed session
    pub pending_claims: usize,
    pub categories: Vec<CategorySummary>,
}

impl SessionSummary {
    /// Builds a summary from the session value
    ///
    /// # Arguments
    ///
    /// * `session` - The session at the end of the run
    /// * `specs` - Configured categories, for display names
    /// * `pending_claims` - Unfinished ledger claims
    pub fn from_session(session: &CrawlSession, specs: &[CategorySpec], pending_claims: usize) -> Self {
        let categories = session
            .categories
            .iter()
            .map(|progress| CategorySummary {
                category_id: progress.category_id.clone(),
                display_name: specs
                    .iter()
                    .find(|spec| spec.id == progress.category_id)
                    .map(|spec| spec.display_name.clone())
                    .unwrap_or_else(|| progress.category_id.clone()),
                status: progress.status,
                pages_visited: progress.pages_visited,
                items_found: progress.items_found,
            })
            .collect();

        Self {
            session_id: session.session_id.clone(),
            state: session.state,
            started_at: session.started_at,
            finished_at: Utc::now(),
            config_hash: session.config_hash.clone(),
            pages_visited: session.counters.pages_visited,
            items_complete: session.counters.items_complete,
            items_partial: session.counters.items_partial,
            failures: session.counters.failures,
            pending_claims,
            categories,
        }
    }

    /// Total records delivered
    pub fn items_enriched(&self) -> u64 {
        self.items_complete + self.items_partial
    }

    /// Returns true if the run covered everything it was configured for
    pub fn is_complete(&self) -> bool {
        self.state == SessionState::Completed
            && self.pending_claims == 0
            && self
                .categories
                .iter()
                .all(|c| c.status == CategoryStatus::Exhausted)
    }

    /// Ids of the categories in `status`
    pub fn categories_with_status(&self, status: CategoryStatus) -> Vec<&str> {
        self.categories
            .iter()
            .filter(|c| c.status == status)
            .map(|c| c.category_id.as_str())
            .collect()
    }
}

/// Prints a summary to stdout in a formatted manner
pub fn print_summary(summary: &SessionSummary) {
    println!("=== Crawl Summary ===\n");

    println!("Session: {}", summary.session_id);
    println!("  State: {}", summary.state);
    println!("  Started: {}", summary.started_at.to_rfc3339());
    let duration = summary.finished_at - summary.started_at;
    println!("  Duration: {}s", duration.num_seconds().max(0));
    println!();

    println!("Items:");
    println!("  Enriched: {}", summary.items_enriched());
    println!("    complete: {}", summary.items_complete);
    println!("    partial: {}", summary.items_partial);
    println!("  Failed: {}", summary.failures.total());
    for kind in FailureKind::all() {
        let count = summary.failures.get(kind);
        if count > 0 {
            println!("    {}: {}", kind, count);
        }
    }
    if summary.pending_claims > 0 {
        println!("  Left pending for resume: {}", summary.pending_claims);
    }
    println!();

    println!("Listing pages visited: {}", summary.pages_visited);
    println!();

    println!("Categories:");
    for category in &summary.categories {
        println!(
            "  {} ({}): {} - {} pages, {} items",
            category.display_name,
            category.category_id,
            category.status,
            category.pages_visited,
            category.items_found
        );
    }
    println!();

    if summary.is_complete() {
        println!("Result: complete");
    } else {
        let partial = summary.categories_with_status(CategoryStatus::Partial);
        let skipped: Vec<&str> = summary
            .categories
            .iter()
            .filter(|c| !c.status.is_finished())
            .map(|c| c.category_id.as_str())
            .collect();

        println!("Result: INCOMPLETE");
        if !partial.is_empty() {
            println!("  Partially traversed: {}", partial.join(", "));
        }
        if !skipped.is_empty() {
            println!("  Not finished: {}", skipped.join(", "));
        }
    }
}
