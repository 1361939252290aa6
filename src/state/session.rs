use crate::model::{CategorySpec, FailureKind, RecordQuality};
use crate::state::SessionState;
use crate::{HarvestError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Traversal status of one category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CategoryStatus {
    /// Not started yet
    Pending,

    /// Traversal started but did not finish
    InProgress,

    /// Traversal ended normally (page limit or end of results)
    Exhausted,

    /// Traversal ended early on a structural failure
    Partial,

    /// The session ended before the category was reached
    Skipped,
}

impl CategoryStatus {
    /// Returns true if a resumed session must not traverse the category again
    pub fn is_finished(&self) -> bool {
        matches!(self, Self::Exhausted | Self::Partial)
    }

    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Exhausted => "exhausted",
            Self::Partial => "partial",
            Self::Skipped => "skipped",
        }
    }

    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "in_progress" => Some(Self::InProgress),
            "exhausted" => Some(Self::Exhausted),
            "partial" => Some(Self::Partial),
            "skipped" => Some(Self::Skipped),
            _ => None,
        }
    }
}

impl fmt::Display for CategoryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_db_string())
    }
}

/// Per-category progress, the resume point of the listing crawler
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryProgress {
    pub category_id: String,

    /// First listing page a resumed traversal starts at
    pub next_page: u32,
    pub pages_visited: u32,
    pub items_found: u32,
    pub status: CategoryStatus,
}

impl CategoryProgress {
    pub fn new(category_id: &str) -> Self {
        Self {
            category_id: category_id.to_string(),
            next_page: 1,
            pages_visited: 0,
            items_found: 0,
            status: CategoryStatus::Pending,
        }
    }
}

/// Failure counts per failure kind
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureCounts {
    pub transient: u64,
    pub permanent: u64,
    pub structural: u64,
    pub fatal: u64,
}

impl FailureCounts {
    pub fn record(&mut self, kind: FailureKind) {
        *self.slot(kind) += 1;
    }

    pub fn get(&self, kind: FailureKind) -> u64 {
        match kind {
            FailureKind::Transient => self.transient,
            FailureKind::Permanent => self.permanent,
            FailureKind::Structural => self.structural,
            FailureKind::Fatal => self.fatal,
        }
    }

    pub fn set(&mut self, kind: FailureKind, count: u64) {
        *self.slot(kind) = count;
    }

    pub fn total(&self) -> u64 {
        self.transient + self.permanent + self.structural + self.fatal
    }

    fn slot(&mut self, kind: FailureKind) -> &mut u64 {
        match kind {
            FailureKind::Transient => &mut self.transient,
            FailureKind::Permanent => &mut self.permanent,
            FailureKind::Structural => &mut self.structural,
            FailureKind::Fatal => &mut self.fatal,
        }
    }
}

/// Global session counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionCounters {
    pub pages_visited: u64,

    /// Records delivered with every field present
    pub items_complete: u64,

    /// Records delivered with missing fields
    pub items_partial: u64,
    pub failures: FailureCounts,
}

impl SessionCounters {
    /// Total records delivered to the output sink
    pub fn items_enriched(&self) -> u64 {
        self.items_complete + self.items_partial
    }
}

/// Explicit crawl session value, owned by the coordinator and checkpointed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrawlSession {
    pub session_id: String,
    pub started_at: DateTime<Utc>,

    /// Hash of the configuration the session was started with
    pub config_hash: String,
    pub state: SessionState,
    pub categories: Vec<CategoryProgress>,
    pub counters: SessionCounters,
}

impl CrawlSession {
    /// Creates a new idle session covering `categories`
    pub fn new(config_hash: &str, categories: &[CategorySpec]) -> Self {
        Self {
            session_id: uuid::Uuid::new_v4().to_string(),
            started_at: Utc::now(),
            config_hash: config_hash.to_string(),
            state: SessionState::Idle,
            categories: categories
                .iter()
                .map(|spec| CategoryProgress::new(&spec.id))
                .collect(),
            counters: SessionCounters::default(),
        }
    }

    /// Prepares a checkpointed session for another run
    ///
    /// Progress and counters are kept. The state goes back to Idle, and the
    /// category list is aligned with `categories`: new categories are added
    /// as pending and categories no longer configured are dropped.
    pub fn resume(mut self, categories: &[CategorySpec]) -> Self {
        self.state = SessionState::Idle;

        let mut aligned = Vec::with_capacity(categories.len());
        for spec in categories {
            let progress = self
                .categories
                .iter()
                .find(|p| p.category_id == spec.id)
                .cloned()
                .unwrap_or_else(|| CategoryProgress::new(&spec.id));
            aligned.push(progress);
        }
        self.categories = aligned;
        self
    }

    /// Moves the session to `next`, rejecting illegal transitions
    pub fn transition(&mut self, next: SessionState) -> Result<()> {
        if !self.state.can_transition_to(next) {
            return Err(HarvestError::InvalidTransition {
                from: self.state,
                to: next,
            });
        }

        tracing::debug!("Session {}: {} -> {}", self.session_id, self.state, next);
        self.state = next;
        Ok(())
    }

    pub fn category(&self, category_id: &str) -> Option<&CategoryProgress> {
        self.categories
            .iter()
            .find(|p| p.category_id == category_id)
    }

    pub fn category_mut(&mut self, category_id: &str) -> Option<&mut CategoryProgress> {
        self.categories
            .iter_mut()
            .find(|p| p.category_id == category_id)
    }

    /// Records one traversed listing page
    pub fn record_page(&mut self, category_id: &str, page_index: u32, new_items: u32) {
        self.counters.pages_visited += 1;

        if let Some(progress) = self.category_mut(category_id) {
            progress.status = CategoryStatus::InProgress;
            progress.pages_visited += 1;
            progress.items_found += new_items;
            progress.next_page = progress.next_page.max(page_index + 1);
        }
    }

    /// Records the end of a category's traversal
    pub fn finish_category(&mut self, category_id: &str, status: CategoryStatus) {
        if let Some(progress) = self.category_mut(category_id) {
            progress.status = status;
        }
    }

    /// Records one delivered output record
    pub fn record_delivery(&mut self, quality: RecordQuality) {
        match quality {
            RecordQuality::Complete => self.counters.items_complete += 1,
            RecordQuality::Partial => self.counters.items_partial += 1,
            RecordQuality::Failed => self.counters.failures.record(FailureKind::Permanent),
        }
    }

    pub fn record_failure(&mut self, kind: FailureKind) {
        self.counters.failures.record(kind);
    }

    /// Marks every category that never started as skipped
    pub fn mark_unreached_skipped(&mut self) {
        for progress in &mut self.categories {
            if progress.status == CategoryStatus::Pending {
                progress.status = CategoryStatus::Skipped;
            }
        }
    }

    /// Returns true if every category finished its traversal
    pub fn all_categories_finished(&self) -> bool {
        self.categories.iter().all(|p| p.status.is_finished())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn specs(ids: &[&str]) -> Vec<CategorySpec> {
        ids.iter()
            .map(|id| CategorySpec {
                id: id.to_string(),
                display_name: id.to_string(),
                seed_url: format!("https://example.com/{}.html", id),
                max_pages: 3,
            })
            .collect()
    }

    #[test]
    fn test_new_session() {
        let session = CrawlSession::new("abc", &specs(&["pumps", "valves"]));

        assert_eq!(session.state, SessionState::Idle);
        assert_eq!(session.categories.len(), 2);
        assert_eq!(session.categories[0].next_page, 1);
        assert_eq!(session.categories[0].status, CategoryStatus::Pending);
        assert!(uuid::Uuid::parse_str(&session.session_id).is_ok());
    }

    #[test]
    fn test_transition_rejects_illegal_moves() {
        let mut session = CrawlSession::new("abc", &specs(&["pumps"]));

        assert!(matches!(
            session.transition(SessionState::Completed),
            Err(HarvestError::InvalidTransition { .. })
        ));
        session.transition(SessionState::Running).unwrap();
        session.transition(SessionState::Checkpointing).unwrap();
        session.transition(SessionState::Running).unwrap();
        session.transition(SessionState::Aborted).unwrap();
        assert!(session.transition(SessionState::Running).is_err());
    }

    #[test]
    fn test_record_page_advances_resume_point() {
        let mut session = CrawlSession::new("abc", &specs(&["pumps"]));
        session.record_page("pumps", 1, 20);
        session.record_page("pumps", 2, 5);

        let progress = session.category("pumps").unwrap();
        assert_eq!(progress.next_page, 3);
        assert_eq!(progress.pages_visited, 2);
        assert_eq!(progress.items_found, 25);
        assert_eq!(progress.status, CategoryStatus::InProgress);
        assert_eq!(session.counters.pages_visited, 2);
    }

    #[test]
    fn test_delivery_and_failure_counters() {
        let mut session = CrawlSession::new("abc", &specs(&["pumps"]));
        session.record_delivery(RecordQuality::Complete);
        session.record_delivery(RecordQuality::Partial);
        session.record_delivery(RecordQuality::Partial);
        session.record_failure(FailureKind::Transient);

        assert_eq!(session.counters.items_enriched(), 3);
        assert_eq!(session.counters.items_partial, 2);
        assert_eq!(session.counters.failures.get(FailureKind::Transient), 1);
        assert_eq!(session.counters.failures.total(), 1);
    }

    #[test]
    fn test_resume_aligns_categories() {
        let mut session = CrawlSession::new("abc", &specs(&["pumps", "valves"]));
        session.transition(SessionState::Running).unwrap();
        session.record_page("pumps", 1, 4);
        session.finish_category("valves", CategoryStatus::Exhausted);
        session.transition(SessionState::Aborted).unwrap();

        let resumed = session.clone().resume(&specs(&["pumps", "motors"]));

        assert_eq!(resumed.state, SessionState::Idle);
        assert_eq!(resumed.session_id, session.session_id);
        assert_eq!(resumed.categories.len(), 2);
        assert_eq!(resumed.category("pumps").unwrap().next_page, 2);
        assert_eq!(
            resumed.category("motors").unwrap().status,
            CategoryStatus::Pending
        );
        assert!(resumed.category("valves").is_none());
    }

    #[test]
    fn test_unreached_categories_are_skipped() {
        let mut session = CrawlSession::new("abc", &specs(&["pumps", "valves"]));
        session.finish_category("pumps", CategoryStatus::Partial);
        session.mark_unreached_skipped();

        assert_eq!(
            session.category("valves").unwrap().status,
            CategoryStatus::Skipped
        );
        assert!(!session.all_categories_finished());
    }

    #[test]
    fn test_category_status_db_strings() {
        for status in [
            CategoryStatus::Pending,
            CategoryStatus::InProgress,
            CategoryStatus::Exhausted,
            CategoryStatus::Partial,
            CategoryStatus::Skipped,
        ] {
            assert_eq!(
                CategoryStatus::from_db_string(status.to_db_string()),
                Some(status)
            );
        }
    }
}
