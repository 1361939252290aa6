use crate::model::{FailureKind, ItemStub};
use serde::{Deserialize, Serialize};

/// How a finished claim ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "status", content = "kind")]
pub enum DoneOutcome {
    Enriched,
    Failed(FailureKind),
}

impl DoneOutcome {
    pub fn to_db_string(&self) -> String {
        match self {
            Self::Enriched => "enriched".to_string(),
            Self::Failed(kind) => format!("failed:{}", kind),
        }
    }

    pub fn from_db_string(s: &str) -> Option<Self> {
        if s == "enriched" {
            return Some(Self::Enriched);
        }
        s.strip_prefix("failed:")
            .and_then(FailureKind::from_str_opt)
            .map(Self::Failed)
    }
}

/// A finished item
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DoneEntry {
    pub item_url: String,
    pub category_id: String,
    pub outcome: DoneOutcome,
    pub attempts: u32,
}

/// A claimed item that has not finished; re-queued on resume
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingClaim {
    pub stub: ItemStub,
    pub attempts: u32,
    pub requeues: u32,
}

/// A listing page already traversed
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct VisitedPage {
    pub category_id: String,
    pub page_index: u32,
}

/// Durable form of the ledger
///
/// In-flight claims are written as pending: a snapshot never promises that
/// work in progress will finish.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerSnapshot {
    pub done: Vec<DoneEntry>,
    pub pending: Vec<PendingClaim>,
    pub visited_pages: Vec<VisitedPage>,
}

impl LedgerSnapshot {
    /// Returns true if the snapshot holds nothing
    pub fn is_empty(&self) -> bool {
        self.done.is_empty() && self.pending.is_empty() && self.visited_pages.is_empty()
    }
}
