//! Checkpoint store trait and error types

use crate::ledger::LedgerSnapshot;
use crate::state::CrawlSession;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that can occur during storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Session not found: {0}")]
    SessionNotFound(String),

    #[error("Corrupt checkpoint: {0}")]
    Corrupt(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Durable snapshot of a session and its ledger
///
/// This is everything a resumed session needs: per-category cursors,
/// counters, and the claimed/done/visited sets.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub session: CrawlSession,
    pub ledger: LedgerSnapshot,
    pub saved_at: DateTime<Utc>,
}

impl Checkpoint {
    pub fn new(session: CrawlSession, ledger: LedgerSnapshot) -> Self {
        Self {
            session,
            ledger,
            saved_at: Utc::now(),
        }
    }
}

/// Trait for checkpoint backends
///
/// A session writes many checkpoints; only the latest one per session is
/// kept. Saving must be atomic: a crash mid-save leaves the previous
/// checkpoint intact.
pub trait CheckpointStore: Send {
    /// Persists a checkpoint, replacing the previous one of the same session
    fn save(&mut self, checkpoint: &Checkpoint) -> StorageResult<()>;

    /// Returns the most recently saved checkpoint of any session
    fn load_latest(&self) -> StorageResult<Option<Checkpoint>>;

    /// Returns the checkpoint of one session
    fn load_session(&self, session_id: &str) -> StorageResult<Checkpoint>;
}
