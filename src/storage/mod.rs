//! Checkpoint persistence
//!
//! A checkpoint is the session value plus a ledger snapshot. Two backends
//! are provided:
//! - `SqliteCheckpointStore`: durable, one transaction per checkpoint
//! - `MemoryCheckpointStore`: in-process, for tests and dry runs

mod schema;
mod sqlite;
mod traits;

pub use sqlite::SqliteCheckpointStore;
pub use traits::{Checkpoint, CheckpointStore, StorageError, StorageResult};

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Opens or creates the checkpoint database at `path`
pub fn open_checkpoint_store(path: &Path) -> StorageResult<SqliteCheckpointStore> {
    SqliteCheckpointStore::new(path)
}

/// In-memory checkpoint store
///
/// Clones share the same history, so a test can keep a handle while the
/// coordinator owns another.
#[derive(Debug, Clone, Default)]
pub struct MemoryCheckpointStore {
    saved: Arc<Mutex<Vec<Checkpoint>>>,
}

impl MemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn saved(&self) -> MutexGuard<'_, Vec<Checkpoint>> {
        self.saved.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Every checkpoint saved so far, oldest first
    pub fn history(&self) -> Vec<Checkpoint> {
        self.saved().clone()
    }

    /// Number of checkpoints saved so far
    pub fn save_count(&self) -> usize {
        self.saved().len()
    }
}

impl CheckpointStore for MemoryCheckpointStore {
    fn save(&mut self, checkpoint: &Checkpoint) -> StorageResult<()> {
        self.saved().push(checkpoint.clone());
        Ok(())
    }

    fn load_latest(&self) -> StorageResult<Option<Checkpoint>> {
        Ok(self.saved().last().cloned())
    }

    fn load_session(&self, session_id: &str) -> StorageResult<Checkpoint> {
        self.saved()
            .iter()
            .rev()
            .find(|c| c.session.session_id == session_id)
            .cloned()
            .ok_or_else(|| StorageError::SessionNotFound(session_id.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::LedgerSnapshot;
    use crate::state::CrawlSession;

    #[test]
    fn test_memory_store_shares_history_between_clones() {
        let handle = MemoryCheckpointStore::new();
        let mut store = handle.clone();

        let session = CrawlSession::new("hash", &[]);
        store
            .save(&Checkpoint::new(session.clone(), LedgerSnapshot::default()))
            .unwrap();

        assert_eq!(handle.save_count(), 1);
        assert_eq!(
            handle.load_latest().unwrap().unwrap().session.session_id,
            session.session_id
        );
        assert!(handle.load_session(&session.session_id).is_ok());
        assert!(handle.load_session("other").is_err());
    }
}
