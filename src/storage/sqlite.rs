//! SQLite checkpoint store
//!
//! Every checkpoint rewrites the session's rows inside one transaction, so
//! a crash mid-save leaves the previous checkpoint untouched.

use crate::ledger::{DoneEntry, DoneOutcome, LedgerSnapshot, PendingClaim, VisitedPage};
use crate::model::{FailureKind, ItemStub, ListingSnippet};
use crate::state::{
    CategoryProgress, CategoryStatus, CrawlSession, FailureCounts, SessionCounters, SessionState,
};
use crate::storage::schema::initialize_schema;
use crate::storage::traits::{Checkpoint, CheckpointStore, StorageError, StorageResult};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Transaction};
use std::path::Path;

/// SQLite checkpoint backend
pub struct SqliteCheckpointStore {
    conn: Connection,
}

impl SqliteCheckpointStore {
    /// Opens or creates the checkpoint database at `path`
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the SQLite database file
    pub fn new(path: &Path) -> StorageResult<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path)?;

        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA foreign_keys = ON;
            PRAGMA temp_store = MEMORY;
        ",
        )?;

        initialize_schema(&conn)?;

        Ok(Self { conn })
    }

    /// Creates an in-memory database (for testing)
    #[cfg(test)]
    pub fn new_in_memory() -> StorageResult<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        initialize_schema(&conn)?;
        Ok(Self { conn })
    }

    fn write_session(tx: &Transaction<'_>, checkpoint: &Checkpoint) -> StorageResult<()> {
        let session = &checkpoint.session;
        let counters = &session.counters;
        let failures = &counters.failures;

        let seq: i64 = tx.query_row(
            "SELECT COALESCE(MAX(save_seq), 0) + 1 FROM sessions",
            [],
            |row| row.get(0),
        )?;

        tx.execute(
            "INSERT INTO sessions
             (session_id, started_at, config_hash, state, saved_at, save_seq,
              pages_visited, items_complete, items_partial,
              failures_transient, failures_permanent, failures_structural, failures_fatal)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
             ON CONFLICT(session_id) DO UPDATE SET
               state = excluded.state,
               config_hash = excluded.config_hash,
               saved_at = excluded.saved_at,
               save_seq = excluded.save_seq,
               pages_visited = excluded.pages_visited,
               items_complete = excluded.items_complete,
               items_partial = excluded.items_partial,
               failures_transient = excluded.failures_transient,
               failures_permanent = excluded.failures_permanent,
               failures_structural = excluded.failures_structural,
               failures_fatal = excluded.failures_fatal",
            params![
                session.session_id,
                session.started_at.to_rfc3339(),
                session.config_hash,
                session.state.to_db_string(),
                checkpoint.saved_at.to_rfc3339(),
                seq,
                counters.pages_visited as i64,
                counters.items_complete as i64,
                counters.items_partial as i64,
                failures.transient as i64,
                failures.permanent as i64,
                failures.structural as i64,
                failures.fatal as i64,
            ],
        )?;

        for table in [
            "category_progress",
            "ledger_done",
            "ledger_pending",
            "visited_pages",
        ] {
            tx.execute(
                &format!("DELETE FROM {} WHERE session_id = ?1", table),
                params![session.session_id],
            )?;
        }

        Ok(())
    }

    fn write_categories(tx: &Transaction<'_>, session: &CrawlSession) -> StorageResult<()> {
        let mut stmt = tx.prepare(
            "INSERT INTO category_progress
             (session_id, position, category_id, next_page, pages_visited, items_found, status)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        )?;

        for (position, progress) in session.categories.iter().enumerate() {
            stmt.execute(params![
                session.session_id,
                position as i64,
                progress.category_id,
                progress.next_page,
                progress.pages_visited,
                progress.items_found,
                progress.status.to_db_string(),
            ])?;
        }

        Ok(())
    }

    fn write_ledger(
        tx: &Transaction<'_>,
        session_id: &str,
        ledger: &LedgerSnapshot,
    ) -> StorageResult<()> {
        let mut done = tx.prepare(
            "INSERT INTO ledger_done (session_id, item_url, category_id, outcome, attempts)
             VALUES (?1, ?2, ?3, ?4, ?5)",
        )?;
        for entry in &ledger.done {
            done.execute(params![
                session_id,
                entry.item_url,
                entry.category_id,
                entry.outcome.to_db_string(),
                entry.attempts,
            ])?;
        }

        let mut pending = tx.prepare(
            "INSERT INTO ledger_pending
             (session_id, item_url, category_id, title, price_text, attempts, requeues)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        )?;
        for claim in &ledger.pending {
            pending.execute(params![
                session_id,
                claim.stub.item_url,
                claim.stub.category_id,
                claim.stub.snippet.title,
                claim.stub.snippet.price_text,
                claim.attempts,
                claim.requeues,
            ])?;
        }

        let mut pages = tx.prepare(
            "INSERT INTO visited_pages (session_id, category_id, page_index) VALUES (?1, ?2, ?3)",
        )?;
        for page in &ledger.visited_pages {
            pages.execute(params![session_id, page.category_id, page.page_index])?;
        }

        Ok(())
    }

    fn read_session(&self, session_id: &str) -> StorageResult<(CrawlSession, DateTime<Utc>)> {
        let row = self
            .conn
            .query_row(
                "SELECT started_at, config_hash, state, saved_at,
                        pages_visited, items_complete, items_partial,
                        failures_transient, failures_permanent, failures_structural, failures_fatal
                 FROM sessions WHERE session_id = ?1",
                params![session_id],
                |row| {
                    let mut failures = FailureCounts::default();
                    for (offset, kind) in FailureKind::all().into_iter().enumerate() {
                        failures.set(kind, row.get::<_, i64>(7 + offset)? as u64);
                    }

                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                        SessionCounters {
                            pages_visited: row.get::<_, i64>(4)? as u64,
                            items_complete: row.get::<_, i64>(5)? as u64,
                            items_partial: row.get::<_, i64>(6)? as u64,
                            failures,
                        },
                    ))
                },
            )
            .optional()?
            .ok_or_else(|| StorageError::SessionNotFound(session_id.to_string()))?;

        let (started_at, config_hash, state, saved_at, counters) = row;

        let session = CrawlSession {
            session_id: session_id.to_string(),
            started_at: parse_timestamp(&started_at)?,
            config_hash,
            state: SessionState::from_db_string(&state)
                .ok_or_else(|| StorageError::Corrupt(format!("unknown session state '{}'", state)))?,
            categories: self.read_categories(session_id)?,
            counters,
        };

        Ok((session, parse_timestamp(&saved_at)?))
    }

    fn read_categories(&self, session_id: &str) -> StorageResult<Vec<CategoryProgress>> {
        let mut stmt = self.conn.prepare(
            "SELECT category_id, next_page, pages_visited, items_found, status
             FROM category_progress WHERE session_id = ?1 ORDER BY position",
        )?;

        let rows = stmt.query_map(params![session_id], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, u32>(1)?,
                row.get::<_, u32>(2)?,
                row.get::<_, u32>(3)?,
                row.get::<_, String>(4)?,
            ))
        })?;

        let mut categories = Vec::new();
        for row in rows {
            let (category_id, next_page, pages_visited, items_found, status) = row?;
            let status = CategoryStatus::from_db_string(&status).ok_or_else(|| {
                StorageError::Corrupt(format!("unknown category status '{}'", status))
            })?;
            categories.push(CategoryProgress {
                category_id,
                next_page,
                pages_visited,
                items_found,
                status,
            });
        }

        Ok(categories)
    }

    fn read_ledger(&self, session_id: &str) -> StorageResult<LedgerSnapshot> {
        let mut snapshot = LedgerSnapshot::default();

        let mut stmt = self.conn.prepare(
            "SELECT item_url, category_id, outcome, attempts
             FROM ledger_done WHERE session_id = ?1 ORDER BY item_url",
        )?;
        let rows = stmt.query_map(params![session_id], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, u32>(3)?,
            ))
        })?;
        for row in rows {
            let (item_url, category_id, outcome, attempts) = row?;
            let outcome = DoneOutcome::from_db_string(&outcome).ok_or_else(|| {
                StorageError::Corrupt(format!("unknown ledger outcome '{}'", outcome))
            })?;
            snapshot.done.push(DoneEntry {
                item_url,
                category_id,
                outcome,
                attempts,
            });
        }

        let mut stmt = self.conn.prepare(
            "SELECT item_url, category_id, title, price_text, attempts, requeues
             FROM ledger_pending WHERE session_id = ?1 ORDER BY item_url",
        )?;
        let rows = stmt.query_map(params![session_id], |row| {
            Ok(PendingClaim {
                stub: ItemStub {
                    item_url: row.get(0)?,
                    category_id: row.get(1)?,
                    snippet: ListingSnippet {
                        title: row.get(2)?,
                        price_text: row.get(3)?,
                    },
                },
                attempts: row.get(4)?,
                requeues: row.get(5)?,
            })
        })?;
        for row in rows {
            snapshot.pending.push(row?);
        }

        let mut stmt = self.conn.prepare(
            "SELECT category_id, page_index FROM visited_pages
             WHERE session_id = ?1 ORDER BY category_id, page_index",
        )?;
        let rows = stmt.query_map(params![session_id], |row| {
            Ok(VisitedPage {
                category_id: row.get(0)?,
                page_index: row.get(1)?,
            })
        })?;
        for row in rows {
            snapshot.visited_pages.push(row?);
        }

        Ok(snapshot)
    }
}

impl CheckpointStore for SqliteCheckpointStore {
    fn save(&mut self, checkpoint: &Checkpoint) -> StorageResult<()> {
        let tx = self.conn.transaction()?;

        Self::write_session(&tx, checkpoint)?;
        Self::write_categories(&tx, &checkpoint.session)?;
        Self::write_ledger(&tx, &checkpoint.session.session_id, &checkpoint.ledger)?;

        tx.commit()?;

        tracing::debug!(
            "Checkpoint saved for session {} ({} done, {} pending)",
            checkpoint.session.session_id,
            checkpoint.ledger.done.len(),
            checkpoint.ledger.pending.len()
        );
        Ok(())
    }

    fn load_latest(&self) -> StorageResult<Option<Checkpoint>> {
        let latest: Option<String> = self
            .conn
            .query_row(
                "SELECT session_id FROM sessions ORDER BY save_seq DESC LIMIT 1",
                [],
                |row| row.get(0),
            )
            .optional()?;

        match latest {
            Some(session_id) => self.load_session(&session_id).map(Some),
            None => Ok(None),
        }
    }

    fn load_session(&self, session_id: &str) -> StorageResult<Checkpoint> {
        let (session, saved_at) = self.read_session(session_id)?;
        let ledger = self.read_ledger(session_id)?;

        Ok(Checkpoint {
            session,
            ledger,
            saved_at,
        })
    }
}

fn parse_timestamp(s: &str) -> StorageResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StorageError::Corrupt(format!("bad timestamp '{}': {}", s, e)))
}
