//! Database schema for checkpoints

/// SQL schema for the checkpoint database
pub const SCHEMA_SQL: &str = r#"
-- One row per session, rewritten on every checkpoint
CREATE TABLE IF NOT EXISTS sessions (
    session_id TEXT PRIMARY KEY,
    started_at TEXT NOT NULL,
    config_hash TEXT NOT NULL,
    state TEXT NOT NULL,
    saved_at TEXT NOT NULL,
    save_seq INTEGER NOT NULL,
    pages_visited INTEGER NOT NULL DEFAULT 0,
    items_complete INTEGER NOT NULL DEFAULT 0,
    items_partial INTEGER NOT NULL DEFAULT 0,
    failures_transient INTEGER NOT NULL DEFAULT 0,
    failures_permanent INTEGER NOT NULL DEFAULT 0,
    failures_structural INTEGER NOT NULL DEFAULT 0,
    failures_fatal INTEGER NOT NULL DEFAULT 0
);

CREATE INDEX IF NOT EXISTS idx_sessions_seq ON sessions(save_seq);

-- Per-category resume points
CREATE TABLE IF NOT EXISTS category_progress (
    session_id TEXT NOT NULL REFERENCES sessions(session_id),
    position INTEGER NOT NULL,
    category_id TEXT NOT NULL,
    next_page INTEGER NOT NULL,
    pages_visited INTEGER NOT NULL,
    items_found INTEGER NOT NULL,
    status TEXT NOT NULL,
    PRIMARY KEY (session_id, category_id)
);

-- Finished ledger claims
CREATE TABLE IF NOT EXISTS ledger_done (
    session_id TEXT NOT NULL REFERENCES sessions(session_id),
    item_url TEXT NOT NULL,
    category_id TEXT NOT NULL,
    outcome TEXT NOT NULL,
    attempts INTEGER NOT NULL,
    PRIMARY KEY (session_id, item_url)
);

-- Claimed but unfinished items, re-queued on resume
CREATE TABLE IF NOT EXISTS ledger_pending (
    session_id TEXT NOT NULL REFERENCES sessions(session_id),
    item_url TEXT NOT NULL,
    category_id TEXT NOT NULL,
    title TEXT NOT NULL,
    price_text TEXT,
    attempts INTEGER NOT NULL,
    requeues INTEGER NOT NULL,
    PRIMARY KEY (session_id, item_url)
);

-- Listing pages already traversed
CREATE TABLE IF NOT EXISTS visited_pages (
    session_id TEXT NOT NULL REFERENCES sessions(session_id),
    category_id TEXT NOT NULL,
    page_index INTEGER NOT NULL,
    PRIMARY KEY (session_id, category_id, page_index)
);
"#;

/// Initializes the database schema
pub fn initialize_schema(conn: &rusqlite::Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(SCHEMA_SQL)?;
    Ok(())
}
