//! Session state for a crawl
//!
//! # Components
//!
//! - `SessionState`: lifecycle of a session (idle, running, checkpointing, completed, aborted)
//! - `CrawlSession`: the explicit session value the coordinator owns and checkpoints
//! - `CategoryProgress`: per-category resume point and status

mod session;
mod session_state;

// Re-export main types
pub use session::{
    CategoryProgress, CategoryStatus, CrawlSession, FailureCounts, SessionCounters,
};
pub use session_state::SessionState;
