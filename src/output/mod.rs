//! Output sinks and the session summary
//!
//! This module handles:
//! - Delivering enriched records and the failure log (`OutputSink`)
//! - Summarizing a finished session

mod jsonl;
mod memory;
pub mod stats;
mod traits;

pub use jsonl::JsonLinesSink;
pub use memory::MemorySink;
pub use stats::{print_summary, CategorySummary, SessionSummary};
pub use traits::{OutputError, OutputResult, OutputSink, PersistedOutput};
