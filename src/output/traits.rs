//! Output sink trait and error types

use crate::model::{FailureKind, FailureRecord, ItemRecord, RecordQuality};
use std::collections::HashMap;
use thiserror::Error;

/// Errors that can occur during output operations
#[derive(Debug, Error)]
pub enum OutputError {
    #[error("Failed to write output: {0}")]
    Write(String),

    #[error("Failed to serialize output: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for output operations
pub type OutputResult<T> = Result<T, OutputError>;

/// Item URLs a sink already holds, keyed by URL
///
/// A resumed session uses this to settle claims whose output was written
/// after the last checkpoint.
#[derive(Debug, Clone, Default)]
pub struct PersistedOutput {
    pub records: HashMap<String, RecordQuality>,
    pub failures: HashMap<String, FailureKind>,
}

/// Destination for enriched records and the failure log
///
/// Called concurrently from every enrichment worker. An error from any
/// method is treated as a resource failure and aborts the session.
pub trait OutputSink: Send + Sync {
    /// Delivers one enriched record
    ///
    /// Called at most once per item URL per session.
    fn deliver(&self, record: &ItemRecord) -> OutputResult<()>;

    /// Appends one entry to the structured failure log
    fn record_failure(&self, failure: &FailureRecord) -> OutputResult<()>;

    /// Makes everything delivered so far durable
    fn flush(&self) -> OutputResult<()>;

    /// Lists what the sink's durable output already contains
    fn persisted(&self) -> OutputResult<PersistedOutput>;
}
