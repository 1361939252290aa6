use crate::model::{FailureRecord, ItemRecord};
use crate::output::traits::{OutputError, OutputResult, OutputSink, PersistedOutput};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

#[derive(Debug, Default)]
struct Collected {
    records: Vec<ItemRecord>,
    failures: Vec<FailureRecord>,
    flushes: usize,
}

/// In-memory sink
///
/// Clones share the same buffers. `failing_after(n)` makes every delivery
/// after the first `n` return an error.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    collected: Arc<Mutex<Collected>>,
    fail_after: Option<usize>,
    delivered: Arc<AtomicUsize>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_after(deliveries: usize) -> Self {
        Self {
            fail_after: Some(deliveries),
            ..Self::default()
        }
    }

    fn collected(&self) -> MutexGuard<'_, Collected> {
        self.collected.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn records(&self) -> Vec<ItemRecord> {
        self.collected().records.clone()
    }

    pub fn failures(&self) -> Vec<FailureRecord> {
        self.collected().failures.clone()
    }

    pub fn flush_count(&self) -> usize {
        self.collected().flushes
    }
}

impl OutputSink for MemorySink {
    fn deliver(&self, record: &ItemRecord) -> OutputResult<()> {
        let n = self.delivered.fetch_add(1, Ordering::SeqCst);
        if self.fail_after.is_some_and(|limit| n >= limit) {
            return Err(OutputError::Write(format!(
                "sink refused {}",
                record.item_url
            )));
        }

        self.collected().records.push(record.clone());
        Ok(())
    }

    fn record_failure(&self, failure: &FailureRecord) -> OutputResult<()> {
        self.collected().failures.push(failure.clone());
        Ok(())
    }

    fn flush(&self) -> OutputResult<()> {
        self.collected().flushes += 1;
        Ok(())
    }

    fn persisted(&self) -> OutputResult<PersistedOutput> {
        let collected = self.collected();
        Ok(PersistedOutput {
            records: collected
                .records
                .iter()
                .map(|r| (r.item_url.clone(), r.quality))
                .collect(),
            failures: collected
                .failures
                .iter()
                .map(|f| (f.url.clone(), f.kind))
                .collect(),
        })
    }
}
