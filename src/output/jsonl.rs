//! JSON Lines output
//!
//! Records and failures go to two separate files, one JSON object per line.
//! Files are opened in append mode so a resumed session extends the output
//! of the interrupted one.

use crate::model::{FailureKind, FailureRecord, ItemRecord, RecordQuality};
use crate::output::traits::{OutputResult, OutputSink, PersistedOutput};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

pub struct JsonLinesSink {
    records: Mutex<BufWriter<File>>,
    failures: Mutex<BufWriter<File>>,
    records_path: PathBuf,
    failures_path: PathBuf,
}

#[derive(Deserialize)]
struct RecordKey {
    item_url: String,
    quality: RecordQuality,
}

#[derive(Deserialize)]
struct FailureKey {
    url: String,
    kind: FailureKind,
}

impl JsonLinesSink {
    /// Opens (or creates) the record and failure files
    ///
    /// # Arguments
    ///
    /// * `records_path` - File receiving one `ItemRecord` per line
    /// * `failures_path` - File receiving one `FailureRecord` per line
    /// * `truncate` - Start both files empty instead of appending
    pub fn open(records_path: &Path, failures_path: &Path, truncate: bool) -> OutputResult<Self> {
        Ok(Self {
            records: Mutex::new(BufWriter::new(open_file(records_path, truncate)?)),
            failures: Mutex::new(BufWriter::new(open_file(failures_path, truncate)?)),
            records_path: records_path.to_path_buf(),
            failures_path: failures_path.to_path_buf(),
        })
    }
}

fn open_file(path: &Path, truncate: bool) -> OutputResult<File> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let mut options = OpenOptions::new();
    options.create(true);
    if truncate {
        options.write(true).truncate(true);
    } else {
        options.append(true);
    }
    Ok(options.open(path)?)
}

fn lock(writer: &Mutex<BufWriter<File>>) -> MutexGuard<'_, BufWriter<File>> {
    writer.lock().unwrap_or_else(PoisonError::into_inner)
}

fn write_line<T: Serialize>(writer: &Mutex<BufWriter<File>>, value: &T) -> OutputResult<()> {
    let line = serde_json::to_string(value)?;
    let mut writer = lock(writer);
    writer.write_all(line.as_bytes())?;
    writer.write_all(b"\n")?;
    Ok(())
}

/// Parses every line of a JSON Lines file
///
/// A crash can leave a torn last line; lines that do not parse are skipped.
fn read_lines<T: DeserializeOwned>(path: &Path) -> OutputResult<Vec<T>> {
    let reader = BufReader::new(File::open(path)?);
    let mut values = Vec::new();
    for (n, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str(&line) {
            Ok(value) => values.push(value),
            Err(e) => tracing::warn!("Skipping line {} of {}: {}", n + 1, path.display(), e),
        }
    }
    Ok(values)
}

impl OutputSink for JsonLinesSink {
    fn deliver(&self, record: &ItemRecord) -> OutputResult<()> {
        write_line(&self.records, record)
    }

    fn record_failure(&self, failure: &FailureRecord) -> OutputResult<()> {
        write_line(&self.failures, failure)
    }

    fn flush(&self) -> OutputResult<()> {
        lock(&self.records).flush()?;
        lock(&self.failures).flush()?;
        Ok(())
    }

    fn persisted(&self) -> OutputResult<PersistedOutput> {
        self.flush()?;

        let records = read_lines::<RecordKey>(&self.records_path)?
            .into_iter()
            .map(|key| (key.item_url, key.quality))
            .collect();
        let failures = read_lines::<FailureKey>(&self.failures_path)?
            .into_iter()
            .map(|key| (key.url, key.kind))
            .collect();

        Ok(PersistedOutput { records, failures })
    }
}

impl Drop for JsonLinesSink {
    fn drop(&mut self) {
        if let Err(e) = self.flush() {
            tracing::warn!("Failed to flush output on drop: {}", e);
        }
    }
}
