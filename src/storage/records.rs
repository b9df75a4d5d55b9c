//! Append-only record log.
//!
//! One JSON record per line. A record's line number is its stable location;
//! the index refers to records by line. Duplicate ids are dropped on append,
//! and lines that fail to parse are reported and skipped without hiding the
//! rest of the log.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use futures::Stream;
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

use crate::error::{AppError, Result};
use crate::models::{Record, StoredRecord};

/// How [`RecordStore::write`] treats the existing log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    /// Replace the whole log (full rebuild)
    Overwrite,
    /// Add records whose id is not yet in the log
    Append,
}

/// Outcome of a write.
#[derive(Debug, Default)]
pub struct WriteSummary {
    /// Records that were written, with their new locations
    pub written: Vec<StoredRecord>,
    /// Records dropped because their id was already present
    pub skipped: usize,
    /// Log entries for skipped ids that were already in the log before this
    /// write, so callers can fold them into derived data that may lag the log
    pub already_stored: Vec<StoredRecord>,
}

impl WriteSummary {
    /// Every record of the batch that is now in the log, in log order.
    pub fn stored(&self) -> Vec<StoredRecord> {
        let mut all: Vec<_> = self
            .already_stored
            .iter()
            .chain(&self.written)
            .cloned()
            .collect();
        all.sort_by_key(|stored| stored.line);
        all
    }
}

/// A line that could not be decoded as a record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MalformedLine {
    pub line: u64,
    pub error: String,
}

/// JSON-lines record log on the local filesystem.
///
/// Assumes a single writer; callers serialize runs.
#[derive(Debug, Clone)]
pub struct RecordStore {
    path: PathBuf,
}

impl RecordStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write records to the log.
    pub async fn write(&self, records: &[Record], mode: WriteMode) -> Result<WriteSummary> {
        match mode {
            WriteMode::Overwrite => self.overwrite(records).await,
            WriteMode::Append => self.append(records).await,
        }
    }

    async fn overwrite(&self, records: &[Record]) -> Result<WriteSummary> {
        let mut seen = HashSet::new();
        let mut summary = WriteSummary::default();
        let mut buf = Vec::new();
        let mut line = 0u64;

        for record in records {
            if !seen.insert(record.id.as_str()) {
                summary.skipped += 1;
                continue;
            }
            serde_json::to_writer(&mut buf, record)?;
            buf.push(b'\n');
            line += 1;
            summary.written.push(StoredRecord {
                line,
                record: record.clone(),
            });
        }

        super::write_atomic(&self.path, &buf).await?;
        log::info!(
            "Record log rebuilt: {} records written to {}",
            summary.written.len(),
            self.path.display()
        );
        Ok(summary)
    }

    async fn append(&self, records: &[Record]) -> Result<WriteSummary> {
        let incoming: HashSet<&str> = records.iter().map(|r| r.id.as_str()).collect();
        let mut summary = WriteSummary::default();

        let mut reader = self.stream_read().await?;
        let mut known = HashSet::new();
        while let Some(stored) = reader.next_record().await? {
            known.insert(stored.record.id.clone());
            if incoming.contains(stored.record.id.as_str()) {
                summary.already_stored.push(stored);
            }
        }
        let mut line = reader.lines_read();

        let mut buf = Vec::new();
        if line > 0 && !reader.ends_with_newline() {
            // Isolate a partial line left by an interrupted write.
            buf.push(b'\n');
        }

        for record in records {
            if !known.insert(record.id.clone()) {
                log::debug!("Record {} already present, skipping", record.id);
                summary.skipped += 1;
                continue;
            }
            serde_json::to_writer(&mut buf, record)?;
            buf.push(b'\n');
            line += 1;
            summary.written.push(StoredRecord {
                line,
                record: record.clone(),
            });
        }

        if summary.written.is_empty() {
            return Ok(summary);
        }

        super::ensure_parent(&self.path).await?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(&buf).await?;
        file.flush().await?;
        file.sync_data().await?;

        log::debug!(
            "Appended {} records ({} already present)",
            summary.written.len(),
            summary.skipped
        );
        Ok(summary)
    }

    /// Open a lazy reader positioned at the start of the log.
    ///
    /// A missing log reads as empty.
    pub async fn stream_read(&self) -> Result<RecordReader> {
        let inner = match File::open(&self.path).await {
            Ok(file) => Some(BufReader::new(file)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => return Err(AppError::Io(e)),
        };
        Ok(RecordReader {
            inner,
            line: 0,
            buf: Vec::new(),
            ends_with_newline: true,
            malformed: Vec::new(),
        })
    }

    /// Read every valid record into memory.
    pub async fn read_all(&self) -> Result<Vec<StoredRecord>> {
        let mut reader = self.stream_read().await?;
        let mut records = Vec::new();
        while let Some(stored) = reader.next_record().await? {
            records.push(stored);
        }
        Ok(records)
    }

    /// The most recently appended valid record.
    pub async fn get_last_item(&self) -> Result<Option<StoredRecord>> {
        let mut reader = self.stream_read().await?;
        let mut last = None;
        while let Some(stored) = reader.next_record().await? {
            last = Some(stored);
        }
        Ok(last)
    }

    /// Ids of all valid records.
    pub async fn ids(&self) -> Result<HashSet<String>> {
        let mut reader = self.stream_read().await?;
        let mut ids = HashSet::new();
        while let Some(stored) = reader.next_record().await? {
            ids.insert(stored.record.id);
        }
        Ok(ids)
    }

    /// Number of valid records.
    pub async fn count(&self) -> Result<usize> {
        let mut reader = self.stream_read().await?;
        let mut count = 0;
        while reader.next_record().await?.is_some() {
            count += 1;
        }
        Ok(count)
    }
}

/// Line-at-a-time reader over the record log.
pub struct RecordReader {
    inner: Option<BufReader<File>>,
    line: u64,
    buf: Vec<u8>,
    ends_with_newline: bool,
    malformed: Vec<MalformedLine>,
}

impl RecordReader {
    /// Next valid record, skipping blank and malformed lines.
    ///
    /// I/O failures are returned as errors; the log cannot be trusted past them.
    pub async fn next_record(&mut self) -> Result<Option<StoredRecord>> {
        let Some(reader) = self.inner.as_mut() else {
            return Ok(None);
        };

        loop {
            self.buf.clear();
            let n = reader.read_until(b'\n', &mut self.buf).await?;
            if n == 0 {
                self.inner = None;
                return Ok(None);
            }
            self.line += 1;
            self.ends_with_newline = self.buf.last() == Some(&b'\n');

            let content = self.buf.trim_ascii();
            if content.is_empty() {
                continue;
            }

            match serde_json::from_slice::<Record>(content) {
                Ok(record) => {
                    return Ok(Some(StoredRecord {
                        line: self.line,
                        record,
                    }));
                }
                Err(e) => {
                    log::warn!("Skipping malformed record at line {}: {}", self.line, e);
                    self.malformed.push(MalformedLine {
                        line: self.line,
                        error: e.to_string(),
                    });
                }
            }
        }
    }

    /// Malformed lines seen so far.
    pub fn malformed(&self) -> &[MalformedLine] {
        &self.malformed
    }

    /// Physical lines consumed so far.
    pub fn lines_read(&self) -> u64 {
        self.line
    }

    /// Whether the last line consumed was terminated.
    pub fn ends_with_newline(&self) -> bool {
        self.ends_with_newline
    }

    /// Adapt into a `Stream`. The stream ends after the first I/O error.
    pub fn into_stream(self) -> impl Stream<Item = Result<StoredRecord>> {
        futures::stream::unfold(Some(self), |state| async move {
            let mut reader = state?;
            match reader.next_record().await {
                Ok(Some(stored)) => Some((Ok(stored), Some(reader))),
                Ok(None) => None,
                Err(e) => Some((Err(e), None)),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::RecordBody;
    use chrono::NaiveDate;
    use futures::StreamExt;
    use std::collections::BTreeMap;
    use tempfile::TempDir;

    fn record(id: &str, date: &str) -> Record {
        Record {
            id: id.to_string(),
            date: NaiveDate::parse_from_str(date, "%Y-%m-%d").unwrap(),
            source: "bank_bureau".to_string(),
            title: format!("Title {id}"),
            body: RecordBody {
                text: "body".to_string(),
                html: None,
            },
            attachments: Vec::new(),
            metadata: BTreeMap::new(),
            detail_url: None,
        }
    }

    fn store_in(tmp: &TempDir) -> RecordStore {
        RecordStore::new(tmp.path().join("records.jsonl"))
    }

    #[tokio::test]
    async fn test_missing_log_reads_empty() {
        let tmp = TempDir::new().unwrap();
        let store = store_in(&tmp);

        assert!(store.read_all().await.unwrap().is_empty());
        assert!(store.get_last_item().await.unwrap().is_none());
        assert_eq!(store.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_append_is_idempotent() {
        let tmp = TempDir::new().unwrap();
        let store = store_in(&tmp);
        let batch = vec![record("a", "2024-01-01"), record("b", "2024-01-02")];

        let first = store.write(&batch, WriteMode::Append).await.unwrap();
        assert_eq!(first.written.len(), 2);
        assert_eq!(first.skipped, 0);

        let second = store.write(&batch, WriteMode::Append).await.unwrap();
        assert!(second.written.is_empty());
        assert_eq!(second.skipped, 2);
        assert_eq!(store.count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_append_assigns_following_lines() {
        let tmp = TempDir::new().unwrap();
        let store = store_in(&tmp);

        store
            .write(&[record("a", "2024-01-01")], WriteMode::Append)
            .await
            .unwrap();
        let summary = store
            .write(
                &[record("a", "2024-01-01"), record("b", "2024-01-02"), record("b", "2024-01-02")],
                WriteMode::Append,
            )
            .await
            .unwrap();

        assert_eq!(summary.written.len(), 1);
        assert_eq!(summary.written[0].line, 2);
        assert_eq!(summary.skipped, 2);
        assert_eq!(summary.already_stored.len(), 1);
        assert_eq!(summary.already_stored[0].record.id, "a");

        let lines: Vec<_> = summary
            .stored()
            .into_iter()
            .map(|s| (s.line, s.record.id))
            .collect();
        assert_eq!(lines, vec![(1, "a".to_string()), (2, "b".to_string())]);

        let last = store.get_last_item().await.unwrap().unwrap();
        assert_eq!(last.record.id, "b");
        assert_eq!(last.line, 2);
    }

    #[tokio::test]
    async fn test_overwrite_replaces_log() {
        let tmp = TempDir::new().unwrap();
        let store = store_in(&tmp);

        store
            .write(&[record("a", "2024-01-01"), record("b", "2024-01-02")], WriteMode::Append)
            .await
            .unwrap();
        let summary = store
            .write(&[record("c", "2024-01-03")], WriteMode::Overwrite)
            .await
            .unwrap();

        assert_eq!(summary.written[0].line, 1);
        let all = store.read_all().await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].record.id, "c");
    }

    #[tokio::test]
    async fn test_malformed_lines_are_skipped_and_reported() {
        let tmp = TempDir::new().unwrap();
        let store = store_in(&tmp);
        let good = serde_json::to_string(&record("a", "2024-01-01")).unwrap();
        let also_good = serde_json::to_string(&record("b", "2024-01-02")).unwrap();
        let content = format!("{good}\n{{broken\n\n{also_good}\n");
        tokio::fs::write(store.path(), content).await.unwrap();

        let mut reader = store.stream_read().await.unwrap();
        let first = reader.next_record().await.unwrap().unwrap();
        let second = reader.next_record().await.unwrap().unwrap();
        assert!(reader.next_record().await.unwrap().is_none());

        assert_eq!((first.line, first.record.id.as_str()), (1, "a"));
        assert_eq!((second.line, second.record.id.as_str()), (4, "b"));
        assert_eq!(reader.malformed().len(), 1);
        assert_eq!(reader.malformed()[0].line, 2);
    }

    #[tokio::test]
    async fn test_append_after_partial_line() {
        let tmp = TempDir::new().unwrap();
        let store = store_in(&tmp);
        let good = serde_json::to_string(&record("a", "2024-01-01")).unwrap();
        tokio::fs::write(store.path(), format!("{good}\n{{\"id\":\"trunc"))
            .await
            .unwrap();

        let summary = store
            .write(&[record("b", "2024-01-02")], WriteMode::Append)
            .await
            .unwrap();
        assert_eq!(summary.written[0].line, 3);

        let ids: Vec<_> = store
            .read_all()
            .await
            .unwrap()
            .into_iter()
            .map(|s| (s.line, s.record.id))
            .collect();
        assert_eq!(ids, vec![(1, "a".to_string()), (3, "b".to_string())]);
    }

    #[tokio::test]
    async fn test_stream_matches_read_all_and_restarts() {
        let tmp = TempDir::new().unwrap();
        let store = store_in(&tmp);
        let batch: Vec<_> = (1..=5)
            .map(|i| record(&format!("r{i}"), "2024-02-01"))
            .collect();
        store.write(&batch, WriteMode::Append).await.unwrap();

        let all = store.read_all().await.unwrap();
        for _ in 0..2 {
            let streamed: Vec<_> = store
                .stream_read()
                .await
                .unwrap()
                .into_stream()
                .map(|r| r.unwrap())
                .collect()
                .await;
            assert_eq!(streamed, all);
        }
    }
}
