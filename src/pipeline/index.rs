//! Secondary lookups over the record log.
//!
//! The index is derived data: it maps dates, sources and ids to record
//! locations (1-based log lines) and can always be rebuilt from the log.
//!
//! ```text
//! by_date   "2025-11-12" -> { lines: [3, 4], count: 2 }
//! by_source "bank_bureau" -> { count: 7, latest_line: 42 }
//! by_id     "fsc_ann_20251112_0001" -> { line: 3, date, source }
//! ```
//!
//! Folding records one at a time gives the same result whether they arrive
//! in a single full build or in many incremental chunks, in any order: date
//! lines are kept sorted and the crawl marker follows the highest line.

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::models::StoredRecord;

/// Records published on one date.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct DateEntry {
    pub lines: Vec<u64>,
    pub count: usize,
}

/// Records from one source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct SourceEntry {
    pub count: usize,
    pub latest_line: u64,
}

/// Location of one record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdEntry {
    pub line: u64,
    pub date: NaiveDate,
    pub source: String,
}

/// The three lookup maps.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct RecordIndex {
    /// Keyed by `YYYY-MM-DD`
    pub by_date: BTreeMap<String, DateEntry>,
    pub by_source: BTreeMap<String, SourceEntry>,
    pub by_id: BTreeMap<String, IdEntry>,
}

impl RecordIndex {
    /// Fold one stored record into the index.
    ///
    /// Returns false (and changes nothing) if the id is already indexed.
    pub fn insert(&mut self, stored: &StoredRecord) -> bool {
        let record = &stored.record;
        if self.by_id.contains_key(&record.id) {
            return false;
        }

        let date = self.by_date.entry(date_key(record.date)).or_default();
        let at = date.lines.partition_point(|&line| line < stored.line);
        date.lines.insert(at, stored.line);
        date.count += 1;

        let source = self.by_source.entry(record.source.clone()).or_default();
        source.count += 1;
        source.latest_line = source.latest_line.max(stored.line);

        self.by_id.insert(
            record.id.clone(),
            IdEntry {
                line: stored.line,
                date: record.date,
                source: record.source.clone(),
            },
        );
        true
    }

    /// Log lines of records published on `date`.
    pub fn lines_for_date(&self, date: NaiveDate) -> &[u64] {
        self.by_date
            .get(&date_key(date))
            .map(|entry| entry.lines.as_slice())
            .unwrap_or(&[])
    }

    /// Count and latest location for a source.
    pub fn source_stats(&self, source: &str) -> Option<&SourceEntry> {
        self.by_source.get(source)
    }

    /// Location and date of a record.
    pub fn locate(&self, id: &str) -> Option<&IdEntry> {
        self.by_id.get(id)
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }
}

fn date_key(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

/// Marker of the most recently indexed record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrawlMarker {
    pub id: String,
    pub date: NaiveDate,
    #[serde(default)]
    pub line: u64,
}

/// Aggregate facts about the log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct MetadataSummary {
    pub total_count: usize,
    /// `[earliest, latest]` publication date
    pub date_range: Option<(NaiveDate, NaiveDate)>,
    pub last_crawl_marker: Option<CrawlMarker>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl MetadataSummary {
    fn observe(&mut self, stored: &StoredRecord) {
        let record = &stored.record;
        self.total_count += 1;
        self.date_range = Some(match self.date_range {
            Some((min, max)) => (min.min(record.date), max.max(record.date)),
            None => (record.date, record.date),
        });
        if self
            .last_crawl_marker
            .as_ref()
            .is_none_or(|marker| stored.line >= marker.line)
        {
            self.last_crawl_marker = Some(CrawlMarker {
                id: record.id.clone(),
                date: record.date,
                line: stored.line,
            });
        }
    }

    /// Equality on content, ignoring when the summary was written.
    pub fn same_content(&self, other: &Self) -> bool {
        self.total_count == other.total_count
            && self.date_range == other.date_range
            && self.last_crawl_marker == other.last_crawl_marker
    }
}

/// Accumulates an index and its summary.
#[derive(Debug, Default)]
pub struct IndexBuilder {
    index: RecordIndex,
    summary: MetadataSummary,
}

impl IndexBuilder {
    /// Start from nothing (full rebuild).
    pub fn new() -> Self {
        Self::default()
    }

    /// Continue from a persisted index (incremental update).
    pub fn resume(index: RecordIndex, summary: MetadataSummary) -> Self {
        Self { index, summary }
    }

    /// Add a record; already indexed ids are ignored.
    pub fn add(&mut self, stored: &StoredRecord) -> bool {
        let added = self.index.insert(stored);
        if added {
            self.summary.observe(stored);
        }
        added
    }

    /// Add multiple records in log order. Returns how many were new.
    pub fn add_all<'a>(&mut self, records: impl IntoIterator<Item = &'a StoredRecord>) -> usize {
        records.into_iter().filter(|stored| self.add(stored)).count()
    }

    /// Finish, stamping the summary.
    pub fn build(mut self) -> (RecordIndex, MetadataSummary) {
        self.summary.updated_at = Some(Utc::now());
        (self.index, self.summary)
    }
}

/// Build an index from a complete, log-ordered record set.
pub fn build_index(records: &[StoredRecord]) -> (RecordIndex, MetadataSummary) {
    let mut builder = IndexBuilder::new();
    builder.add_all(records);
    builder.build()
}
