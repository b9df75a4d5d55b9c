// src/models/record.rs

//! Harvested record data structures.

use std::collections::{BTreeMap, HashMap};

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// One harvested unit. Immutable once appended to the record log.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Record {
    /// Unique identifier: `{prefix}_{YYYYMMDD}_{seq:04}`
    pub id: String,

    /// Publication date
    pub date: NaiveDate,

    /// Categorical origin tag (issuing unit, bureau, ...)
    pub source: String,

    /// Record title
    pub title: String,

    /// Cleaned text plus optional truncated raw markup
    pub body: RecordBody,

    /// Attachments in the order the source lists them
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<Attachment>,

    /// Open key/value metadata (classification tags, document numbers, ...)
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, serde_json::Value>,

    /// Original location of the record on the source site
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail_url: Option<String>,
}

/// Textual content of a record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct RecordBody {
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub html: Option<String>,
}

/// Reference to a file attached to a record. The file itself is never stored.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Attachment {
    pub name: String,
    pub url: String,
    /// Lowercase file type, e.g. "pdf"
    #[serde(rename = "type")]
    pub kind: String,
}

impl Attachment {
    /// Build an attachment, deriving its type from the URL or name extension.
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        let name = name.into();
        let url = url.into();
        let kind = extension_of(url.split(['?', '#']).next().unwrap_or(""))
            .or_else(|| extension_of(&name))
            .unwrap_or_else(|| "unknown".to_string());
        Self { name, url, kind }
    }
}

fn extension_of(s: &str) -> Option<String> {
    let last = s.rsplit('/').next()?;
    let (_, ext) = last.rsplit_once('.')?;
    if ext.is_empty() || ext.len() > 5 || !ext.chars().all(|c| c.is_ascii_alphanumeric()) {
        return None;
    }
    Some(ext.to_ascii_lowercase())
}

/// A record produced by a source before it has been assigned an identifier.
#[derive(Debug, Clone, PartialEq)]
pub struct RawRecord {
    pub date: NaiveDate,
    pub source: String,
    pub title: String,
    pub body: RecordBody,
    pub attachments: Vec<Attachment>,
    pub metadata: BTreeMap<String, serde_json::Value>,
    pub detail_url: Option<String>,
}

impl RawRecord {
    /// Attach the identifier and freeze into a [`Record`].
    pub fn into_record(self, id: String) -> Record {
        Record {
            id,
            date: self.date,
            source: self.source,
            title: self.title,
            body: self.body,
            attachments: self.attachments,
            metadata: self.metadata,
            detail_url: self.detail_url,
        }
    }
}

/// A record together with its stable 1-based line in the record log.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredRecord {
    pub line: u64,
    pub record: Record,
}

/// Allocates `{prefix}_{YYYYMMDD}_{seq:04}` identifiers, numbering records
/// per date in the order they are produced.
#[derive(Debug, Default)]
pub struct IdAllocator {
    counters: HashMap<NaiveDate, u32>,
}

impl IdAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Next identifier for a record published on `date`.
    pub fn next_id(&mut self, prefix: &str, date: NaiveDate) -> String {
        let seq = self.counters.entry(date).or_insert(0);
        *seq += 1;
        format!("{}_{}_{:04}", prefix, date.format("%Y%m%d"), seq)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_id_allocation_per_date() {
        let mut ids = IdAllocator::new();
        let d1 = NaiveDate::from_ymd_opt(2025, 11, 12).unwrap();
        let d2 = NaiveDate::from_ymd_opt(2025, 11, 13).unwrap();

        assert_eq!(ids.next_id("fsc_ann", d1), "fsc_ann_20251112_0001");
        assert_eq!(ids.next_id("fsc_ann", d1), "fsc_ann_20251112_0002");
        assert_eq!(ids.next_id("fsc_ann", d2), "fsc_ann_20251113_0001");
        assert_eq!(ids.next_id("fsc_ann", d1), "fsc_ann_20251112_0003");
    }

    #[test]
    fn test_attachment_kind() {
        assert_eq!(Attachment::new("附件1.PDF", "https://x/y").kind, "pdf");
        assert_eq!(
            Attachment::new("download", "https://x/files/a.docx?id=3").kind,
            "docx"
        );
        assert_eq!(Attachment::new("download", "https://x/get?id=3").kind, "unknown");
    }

    #[test]
    fn test_record_json_shape() {
        let record = Record {
            id: "fsc_ann_20240102_0001".into(),
            date: NaiveDate::from_ymd_opt(2024, 1, 2).unwrap(),
            source: "bank_bureau".into(),
            title: "Title".into(),
            body: RecordBody {
                text: "Body".into(),
                html: None,
            },
            attachments: vec![Attachment::new("a.pdf", "https://x/a.pdf")],
            metadata: BTreeMap::new(),
            detail_url: None,
        };

        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["date"], "2024-01-02");
        assert_eq!(json["attachments"][0]["type"], "pdf");
        assert!(json.get("metadata").is_none());

        let back: Record = serde_json::from_value(json).unwrap();
        assert_eq!(back, record);
    }
}
