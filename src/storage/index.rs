// src/storage/index.rs

//! Persistence for the record index and metadata summary.
//!
//! Both files are replaced atomically. The index is written first, so a crash
//! between the two writes leaves a summary that lags the index, never one that
//! describes records the index does not know about.

use std::path::{Path, PathBuf};

use crate::error::Result;
use crate::models::StoredRecord;
use crate::pipeline::index::{IndexBuilder, MetadataSummary, RecordIndex, build_index};

use super::RecordStore;

/// Reads and writes `index.json` and `metadata.json`.
#[derive(Debug, Clone)]
pub struct IndexManager {
    index_path: PathBuf,
    metadata_path: PathBuf,
}

impl IndexManager {
    pub fn new(index_path: impl Into<PathBuf>, metadata_path: impl Into<PathBuf>) -> Self {
        Self {
            index_path: index_path.into(),
            metadata_path: metadata_path.into(),
        }
    }

    pub fn index_path(&self) -> &Path {
        &self.index_path
    }

    pub fn metadata_path(&self) -> &Path {
        &self.metadata_path
    }

    /// Load the persisted index; missing reads as empty.
    pub async fn load_index(&self) -> Result<RecordIndex> {
        Ok(super::read_json_optional(&self.index_path)
            .await?
            .unwrap_or_default())
    }

    /// Load the persisted summary; missing reads as empty.
    pub async fn load_metadata(&self) -> Result<MetadataSummary> {
        Ok(super::read_json_optional(&self.metadata_path)
            .await?
            .unwrap_or_default())
    }

    /// Rebuild from a complete record set and replace the persisted files.
    pub async fn build_index(&self, records: &[StoredRecord]) -> Result<MetadataSummary> {
        let (index, summary) = build_index(records);
        self.persist(&index, &summary).await?;
        log::info!(
            "Index rebuilt: {} records, {} dates, {} sources",
            summary.total_count,
            index.by_date.len(),
            index.by_source.len()
        );
        Ok(summary)
    }

    /// Merge newly stored records into the persisted index.
    ///
    /// Returns how many records were added; already indexed ids are ignored.
    pub async fn update_index(&self, records: &[StoredRecord]) -> Result<usize> {
        if records.is_empty() {
            return Ok(0);
        }

        let mut builder = IndexBuilder::resume(self.load_index().await?, self.load_metadata().await?);
        let added = builder.add_all(records);
        if added == 0 {
            return Ok(0);
        }

        let (index, summary) = builder.build();
        self.persist(&index, &summary).await?;
        log::info!(
            "Index updated: {} new records, {} total",
            added,
            summary.total_count
        );
        Ok(added)
    }

    /// Stream the whole log into a fresh index.
    pub async fn rebuild_from_store(&self, store: &RecordStore) -> Result<MetadataSummary> {
        let mut reader = store.stream_read().await?;
        let mut builder = IndexBuilder::new();
        while let Some(stored) = reader.next_record().await? {
            builder.add(&stored);
        }
        if !reader.malformed().is_empty() {
            log::warn!(
                "Skipped {} malformed lines while rebuilding the index",
                reader.malformed().len()
            );
        }

        let (index, summary) = builder.build();
        self.persist(&index, &summary).await?;
        log::info!(
            "Index rebuilt from {}: {} records",
            store.path().display(),
            summary.total_count
        );
        Ok(summary)
    }

    /// Rebuild if the summary count disagrees with the log.
    ///
    /// Covers a run that stopped between appending and indexing. Returns
    /// whether a rebuild happened.
    pub async fn reconcile_with(&self, store: &RecordStore) -> Result<bool> {
        let indexed = self.load_metadata().await?.total_count;
        let stored = store.count().await?;
        if indexed == stored {
            return Ok(false);
        }
        log::warn!("Index holds {indexed} records but the log holds {stored}; rebuilding");
        self.rebuild_from_store(store).await?;
        Ok(true)
    }

    async fn persist(&self, index: &RecordIndex, summary: &MetadataSummary) -> Result<()> {
        super::write_json_atomic(&self.index_path, index).await?;
        super::write_json_atomic(&self.metadata_path, summary).await
    }
}
