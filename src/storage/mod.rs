//! Persisted state for the harvester.
//!
//! Plain files under one data directory act as the database:
//!
//! ```text
//! data/
//! ├── records.jsonl         # Append-only record log, one JSON record per line
//! ├── index.json            # by_date / by_source / by_id lookups (atomic replace)
//! ├── metadata.json         # Count, date range, last crawl marker (atomic replace)
//! ├── manifest.json         # Upload state per document (snapshot, compacted on load)
//! ├── manifest.journal      # Upload state changes since the snapshot, one per line
//! └── staging/              # Formatted documents waiting for upload (disposable)
//! ```
//!
//! The record log and the manifest journal are only ever appended to (the log
//! is atomically replaced on a full rebuild). Every other file is replaced with write-to-temp-then-rename so a
//! reader never observes a half-written file.

pub mod index;
pub mod manifest;
pub mod records;

use std::path::Path;

use serde::{Serialize, de::DeserializeOwned};
use tokio::io::AsyncWriteExt;

use crate::error::{AppError, Result};

// Re-export for convenience
pub use index::IndexManager;
pub use manifest::Manifest;
pub use records::{MalformedLine, RecordReader, RecordStore, WriteMode, WriteSummary};

/// Ensure the parent directory of `path` exists.
async fn ensure_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent).await?;
        }
    }
    Ok(())
}

/// Write bytes atomically (write to temp, fsync, then rename).
pub(crate) async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    ensure_parent(path).await?;

    let tmp = path.with_extension("tmp");
    let mut file = tokio::fs::File::create(&tmp).await?;
    file.write_all(bytes).await?;
    file.flush().await?;
    file.sync_all().await?;
    drop(file);

    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}

/// Serialize as pretty JSON and write atomically.
pub(crate) async fn write_json_atomic<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let bytes = serde_json::to_vec_pretty(value)?;
    write_atomic(path, &bytes).await
}

/// Read bytes, returning None if the file doesn't exist.
pub(crate) async fn read_optional(path: &Path) -> Result<Option<Vec<u8>>> {
    match tokio::fs::read(path).await {
        Ok(bytes) => Ok(Some(bytes)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(AppError::Io(e)),
    }
}

/// Read a JSON file. A file that exists but does not parse is an integrity
/// error, never silently replaced by defaults.
pub(crate) async fn read_json_optional<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    match read_optional(path).await? {
        Some(bytes) => serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|e| AppError::integrity(path.display(), e)),
        None => Ok(None),
    }
}
