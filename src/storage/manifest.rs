// src/storage/manifest.rs

//! Upload manifest: the durable answer to "is this document present remotely".
//!
//! State lives in two files:
//!
//! ```text
//! manifest.json      # compacted snapshot (atomic replace)
//! manifest.journal   # one JSON change per line, fsynced before returning
//! ```
//!
//! Mutations only append to the journal, so a run pays for the change it
//! makes and not for the size of the manifest. Loading replays the journal
//! over the snapshot and folds it back into a fresh snapshot.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;

use crate::error::{AppError, Result};
use crate::models::ManifestEntry;

#[derive(Debug, Default, Serialize, Deserialize)]
struct ManifestFile {
    #[serde(default)]
    collection_id: Option<String>,
    #[serde(default)]
    entries: BTreeMap<String, ManifestEntry>,
}

/// One journal line.
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
enum Change {
    Record { key: String, entry: ManifestEntry },
    Collection { id: Option<String> },
    Clear,
}

impl ManifestFile {
    fn apply(&mut self, change: Change) {
        match change {
            Change::Record { key, entry } => {
                self.entries.insert(key, entry);
            }
            Change::Collection { id } => self.collection_id = id,
            Change::Clear => *self = Self::default(),
        }
    }
}

/// Manifest of upload state keyed by document key.
#[derive(Debug)]
pub struct Manifest {
    path: PathBuf,
    journal_path: PathBuf,
    state: ManifestFile,
}

impl Manifest {
    /// Load the manifest at `path`, replaying and compacting its journal.
    ///
    /// A missing file is an empty manifest. A file that cannot be parsed is an
    /// integrity error: guessing here could re-upload or skip documents. The
    /// one exception is an unterminated last journal line, which is a change
    /// that never finished writing and is dropped.
    pub async fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let journal_path = path.with_extension("journal");
        let mut state: ManifestFile = super::read_json_optional(&path).await?.unwrap_or_default();

        let replayed = match super::read_optional(&journal_path).await? {
            Some(bytes) => replay(&journal_path, &bytes, &mut state)?,
            None => 0,
        };

        let manifest = Self {
            path,
            journal_path,
            state,
        };
        if replayed > 0 {
            manifest.compact().await?;
        }
        log::debug!(
            "Loaded manifest {} ({} entries, {} journal changes)",
            manifest.path.display(),
            manifest.state.entries.len(),
            replayed
        );
        Ok(manifest)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn journal_path(&self) -> &Path {
        &self.journal_path
    }

    pub fn get(&self, key: &str) -> Option<&ManifestEntry> {
        self.state.entries.get(key)
    }

    pub fn entries(&self) -> &BTreeMap<String, ManifestEntry> {
        &self.state.entries
    }

    pub fn len(&self) -> usize {
        self.state.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.entries.is_empty()
    }

    /// Remote collection the documents are attached to.
    pub fn collection_id(&self) -> Option<&str> {
        self.state.collection_id.as_deref()
    }

    /// Store the entry for `key` and persist.
    pub async fn record(&mut self, key: impl Into<String>, entry: ManifestEntry) -> Result<()> {
        self.commit(Change::Record {
            key: key.into(),
            entry,
        })
        .await
    }

    pub async fn set_collection_id(&mut self, collection_id: Option<String>) -> Result<()> {
        self.commit(Change::Collection { id: collection_id }).await
    }

    /// Forget every entry and the collection id.
    pub async fn clear(&mut self) -> Result<()> {
        // Journaled first: a crash before compaction still replays as empty.
        self.commit(Change::Clear).await?;
        self.compact().await
    }

    async fn commit(&mut self, change: Change) -> Result<()> {
        let mut line = serde_json::to_vec(&change)?;
        line.push(b'\n');

        super::ensure_parent(&self.journal_path).await?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.journal_path)
            .await?;
        file.write_all(&line).await?;
        file.flush().await?;
        file.sync_data().await?;

        self.state.apply(change);
        Ok(())
    }

    /// Fold the journal into the snapshot.
    ///
    /// The snapshot is replaced before the journal is removed; replaying a
    /// journal that is already folded in gives the same state.
    async fn compact(&self) -> Result<()> {
        super::write_json_atomic(&self.path, &self.state).await?;
        match tokio::fs::remove_file(&self.journal_path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Apply every journal line to `state`. Returns how many changes were applied.
fn replay(path: &Path, bytes: &[u8], state: &mut ManifestFile) -> Result<usize> {
    let mut applied = 0;
    let mut lines = bytes.split_inclusive(|&b| b == b'\n').enumerate().peekable();

    while let Some((number, raw)) = lines.next() {
        let content = raw.trim_ascii();
        if content.is_empty() {
            continue;
        }
        match serde_json::from_slice::<Change>(content) {
            Ok(change) => {
                state.apply(change);
                applied += 1;
            }
            Err(e) if lines.peek().is_none() && raw.last() != Some(&b'\n') => {
                log::warn!(
                    "Dropping unfinished change at {} line {}: {}",
                    path.display(),
                    number + 1,
                    e
                );
                // Counts as a change so compaction removes the torn line.
                applied += 1;
            }
            Err(e) => {
                return Err(AppError::integrity(
                    path.display(),
                    format!("line {}: {}", number + 1, e),
                ));
            }
        }
    }
    Ok(applied)
}
