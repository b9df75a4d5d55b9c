// src/services/uploader.rs

//! Idempotent upload of documents to the retrieval backend.
//!
//! Per document the manifest moves through:
//!
//! ```text
//! (absent) -> pending -> success
//!                 \----> failed -> pending (next attempt or next run)
//! ```
//!
//! The manifest is persisted after every attempt and as soon as a remote
//! object id is known, so a restart resumes from the last recorded step:
//! an object that was uploaded but never attached is attached, not uploaded
//! again.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::Utc;
use tokio::time::sleep;

use crate::error::{AppError, Result};
use crate::models::{Document, FailureClass, ManifestEntry, UploadConfig, UploadStatus};
use crate::storage::{Manifest, RecordStore};
use crate::utils::RetryPolicy;

use super::backend::RetrievalBackend;

/// What `upload_one` did with a document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadOutcome {
    Uploaded { remote_id: String },
    /// Already recorded as uploaded
    Skipped,
    Failed { error: String, failure: FailureClass },
}

/// Counts for a batch of uploads.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UploadReport {
    pub uploaded: usize,
    pub skipped: usize,
    pub failed: usize,
    /// `(document key, last error)` of failed documents
    pub failures: Vec<(String, String)>,
}

impl UploadReport {
    pub fn merge(&mut self, other: UploadReport) {
        self.uploaded += other.uploaded;
        self.skipped += other.skipped;
        self.failed += other.failed;
        self.failures.extend(other.failures);
    }
}

/// Upload state of one stored record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordStatus {
    Uploaded,
    Failed {
        failure: Option<FailureClass>,
        error: Option<String>,
    },
    /// Attempt started but never reported back
    InFlight,
    /// No manifest entry
    NeverAttempted,
}

/// Read-only reconciliation of the record log against the manifest.
#[derive(Debug, Clone, Default)]
pub struct CompletenessReport {
    /// Status of every record, in log order
    pub records: Vec<(String, RecordStatus)>,
    /// Manifest keys with no record in the log
    pub orphaned: Vec<String>,
    /// Log lines that could not be read
    pub malformed_lines: usize,
}

impl CompletenessReport {
    pub fn total(&self) -> usize {
        self.records.len()
    }

    pub fn uploaded(&self) -> usize {
        self.count(|s| matches!(s, RecordStatus::Uploaded))
    }

    pub fn failed(&self) -> usize {
        self.count(|s| matches!(s, RecordStatus::Failed { .. }))
    }

    /// In flight or never attempted.
    pub fn pending(&self) -> usize {
        self.count(|s| matches!(s, RecordStatus::InFlight | RecordStatus::NeverAttempted))
    }

    /// Failures whose cause could not be classified after the retry budget.
    pub fn needs_triage(&self) -> Vec<&str> {
        self.records
            .iter()
            .filter(|(_, s)| {
                matches!(
                    s,
                    RecordStatus::Failed {
                        failure: Some(FailureClass::TransientExhausted),
                        ..
                    }
                )
            })
            .map(|(key, _)| key.as_str())
            .collect()
    }

    /// Records not durably uploaded.
    pub fn discrepancies(&self) -> usize {
        self.total() - self.uploaded()
    }

    pub fn is_complete(&self) -> bool {
        self.discrepancies() == 0
    }

    fn count(&self, pred: impl Fn(&RecordStatus) -> bool) -> usize {
        self.records.iter().filter(|(_, s)| pred(s)).count()
    }
}

/// Drives uploads against a [`RetrievalBackend`], tracking state in a [`Manifest`].
pub struct UploadCoordinator<B> {
    backend: B,
    manifest: Manifest,
    policy: RetryPolicy,
    call_delay: Duration,
    collection_name: String,
    staging_dir: PathBuf,
}

impl<B: RetrievalBackend> UploadCoordinator<B> {
    pub fn new(
        backend: B,
        manifest: Manifest,
        config: &UploadConfig,
        staging_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            backend,
            manifest,
            policy: config.retry_policy(),
            call_delay: config.call_delay(),
            collection_name: config.collection_name.clone(),
            staging_dir: staging_dir.into(),
        }
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_call_delay(mut self, delay: Duration) -> Self {
        self.call_delay = delay;
        self
    }

    pub fn manifest(&self) -> &Manifest {
        &self.manifest
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Upload one document unless it is already recorded as uploaded.
    ///
    /// Only integrity errors (the manifest could not be written) are returned
    /// as `Err`; backend failures end up in the outcome and the manifest.
    pub async fn upload_one(&mut self, document: &Document, force: bool) -> Result<UploadOutcome> {
        let key = document.key.as_str();
        let existing = self.manifest.get(key).cloned();
        if let Some(entry) = &existing {
            if entry.is_success() && !force {
                log::debug!("Skipping {key}: already uploaded");
                return Ok(UploadOutcome::Skipped);
            }
        }

        let checksum = document.checksum();
        let mut entry = existing.unwrap_or_else(|| ManifestEntry::pending(&document.name));
        if force || entry.content_hash.as_deref() != Some(checksum.as_str()) {
            // The remote object (if any) holds other content.
            entry.remote_id = None;
        }
        entry.display_name = document.name.clone();
        entry.content_hash = Some(checksum);
        entry.failure = None;

        let mut attempt = 0;
        loop {
            attempt += 1;
            entry.attempts += 1;
            entry.status = UploadStatus::Pending;
            entry.timestamp = Utc::now();
            self.manifest.record(key, entry.clone()).await?;

            let err = match self.attempt(document, &mut entry).await {
                Ok(remote_id) => {
                    entry.status = UploadStatus::Success;
                    entry.remote_id = Some(remote_id.clone());
                    entry.last_error = None;
                    entry.timestamp = Utc::now();
                    self.manifest.record(key, entry).await?;
                    log::info!("Uploaded {} as {remote_id}", document.name);
                    return Ok(UploadOutcome::Uploaded { remote_id });
                }
                Err(err) if err.is_fatal() => return Err(err),
                Err(err) => err,
            };

            entry.status = UploadStatus::Failed;
            entry.last_error = Some(err.to_string());
            entry.timestamp = Utc::now();

            if !self.policy.should_retry(err.kind(), attempt) {
                let failure = if err.is_transient() {
                    FailureClass::TransientExhausted
                } else {
                    // A rejected object will not attach on a later run either.
                    entry.remote_id = None;
                    FailureClass::Permanent
                };
                entry.failure = Some(failure);
                self.manifest.record(key, entry).await?;
                log::error!(
                    "Upload of {} failed after {attempt} attempt(s): {err}",
                    document.name
                );
                return Ok(UploadOutcome::Failed {
                    error: err.to_string(),
                    failure,
                });
            }

            self.manifest.record(key, entry.clone()).await?;
            let wait = self.policy.delay_after(attempt);
            log::warn!(
                "Upload of {} failed (attempt {attempt}/{}), retrying in {wait:?}: {err}",
                document.name,
                self.policy.max_attempts
            );
            sleep(wait).await;
        }
    }

    /// One pass: collection, object, attachment. Persists the object id as
    /// soon as the backend hands it out.
    ///
    /// A cached collection id that the backend no longer knows is dropped and
    /// looked up again once before giving up.
    async fn attempt(&mut self, document: &Document, entry: &mut ManifestEntry) -> Result<String> {
        let collection_id = self.collection_id().await?;
        let object_id = match entry.remote_id.clone() {
            Some(id) => id,
            None => {
                let id = self.backend.upload_object(document).await?;
                entry.remote_id = Some(id.clone());
                self.manifest.record(&document.key, entry.clone()).await?;
                id
            }
        };
        match self.backend.attach_object(&collection_id, &object_id).await {
            Err(AppError::CollectionNotFound(_)) => {
                log::warn!("Collection {collection_id} no longer exists, looking it up again");
                self.manifest.set_collection_id(None).await?;
                let collection_id = self.collection_id().await?;
                self.backend
                    .attach_object(&collection_id, &object_id)
                    .await?;
            }
            result => result?,
        }
        Ok(object_id)
    }

    async fn collection_id(&mut self) -> Result<String> {
        if let Some(id) = self.manifest.collection_id() {
            return Ok(id.to_string());
        }
        let id = self.backend.ensure_collection(&self.collection_name).await?;
        self.manifest.set_collection_id(Some(id.clone())).await?;
        Ok(id)
    }

    /// Upload documents one after another.
    ///
    /// Waits `call_delay` after every document that reached the backend and
    /// discards staged copies of settled documents.
    pub async fn upload_batch(&mut self, documents: &[Document], force: bool) -> Result<UploadReport> {
        let mut report = UploadReport::default();
        let mut called_backend = false;

        for document in documents {
            if called_backend && !self.call_delay.is_zero() {
                sleep(self.call_delay).await;
            }

            let outcome = self.upload_one(document, force).await?;
            called_backend = outcome != UploadOutcome::Skipped;
            match outcome {
                UploadOutcome::Uploaded { .. } => report.uploaded += 1,
                UploadOutcome::Skipped => report.skipped += 1,
                UploadOutcome::Failed { error, .. } => {
                    report.failed += 1;
                    report.failures.push((document.key.clone(), error));
                }
            }
            self.cleanup_ephemeral(document).await?;
        }

        log::info!(
            "Batch done: {} uploaded, {} skipped, {} failed",
            report.uploaded,
            report.skipped,
            report.failed
        );
        Ok(report)
    }

    /// Where a staged copy of `document` lives.
    pub fn staged_path(&self, document: &Document) -> PathBuf {
        self.staging_dir.join(&document.name)
    }

    /// Write `document` to the staging directory.
    pub async fn stage(&self, document: &Document) -> Result<PathBuf> {
        let path = self.staged_path(document);
        crate::storage::write_atomic(&path, document.content.as_bytes()).await?;
        Ok(path)
    }

    /// Delete the staged copy once the document has settled.
    ///
    /// Returns whether a file was removed. Documents still pending keep theirs.
    pub async fn cleanup_ephemeral(&self, document: &Document) -> Result<bool> {
        let settled = self
            .manifest
            .get(&document.key)
            .is_some_and(ManifestEntry::is_settled);
        if !settled {
            return Ok(false);
        }
        remove_if_exists(&self.staged_path(document)).await
    }

    /// Cross-check every record in the log against the manifest. Never writes.
    pub async fn verify_completeness(&self, store: &RecordStore) -> Result<CompletenessReport> {
        reconcile(&self.manifest, store).await
    }

    /// Delete the remote collection and forget all upload state, so the next
    /// run uploads everything again.
    pub async fn reset_collection(&mut self) -> Result<()> {
        if let Some(id) = self.manifest.collection_id().map(str::to_string) {
            let backend = &self.backend;
            let collection = id.as_str();
            self.policy
                .run("delete collection", move || backend.delete_collection(collection))
                .await?;
            log::info!("Deleted collection {id}");
        }
        let forgotten = self.manifest.len();
        self.manifest.clear().await?;
        log::info!("Manifest cleared ({forgotten} entries)");
        Ok(())
    }
}

/// Status of every record in `store` according to `manifest`.
///
/// Read only; usable without a backend.
pub async fn reconcile(manifest: &Manifest, store: &RecordStore) -> Result<CompletenessReport> {
    let mut report = CompletenessReport::default();
    let mut reader = store.stream_read().await?;
    let mut seen = HashSet::new();

    while let Some(stored) = reader.next_record().await? {
        let id = stored.record.id;
        let status = match manifest.get(&id) {
            None => RecordStatus::NeverAttempted,
            Some(entry) => match entry.status {
                UploadStatus::Success => RecordStatus::Uploaded,
                UploadStatus::Pending => RecordStatus::InFlight,
                UploadStatus::Failed => RecordStatus::Failed {
                    failure: entry.failure,
                    error: entry.last_error.clone(),
                },
            },
        };
        seen.insert(id.clone());
        report.records.push((id, status));
    }
    report.malformed_lines = reader.malformed().len();
    report.orphaned = manifest
        .entries()
        .keys()
        .filter(|key| !seen.contains(*key))
        .cloned()
        .collect();

    Ok(report)
}

async fn remove_if_exists(path: &Path) -> Result<bool> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e.into()),
    }
}
