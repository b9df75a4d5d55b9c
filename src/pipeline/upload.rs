// src/pipeline/upload.rs

//! Upload pipeline: stored records → documents → backend.

use chrono::NaiveDate;

use crate::context::RunContext;
use crate::error::Result;
use crate::models::Document;
use crate::services::{RetrievalBackend, UploadCoordinator, UploadReport};

/// Which records to upload.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UploadOptions {
    /// Upload again even if recorded as uploaded
    pub force: bool,
    /// Only records published on or after this date
    pub since: Option<NaiveDate>,
}

/// Stream the record log and upload it in batches.
///
/// Records already uploaded are counted as skipped without being formatted.
/// Each batch is staged on disk before its uploads start.
pub async fn run_upload<B: RetrievalBackend>(
    ctx: &mut RunContext,
    coordinator: &mut UploadCoordinator<B>,
    options: UploadOptions,
) -> Result<UploadReport> {
    let store = ctx.record_store();
    let formatter = ctx.formatter();
    let batch_size = ctx.config().upload.batch_size.max(1);

    let mut report = UploadReport::default();
    let mut batch: Vec<Document> = Vec::with_capacity(batch_size);
    let mut reader = store.stream_read().await?;

    while let Some(stored) = reader.next_record().await? {
        let record = stored.record;
        if options.since.is_some_and(|since| record.date < since) {
            continue;
        }
        let done = coordinator
            .manifest()
            .get(&record.id)
            .is_some_and(|entry| entry.is_success());
        if done && !options.force {
            report.skipped += 1;
            continue;
        }

        batch.push(formatter.format(&record));
        if batch.len() >= batch_size {
            report.merge(upload_staged(coordinator, &batch, options.force).await?);
            batch.clear();
        }
    }
    if !batch.is_empty() {
        report.merge(upload_staged(coordinator, &batch, options.force).await?);
    }

    let summary = ctx.summary_mut();
    summary.uploaded += report.uploaded;
    summary.skipped += report.skipped;
    summary.failed += report.failed;

    for (key, error) in &report.failures {
        log::warn!("Not uploaded: {key}: {error}");
    }
    Ok(report)
}

async fn upload_staged<B: RetrievalBackend>(
    coordinator: &mut UploadCoordinator<B>,
    batch: &[Document],
    force: bool,
) -> Result<UploadReport> {
    for document in batch {
        coordinator.stage(document).await?;
    }
    log::info!("Uploading batch of {} documents", batch.len());
    coordinator.upload_batch(batch, force).await
}
