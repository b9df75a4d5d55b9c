// src/pipeline/verify.rs

//! Completeness verification.

use crate::context::RunContext;
use crate::error::Result;
use crate::services::{CompletenessReport, RecordStatus, reconcile};
use crate::storage::Manifest;

/// Reconcile the record log with `manifest` and log what is missing.
///
/// Read only: nothing is retried or rewritten here.
pub async fn run_verify(ctx: &RunContext, manifest: &Manifest) -> Result<CompletenessReport> {
    let report = reconcile(manifest, &ctx.record_store()).await?;

    log::info!(
        "Verification: {} records, {} uploaded, {} failed, {} pending",
        report.total(),
        report.uploaded(),
        report.failed(),
        report.pending()
    );
    for (id, status) in &report.records {
        match status {
            RecordStatus::Uploaded => {}
            RecordStatus::Failed { failure, error } => log::warn!(
                "  failed: {id} ({}): {}",
                failure.map_or("unclassified", |f| f.describe()),
                error.as_deref().unwrap_or("no error recorded")
            ),
            RecordStatus::InFlight => log::warn!("  interrupted: {id}"),
            RecordStatus::NeverAttempted => log::debug!("  not attempted: {id}"),
        }
    }

    let triage = report.needs_triage();
    if !triage.is_empty() {
        log::warn!(
            "{} documents failed with retryable errors until the budget ran out and need manual triage",
            triage.len()
        );
    }
    if !report.orphaned.is_empty() {
        log::warn!(
            "{} manifest entries have no record in the log",
            report.orphaned.len()
        );
    }
    if report.malformed_lines > 0 {
        log::warn!("{} malformed log lines were skipped", report.malformed_lines);
    }
    if report.is_complete() {
        log::info!("No discrepancies between the record log and the manifest");
    }
    Ok(report)
}
