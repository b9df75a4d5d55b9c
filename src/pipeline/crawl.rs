// src/pipeline/crawl.rs

//! Crawl and reindex pipelines.

use crate::context::RunContext;
use crate::error::Result;
use crate::models::IdAllocator;
use crate::services::{FetchStats, Fetcher, PageOutcome, PageRange, PageSource, PageTransport};
use crate::storage::WriteMode;

use super::index::MetadataSummary;

/// Fetch `range`, append new records page by page and keep the index current.
///
/// Page failures are counted and skipped; only storage errors abort.
pub async fn run_crawl<S, T>(
    ctx: &mut RunContext,
    fetcher: &Fetcher<S, T>,
    range: PageRange,
) -> Result<FetchStats>
where
    S: PageSource,
    T: PageTransport,
{
    let store = ctx.record_store();
    let index = ctx.index_manager();
    let prefix = fetcher.source().id_prefix().to_string();
    let mut ids = IdAllocator::new();

    if index.reconcile_with(&store).await? {
        ctx.summary_mut().indexed += index.load_metadata().await?.total_count;
    }

    match range.end {
        Some(end) => log::info!("Crawling pages {}..={end}", range.start),
        None => log::info!("Crawling from page {} until the source is empty", range.start),
    }

    let mut cursor = fetcher.pages(range);
    while let Some(outcome) = cursor.next_page().await {
        match outcome {
            PageOutcome::Page {
                records,
                detail_failures,
                ..
            } => {
                let summary = ctx.summary_mut();
                summary.fetched += records.len();
                summary.failed += detail_failures;
                if records.is_empty() {
                    continue;
                }

                let records: Vec<_> = records
                    .into_iter()
                    .map(|raw| {
                        let id = ids.next_id(&prefix, raw.date);
                        raw.into_record(id)
                    })
                    .collect();

                let written = store.write(&records, WriteMode::Append).await?;
                // Includes records a previous run appended but never indexed.
                let indexed = index.update_index(&written.stored()).await?;

                let summary = ctx.summary_mut();
                summary.stored += written.written.len();
                summary.skipped += written.skipped;
                summary.indexed += indexed;
            }
            PageOutcome::Failed { page, error } => {
                log::warn!("Gap in crawl: page {page} ({error})");
                ctx.summary_mut().failed += 1;
            }
        }
    }

    let stats = cursor.stats().clone();
    log::info!(
        "Crawl done: {} pages ok, {} failed, {} requests ({} retries)",
        stats.pages_ok,
        stats.pages_failed,
        stats.requests,
        stats.retries
    );
    Ok(stats)
}

/// Rebuild the index and summary from the whole record log.
pub async fn run_reindex(ctx: &mut RunContext) -> Result<MetadataSummary> {
    let summary = ctx
        .index_manager()
        .rebuild_from_store(&ctx.record_store())
        .await?;
    ctx.summary_mut().indexed = summary.total_count;

    if let Some((first, last)) = summary.date_range {
        log::info!("Records span {first} to {last}");
    }
    Ok(summary)
}
