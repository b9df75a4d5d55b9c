// src/pipeline/pipeline.rs

use crate::context::RunContext;
use crate::error::Result;
use crate::services::{
    CompletenessReport, Fetcher, PageRange, PageSource, PageTransport, RetrievalBackend,
    UploadCoordinator,
};

use super::crawl::run_crawl;
use super::upload::{UploadOptions, run_upload};
use super::verify::run_verify;

/// Run the full pipeline: crawl, upload, verify.
pub async fn run_pipeline<S, T, B>(
    ctx: &mut RunContext,
    fetcher: &Fetcher<S, T>,
    coordinator: &mut UploadCoordinator<B>,
    range: PageRange,
    options: UploadOptions,
) -> Result<CompletenessReport>
where
    S: PageSource,
    T: PageTransport,
    B: RetrievalBackend,
{
    log::info!("Step 1/3: Crawl");
    run_crawl(ctx, fetcher, range).await?;

    log::info!("Step 2/3: Upload");
    run_upload(ctx, coordinator, options).await?;

    log::info!("Step 3/3: Verify");
    run_verify(ctx, coordinator.manifest()).await
}
