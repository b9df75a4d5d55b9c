//! Harvester CLI
//!
//! Local execution entry point.

use std::path::PathBuf;

use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use harvester::{
    context::RunContext,
    error::Result,
    models::Config,
    pipeline::{self, RunSummary, UploadOptions},
    services::{Fetcher, HttpBackend, PageRange, SelectorSource},
    utils::http::HttpTransport,
};

/// Harvester - paginated record crawler and retrieval uploader
#[derive(Parser, Debug)]
#[command(
    name = "harvester",
    version,
    about = "Harvests paginated records and keeps a retrieval backend in sync"
)]
struct Cli {
    /// Path to the configuration file
    #[arg(short, long, default_value = "config.toml")]
    config: PathBuf,

    /// Override storage.data_dir from the configuration
    #[arg(short, long)]
    data_dir: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Fetch list pages and append new records
    Crawl {
        /// First page (1-based)
        #[arg(long, default_value_t = 1)]
        start: u32,
        /// Last page; crawl until an empty page when omitted
        #[arg(long)]
        end: Option<u32>,
    },

    /// Rebuild the index from the record log
    Reindex,

    /// Upload records that are not yet in the backend
    Upload {
        /// Upload again even if already recorded as uploaded
        #[arg(long)]
        force: bool,
        /// Only records published on or after this date (YYYY-MM-DD)
        #[arg(long)]
        since: Option<NaiveDate>,
    },

    /// Compare the record log with the upload manifest
    Verify,

    /// Run full pipeline: Crawl → Upload → Verify
    Pipeline {
        #[arg(long, default_value_t = 1)]
        start: u32,
        #[arg(long)]
        end: Option<u32>,
        #[arg(long)]
        force: bool,
    },

    /// Delete the remote collection and clear the manifest
    ResetCollection,

    /// Validate the configuration file
    Validate,

    /// Show record log and manifest info
    Info,
}

/// Initialize logging based on verbosity flag.
fn init_logging(verbose: bool, configured: &str) {
    let level = if verbose { "debug" } else { configured };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format_timestamp_secs()
        .init();
}

fn load_config(cli: &Cli) -> Result<Config> {
    let mut config = if cli.config.exists() {
        Config::load(&cli.config)?
    } else {
        Config::default()
    };
    if let Some(dir) = &cli.data_dir {
        config.storage.data_dir = dir.clone();
    }
    Ok(config)
}

fn crawler(config: &Config) -> Result<Fetcher<SelectorSource, HttpTransport>> {
    let source = SelectorSource::new(config.source.clone(), config.cleaning.clone())?;
    let transport = HttpTransport::from_config(&config.crawler)?;
    Ok(Fetcher::new(source, transport, &config.crawler))
}

/// Main entry point for the CLI application.
#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(&cli)?;
    init_logging(cli.verbose, &config.logging.level);

    if !cli.config.exists() {
        log::warn!(
            "Config file {} not found, using defaults",
            cli.config.display()
        );
    }

    if let Command::Validate = cli.command {
        log::info!("Validating configuration...");
        config.validate()?;
        config.source.validate()?;
        SelectorSource::new(config.source.clone(), config.cleaning.clone())?;
        log::info!("✓ Config OK");
        return Ok(());
    }

    let ctx = RunContext::init(config).await?;
    let (_, result) = execute(ctx, cli.command).await;
    result?;
    log::info!("Done!");

    Ok(())
}

/// Run `command` and close the run, whether or not the command succeeded.
async fn execute(mut ctx: RunContext, command: Command) -> (RunSummary, Result<()>) {
    let result = run_command(&mut ctx, command).await;
    if let Err(e) = &result {
        log::error!("Run aborted: {e}");
    }
    (ctx.finish(), result)
}

async fn run_command(ctx: &mut RunContext, command: Command) -> Result<()> {
    match command {
        Command::Crawl { start, end } => {
            let fetcher = crawler(ctx.config())?;
            pipeline::run_crawl(ctx, &fetcher, PageRange::new(start, end)).await?;
        }

        Command::Reindex => {
            pipeline::run_reindex(ctx).await?;
        }

        Command::Upload { force, since } => {
            let backend = HttpBackend::from_config(&ctx.config().upload)?;
            let mut coordinator = ctx.upload_coordinator(backend).await?;
            pipeline::run_upload(ctx, &mut coordinator, UploadOptions { force, since })
                .await?;
        }

        Command::Verify => {
            let manifest = ctx.load_manifest().await?;
            let report = pipeline::run_verify(ctx, &manifest).await?;
            if !report.is_complete() {
                log::warn!("{} records are not uploaded", report.discrepancies());
            }
        }

        Command::Pipeline { start, end, force } => {
            let fetcher = crawler(ctx.config())?;
            let backend = HttpBackend::from_config(&ctx.config().upload)?;
            let mut coordinator = ctx.upload_coordinator(backend).await?;
            pipeline::run_pipeline(
                ctx,
                &fetcher,
                &mut coordinator,
                PageRange::new(start, end),
                UploadOptions { force, since: None },
            )
            .await?;
        }

        Command::ResetCollection => {
            let backend = HttpBackend::from_config(&ctx.config().upload)?;
            let mut coordinator = ctx.upload_coordinator(backend).await?;
            coordinator.reset_collection().await?;
        }

        // Returned above, before the data directory is touched.
        Command::Validate => {}

        Command::Info => {
            let paths = ctx.paths();
            log::info!("Data directory: {}", paths.data_dir.display());

            let metadata = ctx.index_manager().load_metadata().await?;
            log::info!("Indexed records: {}", metadata.total_count);
            if let Some((first, last)) = metadata.date_range {
                log::info!("Date range: {first} to {last}");
            }
            if let Some(marker) = &metadata.last_crawl_marker {
                log::info!("Last crawled: {} ({})", marker.id, marker.date);
            }
            if let Some(updated) = metadata.updated_at {
                log::info!("Index updated at: {updated}");
            }

            let manifest = ctx.load_manifest().await?;
            let uploaded = manifest.entries().values().filter(|e| e.is_success()).count();
            log::info!("Manifest: {} entries, {} uploaded", manifest.len(), uploaded);
            match manifest.collection_id() {
                Some(id) => log::info!("Collection: {id}"),
                None => log::info!("No collection yet."),
            }
        }
    }

    Ok(())
}
