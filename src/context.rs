// src/context.rs

//! Explicit per-run context.
//!
//! A [`RunContext`] owns the configuration, the resolved data paths and the
//! running totals of one invocation. Components are built from it instead of
//! reaching for process-wide state.

use std::path::{Path, PathBuf};
use std::time::Instant;

use crate::error::Result;
use crate::models::{Config, StorageConfig};
use crate::pipeline::RunSummary;
use crate::services::{DocumentFormatter, RetrievalBackend, UploadCoordinator};
use crate::storage::{IndexManager, Manifest, RecordStore};

/// Absolute locations of the persisted state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataPaths {
    pub data_dir: PathBuf,
    pub records: PathBuf,
    pub index: PathBuf,
    pub metadata: PathBuf,
    pub manifest: PathBuf,
    pub staging: PathBuf,
}

impl DataPaths {
    /// Resolve file names against `data_dir` (absolute names are kept).
    pub fn from_config(storage: &StorageConfig) -> Self {
        let dir = &storage.data_dir;
        let resolve = |name: &str| -> PathBuf {
            let path = Path::new(name);
            if path.is_absolute() {
                path.to_path_buf()
            } else {
                dir.join(path)
            }
        };
        Self {
            data_dir: dir.clone(),
            records: resolve(&storage.records_file),
            index: resolve(&storage.index_file),
            metadata: resolve(&storage.metadata_file),
            manifest: resolve(&storage.manifest_file),
            staging: resolve(&storage.staging_dir),
        }
    }
}

/// Configuration, paths and totals of one run.
#[derive(Debug)]
pub struct RunContext {
    config: Config,
    paths: DataPaths,
    started: Instant,
    summary: RunSummary,
}

impl RunContext {
    /// Validate the configuration and prepare the data directory.
    pub async fn init(config: Config) -> Result<Self> {
        config.validate()?;
        let paths = DataPaths::from_config(&config.storage);
        tokio::fs::create_dir_all(&paths.data_dir).await?;
        tokio::fs::create_dir_all(&paths.staging).await?;
        log::debug!("Data directory: {}", paths.data_dir.display());

        Ok(Self {
            config,
            paths,
            started: Instant::now(),
            summary: RunSummary::default(),
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn paths(&self) -> &DataPaths {
        &self.paths
    }

    pub fn summary(&self) -> &RunSummary {
        &self.summary
    }

    pub fn summary_mut(&mut self) -> &mut RunSummary {
        &mut self.summary
    }

    pub fn record_store(&self) -> RecordStore {
        RecordStore::new(&self.paths.records)
    }

    pub fn index_manager(&self) -> IndexManager {
        IndexManager::new(&self.paths.index, &self.paths.metadata)
    }

    pub fn formatter(&self) -> DocumentFormatter {
        DocumentFormatter::new(self.config.formatter.clone())
    }

    pub async fn load_manifest(&self) -> Result<Manifest> {
        Manifest::load(&self.paths.manifest).await
    }

    /// Coordinator over `backend` using this run's manifest and staging area.
    pub async fn upload_coordinator<B: RetrievalBackend>(
        &self,
        backend: B,
    ) -> Result<UploadCoordinator<B>> {
        Ok(UploadCoordinator::new(
            backend,
            self.load_manifest().await?,
            &self.config.upload,
            &self.paths.staging,
        ))
    }

    /// End the run: log the totals and hand them back.
    pub fn finish(self) -> RunSummary {
        let elapsed = self.started.elapsed();
        let s = &self.summary;
        log::info!("Run finished in {:.1}s", elapsed.as_secs_f64());
        log::info!("  fetched:  {}", s.fetched);
        log::info!("  stored:   {}", s.stored);
        log::info!("  indexed:  {}", s.indexed);
        log::info!("  uploaded: {}", s.uploaded);
        log::info!("  skipped:  {}", s.skipped);
        log::info!("  failed:   {}", s.failed);
        self.summary
    }
}
