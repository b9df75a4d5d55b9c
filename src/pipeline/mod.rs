//! Pipeline entry points.
//!
//! - `run_crawl`: fetch pages, append new records, update the index
//! - `run_reindex`: rebuild the index from the record log
//! - `run_upload`: format stored records and upload them
//! - `run_verify`: reconcile the record log with the manifest
//! - `run_pipeline`: crawl, upload and verify in one go

pub mod crawl;
pub mod index;
#[allow(clippy::module_inception)]
pub mod pipeline;
pub mod upload;
pub mod verify;

pub use crawl::{run_crawl, run_reindex};
pub use pipeline::run_pipeline;
pub use upload::{UploadOptions, run_upload};
pub use verify::run_verify;

/// Totals of one run, logged when the run ends.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    /// Records read from the source
    pub fetched: usize,
    /// Records newly appended to the log
    pub stored: usize,
    /// Records newly added to the index
    pub indexed: usize,
    pub uploaded: usize,
    /// Duplicates on append plus uploads already recorded as done
    pub skipped: usize,
    /// Failed pages, detail pages and uploads
    pub failed: usize,
}
