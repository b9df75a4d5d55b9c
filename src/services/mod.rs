//! Service layer for the harvester.
//!
//! This module contains the business logic for:
//! - Page fetching with retry and pacing (`Fetcher`)
//! - Selector-driven HTML parsing (`SelectorSource`)
//! - Record rendering (`DocumentFormatter`)
//! - Idempotent uploads (`UploadCoordinator`) against a `RetrievalBackend`

mod backend;
mod fetcher;
mod formatter;
mod selectors;
mod source;
mod uploader;

pub use backend::{HttpBackend, RetrievalBackend};
pub use fetcher::{FetchStats, Fetcher, PageCursor, PageOutcome, PageRange};
pub use formatter::DocumentFormatter;
pub use selectors::SelectorSource;
pub use source::{ListItem, PageRequest, PageSource, PageTransport};
pub use uploader::{
    CompletenessReport, RecordStatus, UploadCoordinator, UploadOutcome, UploadReport, reconcile,
};
