// src/models/mod.rs

//! Domain models for the harvester.
//!
//! This module contains all data structures used throughout the application,
//! organized by their primary purpose.

mod config;
mod document;
mod manifest;
mod record;

// Re-export all public types
pub use config::{
    CleaningConfig, Config, CrawlerConfig, FormatterConfig, HttpMethod, LoggingConfig,
    MetadataPattern, Replacement, SourceConfig, StorageConfig, UploadConfig,
};
pub use document::Document;
pub use manifest::{FailureClass, ManifestEntry, UploadStatus};
pub use record::{Attachment, IdAllocator, RawRecord, Record, RecordBody, StoredRecord};
