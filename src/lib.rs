// src/lib.rs

//! Harvester Library
//!
//! Crawl → store → index → format → upload, with the record log as the
//! source of truth and the upload manifest as the record of what is remote.

pub mod context;
pub mod error;
pub mod models;
pub mod pipeline;
pub mod services;
pub mod storage;
pub mod utils;
