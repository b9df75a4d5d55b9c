// src/services/source.rs

//! Contract between the fetcher and a concrete record source.
//!
//! A source knows how to address a list page and how to turn list and detail
//! markup into records. It does no I/O: the fetcher owns requests, retries and
//! pacing, and hands the source nothing but page bodies.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::NaiveDate;

use crate::error::Result;
use crate::models::{HttpMethod, RawRecord, RecordBody};

/// One request against the remote page source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageRequest {
    pub url: String,
    pub method: HttpMethod,
    /// Form fields for POST requests
    pub form: Vec<(String, String)>,
}

impl PageRequest {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            method: HttpMethod::Get,
            form: Vec::new(),
        }
    }

    pub fn post(url: impl Into<String>, form: Vec<(String, String)>) -> Self {
        Self {
            url: url.into(),
            method: HttpMethod::Post,
            form,
        }
    }
}

/// A row from a list page, before its detail page is consulted.
#[derive(Debug, Clone, PartialEq)]
pub struct ListItem {
    pub title: String,
    pub date: NaiveDate,
    pub source: String,
    pub detail_url: Option<String>,
    /// Metadata already visible on the list page
    pub metadata: BTreeMap<String, serde_json::Value>,
}

impl ListItem {
    /// Record built from list data alone, for rows without a detail page.
    pub fn into_raw(self) -> RawRecord {
        RawRecord {
            date: self.date,
            source: self.source,
            title: self.title,
            body: RecordBody::default(),
            attachments: Vec::new(),
            metadata: self.metadata,
            detail_url: self.detail_url,
        }
    }
}

/// A paginated source of records.
pub trait PageSource: Send + Sync {
    /// Prefix of the identifiers given to this source's records.
    fn id_prefix(&self) -> &str;

    /// Request for list page `page` (1-based).
    fn list_request(&self, page: u32) -> Result<PageRequest>;

    /// Rows of a list page. An empty result marks the end of the source.
    fn parse_list_page(&self, request: &PageRequest, body: &str) -> Result<Vec<ListItem>>;

    /// Complete a list row with its detail page.
    fn parse_detail_page(&self, item: ListItem, body: &str) -> Result<RawRecord>;
}

/// Performs page requests. Errors carry their retry classification.
#[async_trait]
pub trait PageTransport: Send + Sync {
    async fn fetch(&self, request: &PageRequest) -> Result<String>;
}
