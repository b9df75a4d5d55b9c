// src/services/fetcher.rs

//! Paginated fetching with bounded retry and pacing.
//!
//! [`Fetcher::pages`] returns a [`PageCursor`] that requests one list page
//! (and its detail pages) per [`PageCursor::next_page`] call. A page whose
//! requests keep failing yields [`PageOutcome::Failed`] and the cursor moves
//! on; the gap is reported, not fatal.

use std::time::Duration;

use tokio::time::{Instant, sleep};

use crate::error::{AppError, Result};
use crate::models::{CrawlerConfig, RawRecord};
use crate::utils::RetryPolicy;

use super::source::{ListItem, PageRequest, PageSource, PageTransport};

/// Pages to visit. Without an end the crawl runs until the source is empty.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRange {
    pub start: u32,
    pub end: Option<u32>,
}

impl PageRange {
    pub fn new(start: u32, end: Option<u32>) -> Self {
        Self {
            start: start.max(1),
            end,
        }
    }

    fn contains(&self, page: u32) -> bool {
        self.end.is_none_or(|end| page <= end)
    }
}

/// Result of visiting one list page.
#[derive(Debug)]
pub enum PageOutcome {
    /// The list page was read; rows whose detail page failed are counted, not returned
    Page {
        page: u32,
        records: Vec<RawRecord>,
        detail_failures: usize,
    },
    /// The list page could not be fetched or parsed
    Failed { page: u32, error: AppError },
}

/// Request and retry counters of one cursor.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FetchStats {
    pub pages_ok: usize,
    pub pages_failed: usize,
    /// Every request sent, retries included
    pub requests: usize,
    pub failed_requests: usize,
    pub retries: usize,
    pub details_failed: usize,
    pub records: usize,
}

/// Fetches pages from a [`PageSource`] through a [`PageTransport`].
pub struct Fetcher<S, T> {
    source: S,
    transport: T,
    policy: RetryPolicy,
    request_delay: Duration,
    max_consecutive_failures: u32,
}

impl<S: PageSource, T: PageTransport> Fetcher<S, T> {
    pub fn new(source: S, transport: T, config: &CrawlerConfig) -> Self {
        Self {
            source,
            transport,
            policy: config.retry_policy(),
            request_delay: config.request_delay(),
            max_consecutive_failures: config.max_consecutive_page_failures.max(1),
        }
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_request_delay(mut self, delay: Duration) -> Self {
        self.request_delay = delay;
        self
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    /// Start a fresh pass over `range`.
    pub fn pages(&self, range: PageRange) -> PageCursor<'_, S, T> {
        PageCursor {
            fetcher: self,
            range,
            next: range.start,
            done: false,
            consecutive_failures: 0,
            last_request: None,
            stats: FetchStats::default(),
        }
    }
}

/// Lazy walk over a page range. Each call to `pages` starts a new one.
pub struct PageCursor<'a, S, T> {
    fetcher: &'a Fetcher<S, T>,
    range: PageRange,
    next: u32,
    done: bool,
    consecutive_failures: u32,
    last_request: Option<Instant>,
    stats: FetchStats,
}

impl<S: PageSource, T: PageTransport> PageCursor<'_, S, T> {
    pub fn stats(&self) -> &FetchStats {
        &self.stats
    }

    /// Fetch the next page, or `None` once the range or the source is exhausted.
    pub async fn next_page(&mut self) -> Option<PageOutcome> {
        if self.done || !self.range.contains(self.next) {
            return None;
        }
        let page = self.next;
        match self.next.checked_add(1) {
            Some(next) => self.next = next,
            // u32::MAX is the last addressable page.
            None => self.done = true,
        }

        match self.fetch_list(page).await {
            Ok(items) if items.is_empty() => {
                log::info!("Page {page} has no rows, stopping");
                self.done = true;
                self.stats.pages_ok += 1;
                Some(PageOutcome::Page {
                    page,
                    records: Vec::new(),
                    detail_failures: 0,
                })
            }
            Ok(items) => {
                self.consecutive_failures = 0;
                self.stats.pages_ok += 1;
                let (records, detail_failures) = self.fetch_details(items).await;
                self.stats.records += records.len();
                self.stats.details_failed += detail_failures;
                log::info!(
                    "Page {page}: {} records ({} detail failures)",
                    records.len(),
                    detail_failures
                );
                Some(PageOutcome::Page {
                    page,
                    records,
                    detail_failures,
                })
            }
            Err(error) => {
                self.stats.pages_failed += 1;
                self.consecutive_failures += 1;
                log::error!("Page {page} failed: {error}");
                if self.range.end.is_none()
                    && self.consecutive_failures >= self.fetcher.max_consecutive_failures
                {
                    log::warn!(
                        "{} pages failed in a row, stopping open-ended crawl",
                        self.consecutive_failures
                    );
                    self.done = true;
                }
                Some(PageOutcome::Failed { page, error })
            }
        }
    }

    async fn fetch_list(&mut self, page: u32) -> Result<Vec<ListItem>> {
        let fetcher = self.fetcher;
        let source = &fetcher.source;
        let request = source.list_request(page)?;
        log::debug!("Fetching list page {page}: {}", request.url);
        let body = self.fetch_with_retry(&request).await?;
        source.parse_list_page(&request, &body)
    }

    async fn fetch_details(
        &mut self,
        items: Vec<ListItem>,
    ) -> (Vec<RawRecord>, usize) {
        let fetcher = self.fetcher;
        let mut records = Vec::with_capacity(items.len());
        let mut failures = 0;

        for item in items {
            let Some(url) = item.detail_url.clone() else {
                records.push(item.into_raw());
                continue;
            };

            let result = match self.fetch_with_retry(&PageRequest::get(&url)).await {
                Ok(body) => fetcher.source.parse_detail_page(item, &body),
                Err(e) => Err(e),
            };
            match result {
                Ok(record) => records.push(record),
                Err(e) => {
                    failures += 1;
                    log::warn!("Detail page {url} skipped: {e}");
                }
            }
        }
        (records, failures)
    }

    /// Send a request, retrying transient failures with backoff.
    async fn fetch_with_retry(&mut self, request: &PageRequest) -> Result<String> {
        let policy = self.fetcher.policy;
        let mut attempt = 0;
        loop {
            attempt += 1;
            self.throttle().await;
            self.stats.requests += 1;

            let err = match self.fetcher.transport.fetch(request).await {
                Ok(body) => return Ok(body),
                Err(err) => err,
            };
            self.stats.failed_requests += 1;

            if !policy.should_retry(err.kind(), attempt) {
                return Err(if err.is_transient() {
                    policy.exhausted(&request.url, &err)
                } else {
                    err
                });
            }

            let wait = policy.delay_after(attempt);
            log::warn!(
                "Request to {} failed (attempt {}/{}), retrying in {:?}: {}",
                request.url,
                attempt,
                policy.max_attempts,
                wait,
                err
            );
            self.stats.retries += 1;
            sleep(wait).await;
        }
    }

    /// Keep at least `request_delay` between the starts of two requests.
    async fn throttle(&mut self) {
        let delay = self.fetcher.request_delay;
        if let Some(last) = self.last_request {
            let elapsed = last.elapsed();
            if elapsed < delay {
                sleep(delay - elapsed).await;
            }
        }
        self.last_request = Some(Instant::now());
    }
}
