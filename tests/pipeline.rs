//! End-to-end runs over an in-memory source and backend.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use harvester::context::RunContext;
use harvester::error::{AppError, Result};
use harvester::models::{Config, Document, FailureClass, RawRecord};
use harvester::pipeline::{self, UploadOptions};
use harvester::services::{
    Fetcher, ListItem, PageRange, PageRequest, PageSource, PageTransport, RecordStatus,
    RetrievalBackend, UploadCoordinator,
};
use harvester::utils::RetryPolicy;
use tempfile::TempDir;

/// List pages are lines of `date|source|title`.
struct LineSource;

impl PageSource for LineSource {
    fn id_prefix(&self) -> &str {
        "it"
    }

    fn list_request(&self, page: u32) -> Result<PageRequest> {
        Ok(PageRequest::get(format!("http://source/list?page={page}")))
    }

    fn parse_list_page(&self, _request: &PageRequest, body: &str) -> Result<Vec<ListItem>> {
        body.lines()
            .filter(|line| !line.trim().is_empty())
            .map(|line| {
                let mut parts = line.splitn(3, '|');
                let (Some(date), Some(source), Some(title)) =
                    (parts.next(), parts.next(), parts.next())
                else {
                    return Err(AppError::parse("list row", line));
                };
                let date = NaiveDate::parse_from_str(date, "%Y-%m-%d")
                    .map_err(|e| AppError::parse("list date", e))?;
                Ok(ListItem {
                    title: title.to_string(),
                    date,
                    source: source.to_string(),
                    detail_url: None,
                    metadata: BTreeMap::new(),
                })
            })
            .collect()
    }

    fn parse_detail_page(&self, item: ListItem, _body: &str) -> Result<RawRecord> {
        Ok(item.into_raw())
    }
}

/// Serves scripted bodies per page URL; unscripted pages are empty.
#[derive(Default)]
struct ScriptedSite {
    pages: Mutex<HashMap<String, VecDeque<Result<String>>>>,
}

impl ScriptedSite {
    fn page(self, page: u32, responses: Vec<Result<String>>) -> Self {
        self.pages.lock().unwrap().insert(
            format!("http://source/list?page={page}"),
            responses.into_iter().collect(),
        );
        self
    }
}

#[async_trait]
impl PageTransport for ScriptedSite {
    async fn fetch(&self, request: &PageRequest) -> Result<String> {
        let mut pages = self.pages.lock().unwrap();
        match pages.get_mut(&request.url) {
            Some(queue) if queue.len() > 1 => queue.pop_front().unwrap(),
            // The last scripted response keeps being served.
            Some(queue) => match queue.front() {
                Some(Ok(body)) => Ok(body.clone()),
                Some(Err(_)) => Err(AppError::Unavailable("503".to_string())),
                None => Ok(String::new()),
            },
            None => Ok(String::new()),
        }
    }
}

/// Remote calls seen by [`MemoryBackend`], shared so they survive the coordinator.
#[derive(Default)]
struct Calls {
    uploads: usize,
    attaches: usize,
    collections: usize,
    /// Remaining transient upload failures per document name
    failing: HashMap<String, usize>,
}

#[derive(Clone, Default)]
struct MemoryBackend {
    calls: Arc<Mutex<Calls>>,
}

impl MemoryBackend {
    fn fail_uploads(&self, name_prefix: &str, times: usize) {
        self.calls
            .lock()
            .unwrap()
            .failing
            .insert(name_prefix.to_string(), times);
    }

    fn remote_calls(&self) -> usize {
        let calls = self.calls.lock().unwrap();
        calls.uploads + calls.attaches + calls.collections
    }

    fn uploads(&self) -> usize {
        self.calls.lock().unwrap().uploads
    }
}

#[async_trait]
impl RetrievalBackend for MemoryBackend {
    async fn ensure_collection(&self, name: &str) -> Result<String> {
        self.calls.lock().unwrap().collections += 1;
        Ok(format!("collections/{name}"))
    }

    async fn upload_object(&self, document: &Document) -> Result<String> {
        let mut calls = self.calls.lock().unwrap();
        calls.uploads += 1;
        let failing = calls
            .failing
            .iter_mut()
            .find(|(prefix, left)| document.name.starts_with(prefix.as_str()) && **left > 0);
        if let Some((_, left)) = failing {
            *left -= 1;
            return Err(AppError::Unavailable("503 unable to process".to_string()));
        }
        Ok(format!("objects/{}", document.key))
    }

    async fn attach_object(&self, _collection_id: &str, _object_id: &str) -> Result<()> {
        self.calls.lock().unwrap().attaches += 1;
        Ok(())
    }

    async fn delete_collection(&self, _collection_id: &str) -> Result<()> {
        Ok(())
    }
}

const FIVE_RECORDS: &str = "\
2025-03-01|bank|Capital adequacy notice
2025-03-01|insurance|Solvency reporting update
2025-03-02|bank|Branch closure approval
2025-03-03|securities|Margin rule amendment
2025-03-03|bank|Deposit insurance premium";

async fn context(tmp: &TempDir) -> RunContext {
    let mut config = Config::default();
    config.storage.data_dir = tmp.path().join("data");
    config.upload.batch_size = 2;
    RunContext::init(config).await.unwrap()
}

fn fetcher(site: ScriptedSite) -> Fetcher<LineSource, ScriptedSite> {
    Fetcher::new(LineSource, site, &Config::default().crawler)
        .with_policy(RetryPolicy::new(
            3,
            Duration::from_millis(200),
            Duration::from_secs(2),
        ))
        .with_request_delay(Duration::from_millis(100))
}

async fn coordinator(ctx: &RunContext, backend: MemoryBackend) -> UploadCoordinator<MemoryBackend> {
    ctx.upload_coordinator(backend)
        .await
        .unwrap()
        .with_policy(RetryPolicy::new(
            3,
            Duration::from_millis(50),
            Duration::from_millis(500),
        ))
        .with_call_delay(Duration::from_millis(10))
}

fn transient() -> Result<String> {
    Err(AppError::Unavailable("503".to_string()))
}

#[tokio::test(start_paused = true)]
async fn test_page_retried_within_budget_is_stored_once() {
    let tmp = TempDir::new().unwrap();
    let mut ctx = context(&tmp).await;

    let site = ScriptedSite::default().page(
        1,
        vec![transient(), transient(), Ok(FIVE_RECORDS.to_string())],
    );
    let fetcher = fetcher(site);
    let stats = pipeline::run_crawl(&mut ctx, &fetcher, PageRange::new(1, None))
        .await
        .unwrap();

    assert_eq!(stats.pages_ok, 2); // page 2 is empty and ends the crawl
    assert_eq!(stats.pages_failed, 0);
    assert_eq!(stats.retries, 2);
    assert_eq!(ctx.record_store().count().await.unwrap(), 5);
    assert_eq!(ctx.summary().stored, 5);
    assert_eq!(ctx.summary().indexed, 5);

    // Crawling the same pages again appends nothing.
    let again = self::fetcher(ScriptedSite::default().page(1, vec![Ok(FIVE_RECORDS.to_string())]));
    pipeline::run_crawl(&mut ctx, &again, PageRange::new(1, Some(1)))
        .await
        .unwrap();
    assert_eq!(ctx.record_store().count().await.unwrap(), 5);
    assert_eq!(ctx.summary().stored, 5);
    assert_eq!(ctx.summary().skipped, 5);
}

#[tokio::test(start_paused = true)]
async fn test_page_failing_past_budget_leaves_gap() {
    let tmp = TempDir::new().unwrap();
    let mut ctx = context(&tmp).await;

    let site = ScriptedSite::default()
        .page(1, vec![Ok("2025-03-01|bank|First page".to_string())])
        .page(2, vec![transient()])
        .page(3, vec![Ok("2025-03-05|bank|Third page".to_string())]);
    let fetcher = fetcher(site);
    let stats = pipeline::run_crawl(&mut ctx, &fetcher, PageRange::new(1, Some(3)))
        .await
        .unwrap();

    assert_eq!(stats.pages_ok, 2);
    assert_eq!(stats.pages_failed, 1);
    assert_eq!(ctx.summary().failed, 1);
    assert_eq!(ctx.record_store().count().await.unwrap(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_crawl_indexes_records_left_unindexed_by_an_earlier_run() {
    let tmp = TempDir::new().unwrap();
    let mut ctx = context(&tmp).await;

    // An earlier run appended two records and stopped before indexing them.
    let earlier: Vec<_> = ["Capital adequacy notice", "Solvency reporting update"]
        .iter()
        .zip(["it_20250301_0001", "it_20250301_0002"])
        .map(|(title, id)| {
            ListItem {
                title: title.to_string(),
                date: NaiveDate::from_ymd_opt(2025, 3, 1).unwrap(),
                source: "bank".to_string(),
                detail_url: None,
                metadata: BTreeMap::new(),
            }
            .into_raw()
            .into_record(id.to_string())
        })
        .collect();
    ctx.record_store()
        .write(&earlier, harvester::storage::WriteMode::Append)
        .await
        .unwrap();
    assert_eq!(ctx.index_manager().load_metadata().await.unwrap().total_count, 0);

    let fetcher = fetcher(ScriptedSite::default().page(1, vec![Ok(FIVE_RECORDS.to_string())]));
    pipeline::run_crawl(&mut ctx, &fetcher, PageRange::new(1, Some(1)))
        .await
        .unwrap();

    let manager = ctx.index_manager();
    let index = manager.load_index().await.unwrap();
    assert_eq!(ctx.record_store().count().await.unwrap(), 5);
    assert_eq!(manager.load_metadata().await.unwrap().total_count, 5);
    assert_eq!(index.locate("it_20250301_0001").unwrap().line, 1);
    assert_eq!(ctx.summary().indexed, 5);
}

#[tokio::test(start_paused = true)]
async fn test_reindex_matches_incremental_index() {
    let tmp = TempDir::new().unwrap();
    let mut ctx = context(&tmp).await;

    // Two separate crawls so the index is built in two increments.
    let first = fetcher(ScriptedSite::default().page(
        1,
        vec![Ok(FIVE_RECORDS.lines().take(2).collect::<Vec<_>>().join("\n"))],
    ));
    pipeline::run_crawl(&mut ctx, &first, PageRange::new(1, Some(1)))
        .await
        .unwrap();
    let second = fetcher(ScriptedSite::default().page(
        2,
        vec![Ok(FIVE_RECORDS.lines().skip(2).collect::<Vec<_>>().join("\n"))],
    ));
    pipeline::run_crawl(&mut ctx, &second, PageRange::new(2, Some(2)))
        .await
        .unwrap();

    let manager = ctx.index_manager();
    let incremental_index = manager.load_index().await.unwrap();
    let incremental = manager.load_metadata().await.unwrap();
    assert_eq!(incremental.total_count, 5);

    let rebuilt = pipeline::run_reindex(&mut ctx).await.unwrap();
    assert_eq!(manager.load_index().await.unwrap(), incremental_index);
    assert_eq!(rebuilt.total_count, incremental.total_count);
    assert_eq!(rebuilt.date_range, incremental.date_range);
    assert_eq!(rebuilt.last_crawl_marker, incremental.last_crawl_marker);
    assert_eq!(
        rebuilt.date_range,
        Some((
            NaiveDate::from_ymd_opt(2025, 3, 1).unwrap(),
            NaiveDate::from_ymd_opt(2025, 3, 3).unwrap()
        ))
    );
    assert_eq!(incremental_index.by_source["bank"].count, 3);
}

#[tokio::test(start_paused = true)]
async fn test_second_upload_run_skips_everything() {
    let tmp = TempDir::new().unwrap();
    let mut ctx = context(&tmp).await;
    let fetcher = fetcher(ScriptedSite::default().page(1, vec![Ok(FIVE_RECORDS.to_string())]));
    pipeline::run_crawl(&mut ctx, &fetcher, PageRange::new(1, Some(1)))
        .await
        .unwrap();

    let backend = MemoryBackend::default();
    let mut first = coordinator(&ctx, backend.clone()).await;
    let report = pipeline::run_upload(&mut ctx, &mut first, UploadOptions::default())
        .await
        .unwrap();
    assert_eq!((report.uploaded, report.skipped, report.failed), (5, 0, 0));
    assert_eq!(backend.uploads(), 5);
    drop(first);

    let calls_before = backend.remote_calls();
    let mut second = coordinator(&ctx, backend.clone()).await;
    let report = pipeline::run_upload(&mut ctx, &mut second, UploadOptions::default())
        .await
        .unwrap();
    assert_eq!((report.uploaded, report.skipped, report.failed), (0, 5, 0));
    assert_eq!(backend.remote_calls(), calls_before);

    // Nothing staged is left behind once every upload has settled.
    let mut staged = tokio::fs::read_dir(&ctx.paths().staging).await.unwrap();
    assert!(staged.next_entry().await.unwrap().is_none());
}

#[tokio::test(start_paused = true)]
async fn test_forced_upload_sends_again() {
    let tmp = TempDir::new().unwrap();
    let mut ctx = context(&tmp).await;
    let fetcher = fetcher(ScriptedSite::default().page(1, vec![Ok(FIVE_RECORDS.to_string())]));
    pipeline::run_crawl(&mut ctx, &fetcher, PageRange::new(1, Some(1)))
        .await
        .unwrap();

    let backend = MemoryBackend::default();
    let mut up = coordinator(&ctx, backend.clone()).await;
    pipeline::run_upload(&mut ctx, &mut up, UploadOptions::default())
        .await
        .unwrap();
    let options = UploadOptions {
        force: true,
        since: NaiveDate::from_ymd_opt(2025, 3, 3),
    };
    let report = pipeline::run_upload(&mut ctx, &mut up, options).await.unwrap();
    assert_eq!(report.uploaded, 2);
    assert_eq!(backend.uploads(), 7);
}

#[tokio::test(start_paused = true)]
async fn test_transient_upload_failures_then_success() {
    let tmp = TempDir::new().unwrap();
    let mut ctx = context(&tmp).await;
    let fetcher = fetcher(ScriptedSite::default().page(1, vec![Ok(FIVE_RECORDS.to_string())]));
    pipeline::run_crawl(&mut ctx, &fetcher, PageRange::new(1, Some(1)))
        .await
        .unwrap();

    let backend = MemoryBackend::default();
    backend.fail_uploads("it_20250302", 2);
    let mut up = coordinator(&ctx, backend.clone()).await;
    let report = pipeline::run_upload(&mut ctx, &mut up, UploadOptions::default())
        .await
        .unwrap();
    assert_eq!((report.uploaded, report.failed), (5, 0));
    assert_eq!(backend.uploads(), 7);

    let entry = up.manifest().get("it_20250302_0001").unwrap();
    assert!(entry.is_success());
    assert_eq!(entry.attempts, 3);

    let verify = pipeline::run_verify(&ctx, up.manifest()).await.unwrap();
    assert!(verify.is_complete());
    assert_eq!(verify.discrepancies(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_exhausted_upload_is_reported_for_triage() {
    let tmp = TempDir::new().unwrap();
    let mut ctx = context(&tmp).await;
    let fetcher = fetcher(ScriptedSite::default().page(1, vec![Ok(FIVE_RECORDS.to_string())]));
    pipeline::run_crawl(&mut ctx, &fetcher, PageRange::new(1, Some(1)))
        .await
        .unwrap();

    let backend = MemoryBackend::default();
    backend.fail_uploads("it_20250303_0002", 10);
    let mut up = coordinator(&ctx, backend.clone()).await;
    let report = pipeline::run_upload(&mut ctx, &mut up, UploadOptions::default())
        .await
        .unwrap();
    assert_eq!((report.uploaded, report.failed), (4, 1));

    let verify = pipeline::run_verify(&ctx, up.manifest()).await.unwrap();
    assert!(!verify.is_complete());
    assert_eq!(verify.discrepancies(), 1);
    assert_eq!(verify.needs_triage(), vec!["it_20250303_0002"]);
    let status = verify
        .records
        .iter()
        .find(|(id, _)| id == "it_20250303_0002")
        .map(|(_, status)| status.clone());
    assert!(matches!(
        status,
        Some(RecordStatus::Failed {
            failure: Some(FailureClass::TransientExhausted),
            ..
        })
    ));

    // The next run picks the failed document up again.
    let mut retry = coordinator(&ctx, MemoryBackend::default()).await;
    let report = pipeline::run_upload(&mut ctx, &mut retry, UploadOptions::default())
        .await
        .unwrap();
    assert_eq!((report.uploaded, report.skipped), (1, 4));
    assert!(pipeline::run_verify(&ctx, retry.manifest()).await.unwrap().is_complete());
}

#[tokio::test(start_paused = true)]
async fn test_full_pipeline_run() {
    let tmp = TempDir::new().unwrap();
    let mut ctx = context(&tmp).await;
    let site = ScriptedSite::default()
        .page(1, vec![Ok(FIVE_RECORDS.lines().take(3).collect::<Vec<_>>().join("\n"))])
        .page(2, vec![Ok(FIVE_RECORDS.lines().skip(3).collect::<Vec<_>>().join("\n"))]);
    let fetcher = fetcher(site);
    let backend = MemoryBackend::default();
    let mut up = coordinator(&ctx, backend.clone()).await;

    let report = pipeline::run_pipeline(
        &mut ctx,
        &fetcher,
        &mut up,
        PageRange::new(1, None),
        UploadOptions::default(),
    )
    .await
    .unwrap();

    assert!(report.is_complete());
    assert_eq!(report.total(), 5);
    assert_eq!(report.uploaded(), 5);
    assert_eq!(fetcher.source().id_prefix(), "it");
    assert_eq!(up.manifest().collection_id(), Some("collections/harvested-records"));

    let summary = ctx.finish();
    assert_eq!(summary.fetched, 5);
    assert_eq!(summary.stored, 5);
    assert_eq!(summary.uploaded, 5);
    assert_eq!(summary.failed, 0);
}
