//! Application configuration structures.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};
use crate::utils::RetryPolicy;

/// Root application configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// HTTP and crawling behavior settings
    #[serde(default)]
    pub crawler: CrawlerConfig,

    /// Where and how to read list/detail pages
    #[serde(default)]
    pub source: SourceConfig,

    /// Text preprocessing settings
    #[serde(default)]
    pub cleaning: CleaningConfig,

    /// Locations of persisted state
    #[serde(default)]
    pub storage: StorageConfig,

    /// Document rendering settings
    #[serde(default)]
    pub formatter: FormatterConfig,

    /// Retrieval backend settings
    #[serde(default)]
    pub upload: UploadConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    /// Validate configuration values for basic sanity.
    pub fn validate(&self) -> Result<()> {
        if self.crawler.user_agent.trim().is_empty() {
            return Err(AppError::validation("crawler.user_agent is empty"));
        }
        if self.crawler.timeout_secs == 0 {
            return Err(AppError::validation("crawler.timeout_secs must be > 0"));
        }
        if self.crawler.max_attempts == 0 {
            return Err(AppError::validation("crawler.max_attempts must be > 0"));
        }
        if self.source.id_prefix.trim().is_empty() {
            return Err(AppError::validation("source.id_prefix is empty"));
        }
        if self.storage.records_file.trim().is_empty() {
            return Err(AppError::validation("storage.records_file is empty"));
        }
        if self.formatter.title_max_chars == 0 {
            return Err(AppError::validation(
                "formatter.title_max_chars must be > 0",
            ));
        }
        if self.upload.max_attempts == 0 {
            return Err(AppError::validation("upload.max_attempts must be > 0"));
        }
        if self.upload.batch_size == 0 {
            return Err(AppError::validation("upload.batch_size must be > 0"));
        }
        if self.upload.collection_name.trim().is_empty() {
            return Err(AppError::validation("upload.collection_name is empty"));
        }
        Ok(())
    }
}

/// HTTP client and crawling behavior settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlerConfig {
    /// User-Agent header for HTTP requests
    #[serde(default = "defaults::user_agent")]
    pub user_agent: String,

    /// Request timeout in seconds
    #[serde(default = "defaults::timeout")]
    pub timeout_secs: u64,

    /// Minimum delay between successive requests in milliseconds
    #[serde(default = "defaults::request_delay")]
    pub request_delay_ms: u64,

    /// Attempts per request, including the first one
    #[serde(default = "defaults::max_attempts")]
    pub max_attempts: u32,

    /// First backoff delay in milliseconds (doubles on each retry)
    #[serde(default = "defaults::backoff_base")]
    pub backoff_base_ms: u64,

    /// Longest single backoff delay in milliseconds
    #[serde(default = "defaults::backoff_max")]
    pub backoff_max_ms: u64,

    /// Open-ended crawls stop after this many failed pages in a row
    #[serde(default = "defaults::max_consecutive_page_failures")]
    pub max_consecutive_page_failures: u32,
}

impl CrawlerConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.max_attempts,
            Duration::from_millis(self.backoff_base_ms),
            Duration::from_millis(self.backoff_max_ms),
        )
    }

    pub fn request_delay(&self) -> Duration {
        Duration::from_millis(self.request_delay_ms)
    }
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        Self {
            user_agent: defaults::user_agent(),
            timeout_secs: defaults::timeout(),
            request_delay_ms: defaults::request_delay(),
            max_attempts: defaults::max_attempts(),
            backoff_base_ms: defaults::backoff_base(),
            backoff_max_ms: defaults::backoff_max(),
            max_consecutive_page_failures: defaults::max_consecutive_page_failures(),
        }
    }
}

/// HTTP method used for list pages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    #[default]
    Get,
    Post,
}

/// Selector-driven description of a paginated source.
///
/// `list_url` and form values may contain `{page}`, replaced by the page number.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Prefix for record identifiers
    #[serde(default = "defaults::id_prefix")]
    pub id_prefix: String,

    /// Source tag used when a row carries none
    #[serde(default = "defaults::default_source")]
    pub default_source: String,

    /// Raw issuing-unit names mapped to source tags
    #[serde(default)]
    pub source_aliases: BTreeMap<String, String>,

    #[serde(default)]
    pub list_url: String,

    #[serde(default)]
    pub method: HttpMethod,

    /// Form fields sent with POST list requests
    #[serde(default)]
    pub form: BTreeMap<String, String>,

    /// CSS selector for list rows
    #[serde(default = "defaults::row_selector")]
    pub row_selector: String,

    /// CSS selector for title element
    #[serde(default = "defaults::title_selector")]
    pub title_selector: String,

    /// CSS selector for date element
    #[serde(default = "defaults::date_selector")]
    pub date_selector: String,

    /// CSS selector for the issuing unit within a row
    #[serde(default)]
    pub source_selector: Option<String>,

    /// Optional link selector (if different from title_selector)
    #[serde(default)]
    pub link_selector: Option<String>,

    /// HTML attribute for link extraction
    #[serde(default = "defaults::attr_name")]
    pub attr_name: String,

    /// CSS selector for the body on detail pages
    #[serde(default)]
    pub body_selector: Option<String>,

    /// CSS selector for attachment links on detail pages
    #[serde(default)]
    pub attachment_selector: Option<String>,

    /// Raw markup kept alongside the cleaned text, in characters (0 disables)
    #[serde(default = "defaults::raw_html_max_chars")]
    pub raw_html_max_chars: usize,

    /// Metadata extracted from title and body text
    #[serde(default)]
    pub metadata_patterns: Vec<MetadataPattern>,
}

impl SourceConfig {
    /// Check that the source can actually be crawled.
    pub fn validate(&self) -> Result<()> {
        if self.list_url.trim().is_empty() {
            return Err(AppError::validation("source.list_url is empty"));
        }
        if !self.list_url.contains("{page}") && !self.form.values().any(|v| v.contains("{page}"))
        {
            return Err(AppError::validation(
                "source.list_url or a form field must contain {page}",
            ));
        }
        Ok(())
    }
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            id_prefix: defaults::id_prefix(),
            default_source: defaults::default_source(),
            source_aliases: BTreeMap::new(),
            list_url: String::new(),
            method: HttpMethod::default(),
            form: BTreeMap::new(),
            row_selector: defaults::row_selector(),
            title_selector: defaults::title_selector(),
            date_selector: defaults::date_selector(),
            source_selector: None,
            link_selector: None,
            attr_name: defaults::attr_name(),
            body_selector: None,
            attachment_selector: None,
            raw_html_max_chars: defaults::raw_html_max_chars(),
            metadata_patterns: Vec::new(),
        }
    }
}

/// Regex whose first capture group (or whole match) becomes a metadata value.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetadataPattern {
    /// Metadata key, e.g. "document_number"
    pub key: String,
    pub pattern: String,
    /// Collect every match instead of the first one
    #[serde(default)]
    pub all: bool,
}

/// Text cleaning/preprocessing settings.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CleaningConfig {
    /// Patterns to remove from titles
    #[serde(default)]
    pub title_remove_patterns: Vec<String>,

    /// Patterns to remove from dates
    #[serde(default)]
    pub date_remove_patterns: Vec<String>,

    /// Text replacements to apply to dates
    #[serde(default)]
    pub date_replacements: Vec<Replacement>,
}

impl CleaningConfig {
    /// Clean text by removing patterns and applying replacements.
    fn clean(&self, text: &str, patterns: &[String], replacements: &[Replacement]) -> String {
        let mut result = crate::utils::clean_text(text);

        for pattern in patterns {
            result = result.replace(pattern, "");
        }

        for r in replacements {
            result = result.replace(&r.from, &r.to);
        }

        result.trim().to_string()
    }

    /// Clean a title string.
    pub fn clean_title(&self, text: &str) -> String {
        self.clean(text, &self.title_remove_patterns, &[])
    }

    /// Clean a date string.
    pub fn clean_date(&self, text: &str) -> String {
        self.clean(text, &self.date_remove_patterns, &self.date_replacements)
    }
}

/// A text replacement rule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Replacement {
    pub from: String,
    pub to: String,
}

/// File locations, relative to `data_dir` unless absolute.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "defaults::data_dir")]
    pub data_dir: PathBuf,
    #[serde(default = "defaults::records_file")]
    pub records_file: String,
    #[serde(default = "defaults::index_file")]
    pub index_file: String,
    #[serde(default = "defaults::metadata_file")]
    pub metadata_file: String,
    #[serde(default = "defaults::manifest_file")]
    pub manifest_file: String,
    /// Formatted documents waiting for upload
    #[serde(default = "defaults::staging_dir")]
    pub staging_dir: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: defaults::data_dir(),
            records_file: defaults::records_file(),
            index_file: defaults::index_file(),
            metadata_file: defaults::metadata_file(),
            manifest_file: defaults::manifest_file(),
            staging_dir: defaults::staging_dir(),
        }
    }
}

/// Document rendering settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FormatterConfig {
    /// Title characters kept in document names
    #[serde(default = "defaults::title_max_chars")]
    pub title_max_chars: usize,

    /// Display labels for source tags
    #[serde(default)]
    pub source_labels: BTreeMap<String, String>,

    /// Display labels for metadata keys
    #[serde(default)]
    pub field_labels: BTreeMap<String, String>,
}

impl Default for FormatterConfig {
    fn default() -> Self {
        Self {
            title_max_chars: defaults::title_max_chars(),
            source_labels: BTreeMap::new(),
            field_labels: BTreeMap::new(),
        }
    }
}

/// Retrieval backend settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadConfig {
    /// Base URL of the backend REST API
    #[serde(default)]
    pub base_url: String,

    /// Environment variable holding the API key
    #[serde(default = "defaults::api_key_env")]
    pub api_key_env: String,

    /// Display name of the remote collection
    #[serde(default = "defaults::collection_name")]
    pub collection_name: String,

    #[serde(default = "defaults::upload_timeout")]
    pub timeout_secs: u64,

    /// Attempts per document and run, including the first one
    #[serde(default = "defaults::max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "defaults::backoff_base")]
    pub backoff_base_ms: u64,

    #[serde(default = "defaults::backoff_max")]
    pub backoff_max_ms: u64,

    /// Delay between successive documents in milliseconds
    #[serde(default = "defaults::call_delay")]
    pub call_delay_ms: u64,

    /// Documents formatted and uploaded per batch
    #[serde(default = "defaults::batch_size")]
    pub batch_size: usize,
}

impl UploadConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.max_attempts,
            Duration::from_millis(self.backoff_base_ms),
            Duration::from_millis(self.backoff_max_ms),
        )
    }

    pub fn call_delay(&self) -> Duration {
        Duration::from_millis(self.call_delay_ms)
    }
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            api_key_env: defaults::api_key_env(),
            collection_name: defaults::collection_name(),
            timeout_secs: defaults::upload_timeout(),
            max_attempts: defaults::max_attempts(),
            backoff_base_ms: defaults::backoff_base(),
            backoff_max_ms: defaults::backoff_max(),
            call_delay_ms: defaults::call_delay(),
            batch_size: defaults::batch_size(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "defaults::log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: defaults::log_level(),
        }
    }
}

mod defaults {
    use std::path::PathBuf;

    // Crawler defaults
    pub fn user_agent() -> String {
        "Mozilla/5.0 (compatible; harvester/0.1)".into()
    }
    pub fn timeout() -> u64 {
        30
    }
    pub fn request_delay() -> u64 {
        1000
    }
    pub fn max_attempts() -> u32 {
        3
    }
    pub fn backoff_base() -> u64 {
        1000
    }
    pub fn backoff_max() -> u64 {
        32_000
    }
    pub fn max_consecutive_page_failures() -> u32 {
        3
    }

    // Source defaults
    pub fn id_prefix() -> String {
        "rec".into()
    }
    pub fn default_source() -> String {
        "unknown".into()
    }
    pub fn row_selector() -> String {
        "table tbody tr".into()
    }
    pub fn title_selector() -> String {
        "td.title a".into()
    }
    pub fn date_selector() -> String {
        "td.date".into()
    }
    pub fn attr_name() -> String {
        "href".into()
    }
    pub fn raw_html_max_chars() -> usize {
        2000
    }

    // Storage defaults
    pub fn data_dir() -> PathBuf {
        PathBuf::from("data")
    }
    pub fn records_file() -> String {
        "records.jsonl".into()
    }
    pub fn index_file() -> String {
        "index.json".into()
    }
    pub fn metadata_file() -> String {
        "metadata.json".into()
    }
    pub fn manifest_file() -> String {
        "manifest.json".into()
    }
    pub fn staging_dir() -> String {
        "staging".into()
    }

    // Formatter defaults
    pub fn title_max_chars() -> usize {
        50
    }

    // Upload defaults
    pub fn api_key_env() -> String {
        "RETRIEVAL_API_KEY".into()
    }
    pub fn collection_name() -> String {
        "harvested-records".into()
    }
    pub fn upload_timeout() -> u64 {
        120
    }
    pub fn call_delay() -> u64 {
        1000
    }
    pub fn batch_size() -> usize {
        50
    }

    pub fn log_level() -> String {
        "info".into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_default_config_ok() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn validate_rejects_empty_user_agent() {
        let mut config = Config::default();
        config.crawler.user_agent = "  ".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_rejects_zero_attempts() {
        let mut config = Config::default();
        config.upload.max_attempts = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn partial_toml_falls_back_to_defaults() {
        let config: Config = toml::from_str(
            r#"
            [crawler]
            max_attempts = 5

            [source]
            id_prefix = "fsc_ann"
            list_url = "https://example.gov/list?page={page}"

            [formatter.source_labels]
            bank_bureau = "Banking Bureau"
            "#,
        )
        .unwrap();

        assert_eq!(config.crawler.max_attempts, 5);
        assert_eq!(config.crawler.timeout_secs, 30);
        assert_eq!(config.source.id_prefix, "fsc_ann");
        assert_eq!(config.source.method, HttpMethod::Get);
        assert_eq!(config.storage.records_file, "records.jsonl");
        assert_eq!(
            config.formatter.source_labels.get("bank_bureau").map(String::as_str),
            Some("Banking Bureau")
        );
        assert!(config.source.validate().is_ok());
    }

    #[test]
    fn source_requires_page_placeholder() {
        let mut source = SourceConfig::default();
        assert!(source.validate().is_err());
        source.list_url = "https://example.gov/list".into();
        assert!(source.validate().is_err());
        source.method = HttpMethod::Post;
        source.form.insert("pageNo".into(), "{page}".into());
        assert!(source.validate().is_ok());
    }

    #[test]
    fn retry_policy_from_config() {
        let crawler = CrawlerConfig::default();
        let policy = crawler.retry_policy();
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.delay_after(2), Duration::from_secs(2));
    }
}
