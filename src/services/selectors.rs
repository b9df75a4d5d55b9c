// src/services/selectors.rs

//! Configuration-driven HTML source.
//!
//! Everything site specific (list URL, form fields, CSS selectors, metadata
//! patterns) comes from [`SourceConfig`], so a new portal needs a config
//! section rather than code.

use std::collections::BTreeMap;

use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use serde_json::Value;
use url::Url;

use crate::error::{AppError, Result};
use crate::models::{Attachment, CleaningConfig, HttpMethod, RawRecord, RecordBody, SourceConfig};
use crate::utils::{clean_multiline, clean_text, parse_date, resolve_url};

use super::source::{ListItem, PageRequest, PageSource};

/// File extensions treated as attachments when no selector is configured.
const ATTACHMENT_EXTENSIONS: &[&str] = &["pdf", "doc", "docx", "xls", "xlsx", "odt", "ods", "zip"];

struct CompiledSelectors {
    row: Selector,
    title: Selector,
    date: Selector,
    source: Option<Selector>,
    link: Option<Selector>,
    body: Selector,
    attachment: Selector,
}

/// [`PageSource`] driven by CSS selectors.
pub struct SelectorSource {
    config: SourceConfig,
    cleaning: CleaningConfig,
    selectors: CompiledSelectors,
    patterns: Vec<(String, Regex, bool)>,
}

impl SelectorSource {
    /// Compile the configured selectors and patterns.
    pub fn new(config: SourceConfig, cleaning: CleaningConfig) -> Result<Self> {
        config.validate()?;

        let optional = |s: &Option<String>| s.as_deref().map(parse_selector).transpose();
        let selectors = CompiledSelectors {
            row: parse_selector(&config.row_selector)?,
            title: parse_selector(&config.title_selector)?,
            date: parse_selector(&config.date_selector)?,
            source: optional(&config.source_selector)?,
            link: optional(&config.link_selector)?,
            body: parse_selector(config.body_selector.as_deref().unwrap_or("body"))?,
            attachment: parse_selector(
                config.attachment_selector.as_deref().unwrap_or("a[href]"),
            )?,
        };

        let patterns = config
            .metadata_patterns
            .iter()
            .map(|p| {
                Regex::new(&p.pattern)
                    .map(|re| (p.key.clone(), re, p.all))
                    .map_err(|e| AppError::config(format!("metadata pattern '{}': {e}", p.key)))
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            config,
            cleaning,
            selectors,
            patterns,
        })
    }

    fn parse_row(&self, row: &ElementRef, base: &Url) -> Option<ListItem> {
        let title_elem = row.select(&self.selectors.title).next()?;
        let date_elem = row.select(&self.selectors.date).next()?;

        let raw_title = title_elem
            .value()
            .attr("title")
            .map(str::to_string)
            .unwrap_or_else(|| title_elem.text().collect());
        let title = self.cleaning.clean_title(&raw_title);
        if title.is_empty() {
            return None;
        }

        let raw_date = self.cleaning.clean_date(&date_elem.text().collect::<String>());
        let Some(date) = parse_date(&raw_date) else {
            log::debug!("Skipping row '{title}': unparseable date '{raw_date}'");
            return None;
        };

        let source = self
            .selectors
            .source
            .as_ref()
            .and_then(|sel| row.select(sel).next())
            .map(|el| clean_text(&el.text().collect::<String>()))
            .filter(|s| !s.is_empty())
            .map(|raw| self.config.source_aliases.get(&raw).cloned().unwrap_or(raw))
            .unwrap_or_else(|| self.config.default_source.clone());

        let link_elem = self
            .selectors
            .link
            .as_ref()
            .and_then(|sel| row.select(sel).next())
            .unwrap_or(title_elem);
        let detail_url = link_elem
            .value()
            .attr(&self.config.attr_name)
            .map(str::trim)
            .filter(|href| !href.is_empty() && !href.starts_with("javascript:") && *href != "#")
            .map(|href| resolve_url(base, href));

        let metadata = self.extract_metadata(&title);

        Some(ListItem {
            title,
            date,
            source,
            detail_url,
            metadata,
        })
    }

    fn extract_metadata(&self, text: &str) -> BTreeMap<String, Value> {
        let mut metadata = BTreeMap::new();
        for (key, regex, all) in &self.patterns {
            let mut values: Vec<String> = Vec::new();
            for caps in regex.captures_iter(text) {
                let Some(m) = caps.get(1).or_else(|| caps.get(0)) else {
                    continue;
                };
                let value = clean_text(m.as_str());
                if !value.is_empty() && !values.contains(&value) {
                    values.push(value);
                }
                if !all {
                    break;
                }
            }
            if values.is_empty() {
                continue;
            }
            let value = if *all {
                Value::from(values)
            } else {
                Value::from(values.swap_remove(0))
            };
            metadata.insert(key.clone(), value);
        }
        metadata
    }

    fn extract_attachments(&self, document: &Html, base: &Url) -> Vec<Attachment> {
        let mut attachments: Vec<Attachment> = Vec::new();
        for link in document.select(&self.selectors.attachment) {
            let Some(href) = link.value().attr("href") else {
                continue;
            };
            let url = resolve_url(base, href.trim());
            let name = clean_text(&link.text().collect::<String>());
            let attachment = Attachment::new(if name.is_empty() { url.clone() } else { name }, url);

            if self.config.attachment_selector.is_none()
                && !ATTACHMENT_EXTENSIONS.contains(&attachment.kind.as_str())
            {
                continue;
            }
            if attachments.iter().any(|a| a.url == attachment.url) {
                continue;
            }
            attachments.push(attachment);
        }
        attachments
    }
}

impl PageSource for SelectorSource {
    fn id_prefix(&self) -> &str {
        &self.config.id_prefix
    }

    fn list_request(&self, page: u32) -> Result<PageRequest> {
        let page = page.to_string();
        let url = self.config.list_url.replace("{page}", &page);
        Ok(match self.config.method {
            HttpMethod::Get => PageRequest::get(url),
            HttpMethod::Post => PageRequest::post(
                url,
                self.config
                    .form
                    .iter()
                    .map(|(k, v)| (k.clone(), v.replace("{page}", &page)))
                    .collect(),
            ),
        })
    }

    fn parse_list_page(&self, request: &PageRequest, body: &str) -> Result<Vec<ListItem>> {
        let base = Url::parse(&request.url)?;
        let document = Html::parse_document(body);

        let items: Vec<ListItem> = document
            .select(&self.selectors.row)
            .filter_map(|row| self.parse_row(&row, &base))
            .collect();
        log::debug!("Parsed {} rows from {}", items.len(), request.url);
        Ok(items)
    }

    fn parse_detail_page(&self, item: ListItem, body: &str) -> Result<RawRecord> {
        let url = item.detail_url.as_deref().unwrap_or(&self.config.list_url);
        let base = Url::parse(url)?;
        let document = Html::parse_document(body);

        let content = document.select(&self.selectors.body).next();
        if content.is_none() {
            log::warn!("No content found on {url}");
        }

        let text = content
            .map(|el| clean_multiline(&el.text().collect::<Vec<_>>().join("\n")))
            .unwrap_or_default();
        let html = content
            .filter(|_| self.config.raw_html_max_chars > 0)
            .map(|el| el.html().chars().take(self.config.raw_html_max_chars).collect());

        let mut metadata = item.metadata;
        for (key, value) in self.extract_metadata(&format!("{}\n{}", item.title, text)) {
            metadata.entry(key).or_insert(value);
        }

        Ok(RawRecord {
            date: item.date,
            source: item.source,
            title: item.title,
            body: RecordBody { text, html },
            attachments: self.extract_attachments(&document, &base),
            metadata,
            detail_url: item.detail_url,
        })
    }
}

fn parse_selector(s: &str) -> Result<Selector> {
    Selector::parse(s).map_err(|e| AppError::selector(s, format!("{e:?}")))
}
