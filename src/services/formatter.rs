// src/services/formatter.rs

//! Renders one record as one Markdown retrieval document.

use std::fmt::Write;

use serde_json::Value;

use crate::models::{Document, FormatterConfig, Record};
use crate::utils::{clean_multiline, clean_text, sanitize_file_name, truncate_graphemes};

const MIME_MARKDOWN: &str = "text/markdown";

/// Pure record → document conversion.
#[derive(Debug, Clone, Default)]
pub struct DocumentFormatter {
    config: FormatterConfig,
}

impl DocumentFormatter {
    pub fn new(config: FormatterConfig) -> Self {
        Self { config }
    }

    /// Render `record`. Same input, same output.
    pub fn format(&self, record: &Record) -> Document {
        Document {
            key: record.id.clone(),
            name: self.document_name(record),
            content: self.render(record),
            mime_type: MIME_MARKDOWN,
        }
    }

    /// `{id}_{source label}_{truncated title}.md`, safe as a file name.
    ///
    /// Unique because the id is.
    pub fn document_name(&self, record: &Record) -> String {
        let title = clean_text(&record.title);
        let title = truncate_graphemes(&title, self.config.title_max_chars);
        let stem = format!("{}_{}_{}", record.id, self.source_label(&record.source), title);
        format!("{}.md", sanitize_file_name(&stem).trim_end_matches(['_', ' ', '.']))
    }

    fn source_label<'a>(&'a self, source: &'a str) -> &'a str {
        self.config
            .source_labels
            .get(source)
            .map(String::as_str)
            .unwrap_or(source)
    }

    fn field_label<'a>(&'a self, key: &'a str) -> &'a str {
        self.config
            .field_labels
            .get(key)
            .map(String::as_str)
            .unwrap_or(key)
    }

    fn render(&self, record: &Record) -> String {
        let mut out = String::new();
        let title = clean_text(&record.title);

        // `write!` into a String cannot fail.
        let _ = writeln!(out, "# {title}\n");
        let _ = writeln!(out, "- **ID**: `{}`", record.id);
        let _ = writeln!(out, "- **Date**: {}", record.date.format("%Y-%m-%d"));
        let _ = writeln!(out, "- **Source**: {}", self.source_label(&record.source));
        for (key, value) in &record.metadata {
            if let Some(value) = metadata_text(value) {
                let _ = writeln!(out, "- **{}**: {}", self.field_label(key), value);
            }
        }
        if let Some(url) = &record.detail_url {
            let _ = writeln!(out, "- **Original**: {url}");
        }

        let body = clean_multiline(&record.body.text);
        if !body.is_empty() {
            let _ = writeln!(out, "\n## Content\n\n{body}");
        }

        if !record.attachments.is_empty() {
            let _ = writeln!(out, "\n## Attachments\n");
            for (i, attachment) in record.attachments.iter().enumerate() {
                let _ = writeln!(
                    out,
                    "{}. **{}** ([{}]({}))",
                    i + 1,
                    clean_text(&attachment.name),
                    attachment.kind.to_uppercase(),
                    attachment.url
                );
            }
        }

        let _ = writeln!(
            out,
            "\n---\n\n*Tags: date:{} | source:{}*",
            record.date.format("%Y-%m-%d"),
            record.source
        );
        out
    }
}

/// Flatten a metadata value into one line, or None if there is nothing to show.
fn metadata_text(value: &Value) -> Option<String> {
    let text = match value {
        Value::Null => return None,
        Value::String(s) => clean_text(s),
        Value::Array(items) => items
            .iter()
            .filter_map(metadata_text)
            .collect::<Vec<_>>()
            .join(", "),
        other => other.to_string(),
    };
    (!text.is_empty()).then_some(text)
}
