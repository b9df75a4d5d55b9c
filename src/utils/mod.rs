//! Utility functions and helpers.

pub mod http;
pub mod retry;

use std::sync::LazyLock;

use chrono::NaiveDate;
use regex::Regex;
use unicode_segmentation::UnicodeSegmentation;
use url::Url;

pub use retry::RetryPolicy;

/// Resolve a potentially relative URL against a base URL.
pub fn resolve_url(base: &Url, href: &str) -> String {
    base.join(href)
        .map(|u| u.to_string())
        .unwrap_or_else(|_| href.to_string())
}

/// Collapse runs of whitespace into single spaces and trim.
pub fn clean_text(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Keep line structure but normalize whitespace within lines and drop
/// blank-line runs.
pub fn clean_multiline(text: &str) -> String {
    let mut out: Vec<String> = Vec::new();
    for line in text.lines() {
        let line = clean_text(line);
        if line.is_empty() {
            if out.last().is_some_and(|l| !l.is_empty()) {
                out.push(String::new());
            }
        } else {
            out.push(line);
        }
    }
    while out.last().is_some_and(|l| l.is_empty()) {
        out.pop();
    }
    out.join("\n")
}

/// Truncate to at most `max` user-perceived characters.
pub fn truncate_graphemes(text: &str, max: usize) -> &str {
    match text.grapheme_indices(true).nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

/// Replace characters that are illegal in file names on common platforms.
pub fn sanitize_file_name(name: &str) -> String {
    let replaced: String = name
        .chars()
        .map(|c| match c {
            '<' | '>' | ':' | '"' | '/' | '\\' | '|' | '?' | '*' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();
    clean_text(&replaced)
}

/// ROC calendar date: two or three digit year, then month and day.
static ROC_DATE: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"^(\d{2,3})[-/.](\d{1,2})[-/.](\d{1,2})$").ok());

/// Parse a date in one of the formats published by government portals.
///
/// Accepts `YYYY-MM-DD`, `YYYY/MM/DD`, `YYYY.MM.DD`, `YYYY年MM月DD日`, and
/// ROC calendar dates such as `113-01-02` (year + 1911).
pub fn parse_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    // ROC years have at most three digits and must be checked before %Y,
    // which happily parses "113" as year 113.
    let roc = ROC_DATE.as_ref()?;
    if let Some(caps) = roc.captures(raw) {
        let year: i32 = caps[1].parse().ok()?;
        let month: u32 = caps[2].parse().ok()?;
        let day: u32 = caps[3].parse().ok()?;
        return NaiveDate::from_ymd_opt(year + 1911, month, day);
    }

    const FORMATS: &[&str] = &["%Y-%m-%d", "%Y/%m/%d", "%Y.%m.%d", "%Y年%m月%d日"];
    FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(raw, fmt).ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_url() {
        let base = Url::parse("https://example.com/path/").unwrap();
        assert_eq!(
            resolve_url(&base, "page.html"),
            "https://example.com/path/page.html"
        );
        assert_eq!(
            resolve_url(&base, "/root.html"),
            "https://example.com/root.html"
        );
        assert_eq!(
            resolve_url(&base, "https://other.com/x"),
            "https://other.com/x"
        );
    }

    #[test]
    fn test_clean_text() {
        assert_eq!(clean_text("  a \n\t b  "), "a b");
        assert_eq!(clean_multiline("a  b\n\n\n c \n\n"), "a b\n\nc");
    }

    #[test]
    fn test_truncate_graphemes() {
        assert_eq!(truncate_graphemes("金融監督管理委員會", 4), "金融監督");
        assert_eq!(truncate_graphemes("short", 50), "short");
    }

    #[test]
    fn test_sanitize_file_name() {
        assert_eq!(sanitize_file_name("a/b:c?d"), "a_b_c_d");
        assert_eq!(sanitize_file_name("修正「銀行法」\n第1條"), "修正「銀行法」_第1條");
    }

    #[test]
    fn test_parse_date_formats() {
        let expected = NaiveDate::from_ymd_opt(2024, 1, 2);
        assert_eq!(parse_date("2024-01-02"), expected);
        assert_eq!(parse_date("2024/01/02"), expected);
        assert_eq!(parse_date("2024.01.02"), expected);
        assert_eq!(parse_date("2024年01月02日"), expected);
        assert_eq!(parse_date("113-01-02"), expected);
        assert_eq!(parse_date("113/1/2"), expected);
        assert_eq!(parse_date("not a date"), None);
        assert_eq!(parse_date(""), None);
    }

    #[test]
    fn test_roc_pattern_is_shared() {
        assert!(ROC_DATE.is_some());
        let first: *const Regex = ROC_DATE.as_ref().unwrap();
        for _ in 0..3 {
            assert_eq!(parse_date("112.12.31"), NaiveDate::from_ymd_opt(2023, 12, 31));
        }
        assert!(std::ptr::eq(first, ROC_DATE.as_ref().unwrap()));
    }
}
