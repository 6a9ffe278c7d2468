//! Small helpers shared across the pipeline.
//!
//! - String truncation for summaries and log previews
//! - Host extraction for naming bare-URL feeds
//! - JSON error classification for damaged snapshots
//! - File system validation for the output location

use std::error::Error;
use std::fs as stdfs;
use std::path::Path;
use tokio::fs;
use tracing::{info, instrument};
use url::Url;

/// Truncate a string for logging purposes.
///
/// Long strings are cut to at most `max` bytes (on a character boundary) with
/// an ellipsis and a count of the bytes left out.
///
/// # Examples
///
/// ```ignore
/// assert_eq!(truncate_for_log("short", 100), "short");
/// assert_eq!(truncate_for_log(&"a".repeat(500), 10), "aaaaaaaaaa…(+490 bytes)");
/// ```
pub fn truncate_for_log(s: &str, max: usize) -> String {
    if s.len() <= max {
        return s.to_string();
    }
    let mut cut = max;
    while !s.is_char_boundary(cut) {
        cut -= 1;
    }
    format!("{}…(+{} bytes)", &s[..cut], s.len() - cut)
}

/// Keep at most `max` characters of `s`, dropping trailing whitespace left
/// behind by the cut.
pub fn truncate_chars(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((idx, _)) => s[..idx].trim_end().to_string(),
        None => s.to_string(),
    }
}

/// Host part of a URL with any leading `www.` removed.
///
/// Returns `None` for strings that do not parse as absolute URLs or that have
/// no host (e.g. `file:` URLs).
///
/// # Examples
///
/// ```ignore
/// assert_eq!(host_of("https://www.example.com/feed"), Some("example.com".into()));
/// ```
pub fn host_of(url: &str) -> Option<String> {
    let parsed = Url::parse(url.trim()).ok()?;
    let host = parsed.host_str()?;
    Some(host.trim_start_matches("www.").to_string())
}

/// Detect if a serde_json error indicates truncated/incomplete JSON.
///
/// A snapshot cut short by an interrupted write fails with an EOF error;
/// that is worth calling out separately from other corruption.
pub fn looks_truncated(e: &serde_json::Error) -> bool {
    use serde_json::error::Category;
    matches!(e.classify(), Category::Eof)
}

/// Ensure a directory exists and is writable.
///
/// Creates the directory if needed, then creates and removes a probe file.
///
/// # Errors
///
/// Returns an error if the directory cannot be created or is not writable.
#[instrument(level = "info", skip_all, fields(path = %path.display()))]
pub async fn ensure_writable_dir(path: &Path) -> Result<(), Box<dyn Error>> {
    fs::create_dir_all(path).await?;
    // A small sync write keeps the error surface simple
    let probe_path = path.join("..__probe_write__");
    stdfs::File::create(&probe_path)?;
    let _ = stdfs::remove_file(&probe_path);
    info!("Output directory is writable");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_for_log_short_string() {
        let s = "Hello, world!";
        assert_eq!(truncate_for_log(s, 100), "Hello, world!");
    }

    #[test]
    fn test_truncate_for_log_long_string() {
        let s = "a".repeat(500);
        let result = truncate_for_log(&s, 100);
        assert!(result.starts_with(&"a".repeat(100)));
        assert!(result.contains("…(+400 bytes)"));
    }

    #[test]
    fn test_truncate_for_log_respects_char_boundaries() {
        let s = "ééééé";
        let result = truncate_for_log(s, 3);
        assert!(result.starts_with('é'));
        assert!(result.contains("(+8 bytes)"));
    }

    #[test]
    fn test_truncate_chars() {
        assert_eq!(truncate_chars("hello", 10), "hello");
        assert_eq!(truncate_chars("hello world", 6), "hello");
        assert_eq!(truncate_chars("žluťoučký", 4), "žluť");
        assert_eq!(truncate_chars("", 3), "");
    }

    #[test]
    fn test_host_of() {
        assert_eq!(
            host_of("https://www.example.com/rss.xml"),
            Some("example.com".to_string())
        );
        assert_eq!(
            host_of("http://feeds.bbci.co.uk/news/rss.xml"),
            Some("feeds.bbci.co.uk".to_string())
        );
        assert_eq!(host_of("not a url"), None);
    }

    #[test]
    fn test_looks_truncated() {
        let json_eof = r#"{"items": [{"id": "a"#;
        let result: Result<serde_json::Value, _> = serde_json::from_str(json_eof);
        let err = result.unwrap_err();
        assert!(looks_truncated(&err));

        let result: Result<serde_json::Value, _> = serde_json::from_str("{]");
        assert!(!looks_truncated(&result.unwrap_err()));
    }

    #[tokio::test]
    async fn test_ensure_writable_dir_creates_missing_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("public").join("data");
        ensure_writable_dir(&nested).await.unwrap();
        assert!(nested.is_dir());
        assert!(!nested.join("..__probe_write__").exists());
    }
}
