//! Data models for normalized articles and the persisted snapshot.
//!
//! - [`ArticleRecord`]: one normalized feed entry
//! - [`Snapshot`]: the ranked collection written at the end of every run
//!
//! Both types round-trip through the JSON artifact, which doubles as the
//! previous-run input for the merge step.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A normalized article extracted from a single feed entry.
///
/// The `id` is derived from the link (or title and date when no link exists)
/// and is the deduplication key across runs.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ArticleRecord {
    /// Stable identifier, a hex digest of the link.
    pub id: String,
    /// Plain-text headline.
    pub title: String,
    /// Absolute URL of the article.
    pub link: String,
    /// Publication instant, or the ingestion instant when the feed had none.
    pub date: DateTime<Utc>,
    /// Plain-text summary, capped in length.
    #[serde(default)]
    pub summary: String,
    /// Illustrative image URL, empty when none was found.
    #[serde(default)]
    pub image: String,
    /// Configured feed name.
    #[serde(default)]
    pub source: String,
    /// Configured feed language code.
    #[serde(default)]
    pub lang: String,
    /// Configured keywords found in the title or summary.
    #[serde(default)]
    pub tags: Vec<String>,
}

impl ArticleRecord {
    /// Whether the record satisfies the persisted-collection invariants.
    pub fn is_complete(&self) -> bool {
        !self.id.trim().is_empty() && !self.title.trim().is_empty() && !self.link.trim().is_empty()
    }
}

/// The persisted artifact: every article kept by a run, newest first.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Snapshot {
    /// When the snapshot was produced.
    pub generated_at: DateTime<Utc>,
    /// Always equal to `items.len()`.
    pub count: usize,
    /// Articles sorted by `date` descending.
    pub items: Vec<ArticleRecord>,
}

impl Snapshot {
    /// Wrap already merged and sorted items, keeping `count` in sync.
    pub fn new(items: Vec<ArticleRecord>, generated_at: DateTime<Utc>) -> Self {
        Self {
            generated_at,
            count: items.len(),
            items,
        }
    }
}
