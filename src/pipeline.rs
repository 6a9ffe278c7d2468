//! Run orchestration: fetch every feed, normalize, merge, rank, cap.
//!
//! # Flow
//!
//! 1. [`collect`] walks the configured feeds with bounded concurrency. Each
//!    feed is fetched, split and normalized on its own; a failing feed only
//!    produces a diagnostic.
//! 2. [`merge`] puts the previous snapshot's items in front of the new ones,
//!    drops later duplicates by `id`, sorts newest first and caps the list.
//!
//! # Merge Mode
//!
//! Previous-first accumulation: an article already in the snapshot is never
//! replaced by a freshly fetched copy with the same `id`. Passing an empty
//! `previous` list gives the stateless mode, where the snapshot is rebuilt
//! from the current run alone.
//!
//! # Pacing
//!
//! Request starts are spaced at least `pacing_ms` apart across all workers
//! by a shared ticker. With `concurrency = 1` feeds are processed strictly
//! in configuration order, one after the other.

use crate::config::{Config, FeedSource, Settings};
use crate::feeds::fetch::{FetchAsync, FetchError};
use crate::feeds::normalize::{EntryContext, normalize};
use crate::feeds::split::{feed_title, split_entries};
use crate::models::{ArticleRecord, Snapshot};
use crate::translate::Translator;
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use itertools::Itertools;
use std::borrow::Cow;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tokio::time::{Interval, MissedTickBehavior, interval};
use tracing::{debug, info, instrument, warn};

/// What happened to one feed.
#[derive(Debug)]
pub enum FeedOutcome {
    /// The document was fetched; `kept` of its `entries` became records.
    Ingested { entries: usize, kept: usize },
    Failed(FetchError),
}

/// Per-feed record for the run summary.
#[derive(Debug)]
pub struct FeedDiagnostic {
    pub source: String,
    pub url: String,
    pub outcome: FeedOutcome,
    pub elapsed: Duration,
}

impl FeedDiagnostic {
    pub fn is_failure(&self) -> bool {
        matches!(self.outcome, FeedOutcome::Failed(_))
    }

    /// Failed for a network reason; a non-feed body does not count.
    pub fn is_network_failure(&self) -> bool {
        matches!(&self.outcome, FeedOutcome::Failed(e) if e.is_network_fault())
    }
}

/// Everything a run produced before merging.
#[derive(Debug, Default)]
pub struct RunOutcome {
    /// New records in feed order, then entry order.
    pub records: Vec<ArticleRecord>,
    pub diagnostics: Vec<FeedDiagnostic>,
}

impl RunReport {
    /// Feeds that failed for a network reason.
    pub fn network_failures(&self) -> usize {
        self.diagnostics.iter().filter(|d| d.is_network_failure()).count()
    }

    /// Feeds that answered with something other than a feed.
    pub fn skipped_feeds(&self) -> usize {
        self.diagnostics
            .iter()
            .filter(|d| d.is_failure() && !d.is_network_failure())
            .count()
    }
}

impl RunOutcome {
    pub fn failed_feeds(&self) -> usize {
        self.diagnostics.iter().filter(|d| d.is_failure()).count()
    }
}

/// A finished run: the snapshot to persist plus per-feed diagnostics.
#[derive(Debug)]
pub struct RunReport {
    pub snapshot: Snapshot,
    pub diagnostics: Vec<FeedDiagnostic>,
    /// Records normalized this run, before merging.
    pub fetched: usize,
}

/// The source as articles should name it. Feeds without a configured name
/// take the document's own title, falling back to the host.
fn article_source<'a>(source: &'a FeedSource, document: &str) -> Cow<'a, FeedSource> {
    if source.named_in_config {
        return Cow::Borrowed(source);
    }
    match feed_title(document) {
        Some(title) => Cow::Owned(FeedSource {
            name: title,
            ..source.clone()
        }),
        None => Cow::Borrowed(source),
    }
}

/// Normalize every entry of an already fetched document.
///
/// Returns the kept records and the number of entries found. Malformed
/// entries are skipped one by one.
pub fn ingest_document(document: &str, ctx: &EntryContext<'_>) -> (Vec<ArticleRecord>, usize) {
    let blocks = split_entries(document);
    let entries = blocks.len();
    let records = blocks
        .into_iter()
        .enumerate()
        .filter_map(|(index, block)| match normalize(block, ctx) {
            Ok(record) => Some(record),
            Err(reason) => {
                debug!(feed = %ctx.source.name, index, %reason, "Dropped entry");
                None
            }
        })
        .collect();
    (records, entries)
}

#[instrument(level = "info", skip_all, fields(feed = %source.name, url = %source.url))]
async fn ingest_feed<F: FetchAsync>(
    fetcher: &F,
    source: &FeedSource,
    keywords: &[String],
    settings: &Settings,
    translator: &dyn Translator,
    ingested_at: DateTime<Utc>,
) -> (FeedDiagnostic, Vec<ArticleRecord>) {
    let t0 = Instant::now();
    let (outcome, records) = match fetcher.fetch(source).await {
        Ok(document) => {
            let named = article_source(source, &document);
            let ctx = EntryContext {
                source: &named,
                keywords,
                summary_max_chars: settings.summary_max_chars,
                max_tags: settings.max_tags,
                translator,
                ingested_at,
            };
            let (records, entries) = ingest_document(&document, &ctx);
            if entries == 0 {
                warn!("Feed has no entries");
            }
            info!(
                entries,
                kept = records.len(),
                dropped = entries - records.len(),
                elapsed_ms = t0.elapsed().as_millis(),
                "Ingested feed"
            );
            let kept = records.len();
            (FeedOutcome::Ingested { entries, kept }, records)
        }
        Err(e) if !e.is_network_fault() => {
            info!(reason = %e, "Skipped feed");
            (FeedOutcome::Failed(e), Vec::new())
        }
        Err(e) => {
            warn!(error = %e, elapsed_ms = t0.elapsed().as_millis(), "Feed fetch failed; skipping");
            (FeedOutcome::Failed(e), Vec::new())
        }
    };

    let diagnostic = FeedDiagnostic {
        source: source.name.clone(),
        url: source.url.clone(),
        outcome,
        elapsed: t0.elapsed(),
    };
    (diagnostic, records)
}

fn pacer(pacing: Duration) -> Option<Mutex<Interval>> {
    if pacing.is_zero() {
        return None;
    }
    let mut ticker = interval(pacing);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    Some(Mutex::new(ticker))
}

/// Fetch and normalize every configured feed.
///
/// Results come back in configuration order regardless of which fetch
/// finished first, so accumulation order is deterministic.
#[instrument(level = "info", skip_all, fields(feeds = config.feeds.len()))]
pub async fn collect<F: FetchAsync>(
    fetcher: &F,
    config: &Config,
    translator: &dyn Translator,
    ingested_at: DateTime<Utc>,
) -> RunOutcome {
    let settings = &config.settings;
    let keywords = config.tags.as_slice();
    let pacer = pacer(settings.pacing());
    let pacer = pacer.as_ref();

    let per_feed: Vec<(FeedDiagnostic, Vec<ArticleRecord>)> = stream::iter(&config.feeds)
        .map(|source| async move {
            if let Some(pacer) = pacer {
                pacer.lock().await.tick().await;
            }
            ingest_feed(fetcher, source, keywords, settings, translator, ingested_at).await
        })
        .buffered(settings.concurrency.max(1))
        .collect()
        .await;

    let mut outcome = RunOutcome::default();
    for (diagnostic, mut records) in per_feed {
        outcome.records.append(&mut records);
        outcome.diagnostics.push(diagnostic);
    }

    info!(
        records = outcome.records.len(),
        failed_feeds = outcome.failed_feeds(),
        "Collected feeds"
    );
    outcome
}

/// Combine previous and new records into the final ranked list.
///
/// # Arguments
///
/// * `previous` - Items of the last snapshot; empty for a stateless run
/// * `fresh` - Records normalized this run, in feed order
/// * `max_items` - Upper bound on the result
///
/// # Returns
///
/// At most `max_items` records with unique ids, newest first.
///
/// Previous records come first, so on an `id` collision the stored record
/// wins. The sort is stable: equal dates keep accumulation order.
pub fn merge(
    previous: Vec<ArticleRecord>,
    fresh: Vec<ArticleRecord>,
    max_items: usize,
) -> Vec<ArticleRecord> {
    let mut items: Vec<ArticleRecord> = previous
        .into_iter()
        .chain(fresh)
        .unique_by(|record| record.id.clone())
        .collect();
    items.sort_by(|a, b| b.date.cmp(&a.date));
    items.truncate(max_items);
    items
}

/// One full run against `previous`, producing the snapshot to persist.
///
/// # Arguments
///
/// * `fetcher` - Retrieves each configured feed
/// * `config` - Feeds, tag keywords and settings
/// * `translator` - Applied to every title and summary
/// * `previous` - Items of the last snapshot
/// * `ingested_at` - Stands in for entries without a readable date
///
/// # Returns
///
/// A [`RunReport`]; feed failures only show up in its diagnostics.
pub async fn run<F: FetchAsync>(
    fetcher: &F,
    config: &Config,
    translator: &dyn Translator,
    previous: Vec<ArticleRecord>,
    ingested_at: DateTime<Utc>,
) -> RunReport {
    let outcome = collect(fetcher, config, translator, ingested_at).await;
    let fetched = outcome.records.len();
    let previous_count = previous.len();

    let items = merge(previous, outcome.records, config.settings.max_items);
    info!(
        previous = previous_count,
        fetched,
        kept = items.len(),
        max_items = config.settings.max_items,
        "Merged snapshot"
    );

    RunReport {
        snapshot: Snapshot::new(items, Utc::now()),
        diagnostics: outcome.diagnostics,
        fetched,
    }
}
