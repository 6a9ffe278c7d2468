//! # Feed Digest
//!
//! Reads a list of RSS and Atom feeds, normalizes every entry into a flat
//! article record, merges the result with the previous run and writes a
//! ranked, capped JSON snapshot for a static front end to display.
//!
//! ## Usage
//!
//! ```sh
//! feed_digest -c feeds.json -o public/news.json
//! ```
//!
//! ## Architecture
//!
//! 1. **Configuration**: load feeds, tag keywords and tuning knobs
//! 2. **Collection**: fetch, split and normalize each feed (bounded
//!    concurrency, paced, one failing feed never stops the run)
//! 3. **Merge**: previous snapshot first, dedup by id, newest first, capped
//! 4. **Output**: replace the snapshot file atomically
//!
//! Exit status is non-zero only when the configuration cannot be loaded or
//! the snapshot cannot be written; failed feeds are reported in the log.

use chrono::Utc;
use clap::Parser;
use std::error::Error;
use tracing::{debug, error, info, instrument, warn};
use tracing_subscriber::{EnvFilter, fmt as tfmt};

mod cli;
mod config;
mod feeds;
mod models;
mod outputs;
mod pipeline;
mod translate;
mod utils;

use cli::Cli;
use feeds::fetch::{HttpFetcher, RetryFetch};
use outputs::json;
use pipeline::FeedOutcome;
use utils::ensure_writable_dir;

#[tokio::main]
#[instrument]
async fn main() -> Result<(), Box<dyn Error>> {
    // --- Tracing init ---
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tfmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_file(false)
        .with_line_number(false)
        .with_timer(tracing_subscriber::fmt::time::UtcTime::rfc_3339())
        .init();

    let start_time = std::time::Instant::now();
    info!(version = env!("CARGO_PKG_VERSION"), "feed_digest starting up");

    let args = Cli::parse();
    debug!(config = %args.config.display(), output = %args.output.display(), "Parsed CLI arguments");

    // ---- Configuration ----
    let mut config = match config::load_config(&args.config).await {
        Ok(config) => config,
        Err(e) => {
            error!(path = %args.config.display(), error = %e, "Cannot load configuration");
            return Err(e.into());
        }
    };
    if let Some(max_items) = args.max_items {
        config.settings.max_items = max_items;
    }

    // Early warning only; the real failure, if any, is reported on write
    if let Some(dir) = args.output.parent().filter(|p| !p.as_os_str().is_empty()) {
        if let Err(e) = ensure_writable_dir(dir).await {
            warn!(path = %dir.display(), error = %e, "Output directory does not look writable");
        }
    }

    // ---- Collect, merge ----
    let settings = &config.settings;
    let http = match HttpFetcher::new(&settings.user_agent, settings.timeout()) {
        Ok(http) => http,
        Err(e) => {
            error!(error = %e, "Cannot build HTTP client");
            return Err(e.into());
        }
    };
    let fetcher = RetryFetch::new(http, settings.max_retries, std::time::Duration::from_millis(500))
        .with_budget(settings.timeout());
    let translator = translate::from_kind(settings.translator);
    info!(
        feeds = config.feeds.len(),
        concurrency = settings.concurrency,
        pacing_ms = settings.pacing_ms,
        timeout_secs = settings.timeout_secs,
        translator = translator.name(),
        stateless = args.stateless,
        "Starting run"
    );

    let previous = if args.stateless {
        Vec::new()
    } else {
        json::load_previous(&args.output).await
    };

    let report = pipeline::run(&fetcher, &config, translator.as_ref(), previous, Utc::now()).await;

    // Each outcome was already logged at its own level while collecting
    for diagnostic in &report.diagnostics {
        let elapsed_ms = diagnostic.elapsed.as_millis();
        match &diagnostic.outcome {
            FeedOutcome::Ingested { entries, kept } => {
                debug!(feed = %diagnostic.source, entries, kept, elapsed_ms, "Feed ingested");
            }
            FeedOutcome::Failed(e) => {
                debug!(feed = %diagnostic.source, url = %diagnostic.url, reason = %e, elapsed_ms, "Feed not ingested this run");
            }
        }
    }

    // ---- Output ----
    if let Err(e) = json::write_snapshot(&report.snapshot, &args.output).await {
        error!(path = %args.output.display(), error = %e, "Failed to write snapshot");
        return Err(e.into());
    }

    let elapsed = start_time.elapsed();
    let failed = report.network_failures();
    let skipped = report.skipped_feeds();
    info!(
        ?elapsed,
        secs = elapsed.as_secs(),
        millis = elapsed.subsec_millis(),
        feeds_ok = report.diagnostics.len() - failed - skipped,
        feeds_failed = failed,
        feeds_skipped = skipped,
        fetched = report.fetched,
        saved = report.snapshot.count,
        "Execution complete"
    );

    Ok(())
}
