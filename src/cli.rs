//! Command-line interface definitions for Feed Digest.
//!
//! Every option has a default or an environment variable, so a scheduler
//! can invoke the binary with no arguments at all.

use clap::Parser;
use std::path::PathBuf;

/// Command-line arguments for the Feed Digest application.
///
/// # Examples
///
/// ```sh
/// # Defaults: ./feeds.json in, ./public/news.json out
/// feed_digest
///
/// # Explicit paths and a smaller snapshot
/// feed_digest -c /etc/feed_digest/feeds.yaml -o /srv/www/news.json --max-items 200
///
/// # Rebuild from this run only, ignoring the previous snapshot
/// feed_digest --stateless
/// ```
#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct Cli {
    /// Feed list and settings (YAML or JSON)
    #[arg(short, long, env = "FEED_DIGEST_CONFIG", default_value = "feeds.json")]
    pub config: PathBuf,

    /// Snapshot file, read as the previous run and then overwritten
    #[arg(short, long, env = "FEED_DIGEST_OUTPUT", default_value = "public/news.json")]
    pub output: PathBuf,

    /// Override `max_items` from the config file
    #[arg(long, env = "FEED_DIGEST_MAX_ITEMS")]
    pub max_items: Option<usize>,

    /// Ignore the previous snapshot and keep only this run's articles
    #[arg(long)]
    pub stateless: bool,
}
