//! Feed list and run settings.
//!
//! The configuration file is parsed with `serde_yaml`, so both YAML and JSON
//! documents are accepted:
//!
//! ```yaml
//! feeds:
//!   - https://blog.rust-lang.org/feed.xml
//!   - name: Heise
//!     url: https://www.heise.de/rss/heise-atom.xml
//!     language: de
//! tags: [rust, linux, security]
//! max_items: 500
//! ```
//!
//! Bare URL entries are named after their host and default to English.

use crate::utils::host_of;
use reqwest::header::HeaderValue;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;
use tracing::{info, instrument};

pub const DEFAULT_LANGUAGE: &str = "en";
pub const DEFAULT_MAX_ITEMS: usize = 500;
pub const DEFAULT_SUMMARY_MAX_CHARS: usize = 300;
pub const DEFAULT_MAX_TAGS: usize = 8;
pub const DEFAULT_TIMEOUT_SECS: u64 = 15;
pub const DEFAULT_PACING_MS: u64 = 300;
pub const DEFAULT_CONCURRENCY: usize = 4;
pub const DEFAULT_MAX_RETRIES: usize = 1;

/// Errors raised while loading the configuration. All of them are fatal.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read config {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("cannot parse config: {0}")]
    Syntax(#[from] serde_yaml::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// One configured feed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedSource {
    /// Configured name, or the feed host when none was given.
    pub name: String,
    pub url: String,
    pub language: String,
    /// `false` when `name` is only the host fallback; the document's own
    /// title then takes precedence.
    pub named_in_config: bool,
}

/// Which [`Translator`](crate::translate::Translator) the run uses.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TranslatorKind {
    #[default]
    Passthrough,
}

/// Tuning knobs; every key is optional in the file.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Upper bound on items kept in the snapshot.
    pub max_items: usize,
    /// Summaries are cut to this many characters.
    pub summary_max_chars: usize,
    /// Upper bound on tags per article.
    pub max_tags: usize,
    /// Per-request wait bound.
    pub timeout_secs: u64,
    /// Minimum gap between two request starts.
    pub pacing_ms: u64,
    /// Feeds fetched at once. `1` processes feeds strictly in sequence.
    pub concurrency: usize,
    /// Extra attempts for transport failures and 5xx responses.
    pub max_retries: usize,
    pub user_agent: String,
    pub translator: TranslatorKind,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            max_items: DEFAULT_MAX_ITEMS,
            summary_max_chars: DEFAULT_SUMMARY_MAX_CHARS,
            max_tags: DEFAULT_MAX_TAGS,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            pacing_ms: DEFAULT_PACING_MS,
            concurrency: DEFAULT_CONCURRENCY,
            max_retries: DEFAULT_MAX_RETRIES,
            user_agent: format!("{}/{}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION")),
            translator: TranslatorKind::default(),
        }
    }
}

impl Settings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn pacing(&self) -> Duration {
        Duration::from_millis(self.pacing_ms)
    }
}

/// A fully resolved configuration.
#[derive(Debug, Clone, Default)]
pub struct Config {
    pub feeds: Vec<FeedSource>,
    pub tags: Vec<String>,
    pub settings: Settings,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum FeedEntry {
    Url(String),
    Detailed {
        name: Option<String>,
        url: String,
        #[serde(alias = "lang")]
        language: Option<String>,
    },
}

#[derive(Debug, Deserialize)]
struct ConfigFile {
    #[serde(default)]
    feeds: Vec<FeedEntry>,
    #[serde(default)]
    tags: Vec<String>,
    #[serde(flatten)]
    settings: Settings,
}

impl FeedEntry {
    fn into_source(self) -> Result<FeedSource, ConfigError> {
        let (name, url, language) = match self {
            FeedEntry::Url(url) => (None, url, None),
            FeedEntry::Detailed {
                name,
                url,
                language,
            } => (name, url, language),
        };

        let url = url.trim().to_string();
        if url.is_empty() {
            return Err(ConfigError::Invalid("feed entry with an empty url".into()));
        }

        let configured = name
            .map(|n| n.trim().to_string())
            .filter(|n| !n.is_empty());
        let named_in_config = configured.is_some();
        let name = configured
            .or_else(|| host_of(&url))
            .unwrap_or_else(|| url.clone());
        let language = language
            .map(|l| l.trim().to_string())
            .filter(|l| !l.is_empty())
            .unwrap_or_else(|| DEFAULT_LANGUAGE.to_string());

        Ok(FeedSource {
            name,
            url,
            language,
            named_in_config,
        })
    }
}

/// Parse a configuration document (YAML or JSON).
pub fn parse_config(text: &str) -> Result<Config, ConfigError> {
    let file: ConfigFile = serde_yaml::from_str(text)?;

    let feeds = file
        .feeds
        .into_iter()
        .map(FeedEntry::into_source)
        .collect::<Result<Vec<_>, _>>()?;

    if file.settings.concurrency == 0 {
        return Err(ConfigError::Invalid("concurrency must be at least 1".into()));
    }
    if file.settings.timeout_secs == 0 {
        return Err(ConfigError::Invalid("timeout_secs must be at least 1".into()));
    }
    if HeaderValue::from_str(&file.settings.user_agent).is_err() {
        return Err(ConfigError::Invalid(
            "user_agent is not a valid HTTP header value".into(),
        ));
    }

    let tags = file
        .tags
        .into_iter()
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .collect();

    Ok(Config {
        feeds,
        tags,
        settings: file.settings,
    })
}

/// Read and parse the configuration file at `path`.
///
/// # Errors
///
/// [`ConfigError::Read`] when the file cannot be read, otherwise whatever
/// [`parse_config`] reports.
#[instrument(level = "info", skip_all, fields(path = %path.display()))]
pub async fn load_config(path: &Path) -> Result<Config, ConfigError> {
    let text = fs::read_to_string(path)
        .await
        .map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
    let config = parse_config(&text)?;
    info!(
        feeds = config.feeds.len(),
        tags = config.tags.len(),
        "Loaded configuration"
    );
    Ok(config)
}
