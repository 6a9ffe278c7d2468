//! Retrieving feed documents over HTTP, with retry and backoff.
//!
//! # Architecture
//!
//! - [`FetchAsync`]: core trait, one feed in, one document out
//! - [`HttpFetcher`]: `reqwest` implementation with a hard timeout
//! - [`RetryFetch`]: decorator that retries transient failures of any
//!   [`FetchAsync`] implementation
//!
//! # Retry Strategy
//!
//! Only transport errors and 5xx responses are retried. Timeouts, 4xx
//! responses and non-feed bodies fail immediately.
//!
//! - Exponential backoff from `base_delay`, capped at 10 seconds
//! - Random jitter (0-250ms) added to every delay
//! - With a budget set, attempts and backoff together never outlast it: a
//!   retry that would not fit is not started, and a running attempt is cut
//!   off when the budget runs out

use crate::config::FeedSource;
use crate::feeds::split::looks_like_feed;
use crate::utils::truncate_for_log;
use rand::{Rng, rng};
use reqwest::header::{ACCEPT, HeaderMap, HeaderValue};
use std::fmt;
use std::time::{Duration as StdDuration, Instant};
use tokio::time::{sleep, timeout};
use tracing::{debug, error, instrument, warn};

const ACCEPT_FEEDS: &str =
    "application/rss+xml, application/atom+xml, application/xml;q=0.9, text/xml;q=0.9, */*;q=0.8";

/// Why a feed could not be retrieved.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("timed out after {0:?}")]
    Timeout(StdDuration),
    #[error("unexpected status code: {0}")]
    HttpStatus(u16),
    #[error("response is not an RSS or Atom document")]
    NotAFeed,
    #[error("request failed: {0}")]
    Request(#[source] reqwest::Error),
}

impl FetchError {
    /// Transport hiccups and server-side errors may go away on their own.
    pub fn is_retryable(&self) -> bool {
        match self {
            FetchError::Request(_) => true,
            FetchError::HttpStatus(code) => *code >= 500,
            FetchError::Timeout(_) | FetchError::NotAFeed => false,
        }
    }

    /// Everything except a well-delivered non-feed body.
    pub fn is_network_fault(&self) -> bool {
        !matches!(self, FetchError::NotAFeed)
    }
}

/// Trait for retrieving one feed's raw document.
pub trait FetchAsync {
    async fn fetch(&self, source: &FeedSource) -> Result<String, FetchError>;
}

/// Plain HTTP fetcher.
///
/// The timeout is set on the client, so an expired request is dropped
/// together with its connection instead of being left to finish in the
/// background.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
    timeout: StdDuration,
}

impl HttpFetcher {
    /// Build a fetcher identifying itself as `user_agent`.
    ///
    /// # Arguments
    ///
    /// * `user_agent` - Sent as the `User-Agent` header on every request
    /// * `timeout` - Bound on one request, from connect to the last body byte
    ///
    /// # Returns
    ///
    /// The fetcher, or the `reqwest` error when the client cannot be built
    /// (an invalid header value or no TLS backend).
    pub fn new(user_agent: &str, timeout: StdDuration) -> Result<Self, reqwest::Error> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static(ACCEPT_FEEDS));
        let client = reqwest::Client::builder()
            .user_agent(user_agent)
            .default_headers(headers)
            .timeout(timeout)
            .build()?;
        Ok(Self { client, timeout })
    }

    fn classify(&self, e: reqwest::Error) -> FetchError {
        if e.is_timeout() {
            FetchError::Timeout(self.timeout)
        } else {
            FetchError::Request(e)
        }
    }
}

impl FetchAsync for HttpFetcher {
    #[instrument(level = "debug", skip_all, fields(feed = %source.name, url = %source.url))]
    async fn fetch(&self, source: &FeedSource) -> Result<String, FetchError> {
        let response = self
            .client
            .get(&source.url)
            .send()
            .await
            .map_err(|e| self.classify(e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::HttpStatus(status.as_u16()));
        }

        let body = response.text().await.map_err(|e| self.classify(e))?;
        if !looks_like_feed(&body) {
            debug!(preview = %truncate_for_log(&body, 200), "Body has no feed root element");
            return Err(FetchError::NotAFeed);
        }
        debug!(bytes = body.len(), "Fetched feed document");
        Ok(body)
    }
}

/// Wrapper that adds exponential backoff retry logic to any [`FetchAsync`]
/// implementation.
///
/// ```text
/// delay = min(base_delay * 2^(attempt-1), max_delay) + random_jitter(0..250ms)
/// ```
pub struct RetryFetch<T> {
    inner: T,
    max_retries: usize,
    base_delay: StdDuration,
    max_delay: StdDuration,
    budget: Option<StdDuration>,
}

impl<T> RetryFetch<T>
where
    T: FetchAsync,
{
    /// Wrap `inner`, allowing up to `max_retries` extra attempts per feed.
    pub fn new(inner: T, max_retries: usize, base_delay: StdDuration) -> Self {
        Self {
            inner,
            max_retries,
            base_delay,
            max_delay: StdDuration::from_secs(10),
            budget: None,
        }
    }

    /// Bound the whole fetch, retries and backoff included, by `budget`.
    pub fn with_budget(mut self, budget: StdDuration) -> Self {
        self.budget = Some(budget);
        self
    }

    async fn attempt(&self, source: &FeedSource, started: Instant) -> Result<String, FetchError> {
        match self.budget {
            Some(budget) => {
                let remaining = budget.saturating_sub(started.elapsed());
                timeout(remaining, self.inner.fetch(source))
                    .await
                    .unwrap_or(Err(FetchError::Timeout(budget)))
            }
            None => self.inner.fetch(source).await,
        }
    }
}

impl<T> fmt::Debug for RetryFetch<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryFetch")
            .field("max_retries", &self.max_retries)
            .field("base_delay", &self.base_delay)
            .field("max_delay", &self.max_delay)
            .field("budget", &self.budget)
            .finish()
    }
}

impl<T> FetchAsync for RetryFetch<T>
where
    T: FetchAsync,
{
    async fn fetch(&self, source: &FeedSource) -> Result<String, FetchError> {
        let total_t0 = Instant::now();
        let mut attempt = 0usize;

        loop {
            let attempt_t0 = Instant::now();
            match self.attempt(source, total_t0).await {
                Ok(body) => return Ok(body),
                Err(e) if !e.is_retryable() => return Err(e),
                Err(e) => {
                    attempt += 1;
                    let attempt_dt = attempt_t0.elapsed();
                    let total_dt = total_t0.elapsed();

                    if attempt > self.max_retries {
                        error!(
                            feed = %source.name,
                            attempt,
                            max = self.max_retries,
                            elapsed_ms_total = total_dt.as_millis(),
                            error = %e,
                            "fetch() exhausted retries"
                        );
                        return Err(e);
                    }

                    let mut delay = self.base_delay.saturating_mul(1 << (attempt - 1).min(16));
                    if delay > self.max_delay {
                        delay = self.max_delay;
                    }
                    let jitter_ms: u64 = rng().random_range(0..=250);
                    let delay = delay + StdDuration::from_millis(jitter_ms);

                    if self.budget.is_some_and(|budget| total_dt + delay >= budget) {
                        warn!(
                            feed = %source.name,
                            attempt,
                            elapsed_ms_total = total_dt.as_millis(),
                            error = %e,
                            "fetch() budget spent; not retrying"
                        );
                        return Err(e);
                    }

                    warn!(
                        feed = %source.name,
                        attempt,
                        max = self.max_retries,
                        elapsed_ms_attempt = attempt_dt.as_millis(),
                        ?delay,
                        error = %e,
                        "fetch() attempt failed; backing off"
                    );
                    sleep(delay).await;
                }
            }
        }
    }
}
