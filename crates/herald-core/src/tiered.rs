//! Tiered content extraction with fixed-priority fallback.
//!
//! Each [`ExtractionStrategy`] is one tier. [`TieredExtractor`] tries them in
//! list order and stops at the first tier whose content clears the minimum
//! length. Short content and tier errors are soft: they only move the item
//! to the next tier.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use futures::FutureExt;
use futures::future::BoxFuture;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::config::{Selectors, SourceConfig};
use crate::error::AppError;
use crate::models::{DiscoveredItem, ExtractionResult, ExtractionTier};
use crate::retry::RetryPolicy;
use crate::session_pool::SessionPool;
use crate::traits::{AutomationEngine, ContentParser, FetchOptions, Fetcher};

/// One tier of the extraction chain.
pub trait ExtractionStrategy: Send + Sync {
    fn tier(&self) -> ExtractionTier;

    /// Produce text for `item`. Errors are treated as a tier failure.
    fn attempt<'a>(
        &'a self,
        item: &'a DiscoveredItem,
        source: &'a SourceConfig,
        cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, Result<String, AppError>>;
}

/// Attempt/success counters for one tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TierStats {
    pub tier: ExtractionTier,
    pub attempts: u64,
    pub successes: u64,
}

#[derive(Default)]
struct TierCounter {
    attempts: AtomicU64,
    successes: AtomicU64,
}

/// Ordered fallback chain over extraction strategies.
pub struct TieredExtractor {
    strategies: Vec<(Box<dyn ExtractionStrategy>, TierCounter)>,
    min_content_len: usize,
}

impl TieredExtractor {
    pub fn new(min_content_len: usize) -> Self {
        Self {
            strategies: Vec::new(),
            min_content_len,
        }
    }

    /// Append a strategy at the lowest priority.
    pub fn with_strategy(mut self, strategy: impl ExtractionStrategy + 'static) -> Self {
        self.strategies
            .push((Box::new(strategy), TierCounter::default()));
        self
    }

    pub fn tiers(&self) -> Vec<ExtractionTier> {
        self.strategies.iter().map(|(s, _)| s.tier()).collect()
    }

    pub fn tier_stats(&self) -> Vec<TierStats> {
        self.strategies
            .iter()
            .map(|(s, c)| TierStats {
                tier: s.tier(),
                attempts: c.attempts.load(Ordering::Relaxed),
                successes: c.successes.load(Ordering::Relaxed),
            })
            .collect()
    }

    /// Run the chain for one item. Never returns an error; a total failure
    /// is reported through the result.
    pub async fn extract(
        &self,
        item: &DiscoveredItem,
        source: &SourceConfig,
        cancel: &CancellationToken,
    ) -> ExtractionResult {
        let started = Instant::now();
        let mut failures: Vec<String> = Vec::new();

        for (strategy, counter) in &self.strategies {
            let tier = strategy.tier();
            if !source.allows_tier(tier) {
                continue;
            }
            if cancel.is_cancelled() {
                return ExtractionResult::failed(AppError::Cancelled.to_string(), started.elapsed());
            }

            counter.attempts.fetch_add(1, Ordering::Relaxed);
            let tier_started = Instant::now();

            let outcome = strategy
                .attempt(item, source, cancel)
                .await
                .and_then(|content| self.check_length(content));

            match outcome {
                Ok(content) => {
                    counter.successes.fetch_add(1, Ordering::Relaxed);
                    tracing::debug!(
                        source = %source.name,
                        url = %item.url(),
                        %tier,
                        chars = content.chars().count(),
                        elapsed_ms = tier_started.elapsed().as_millis() as u64,
                        "Tier succeeded"
                    );
                    return ExtractionResult::succeeded(tier, content, started.elapsed());
                }
                Err(AppError::Cancelled) => {
                    return ExtractionResult::failed(
                        AppError::Cancelled.to_string(),
                        started.elapsed(),
                    );
                }
                Err(e) => {
                    if e.is_soft() {
                        tracing::debug!(source = %source.name, url = %item.url(), %tier, error = %e, "Tier fell through");
                    } else {
                        tracing::warn!(source = %source.name, url = %item.url(), %tier, error = %e, "Tier failed");
                    }
                    failures.push(format!("{tier}: {e}"));
                }
            }
        }

        let error = if failures.is_empty() {
            AppError::AllTiersFailed(format!("no extraction tier enabled for '{}'", source.name))
        } else {
            AppError::AllTiersFailed(failures.join("; "))
        };
        ExtractionResult::failed(error.to_string(), started.elapsed())
    }

    fn check_length(&self, content: String) -> Result<String, AppError> {
        let trimmed = content.trim();
        let length = trimmed.chars().count();
        if length < self.min_content_len {
            return Err(AppError::ContentTooShort {
                length,
                minimum: self.min_content_len,
            });
        }
        Ok(trimmed.to_string())
    }
}

// ---------------------------------------------------------------------------
// Tier 1: headless browser through the session pool
// ---------------------------------------------------------------------------

/// Renders the item URL in a pooled browser session.
pub struct AutomationTier<E: AutomationEngine, P> {
    pool: Arc<SessionPool<E>>,
    retry: RetryPolicy,
    parser: P,
}

impl<E: AutomationEngine, P: ContentParser> AutomationTier<E, P> {
    pub fn new(pool: Arc<SessionPool<E>>, retry: RetryPolicy, parser: P) -> Self {
        Self {
            pool,
            retry,
            parser,
        }
    }

    async fn run(
        &self,
        item: &DiscoveredItem,
        source: &SourceConfig,
        cancel: &CancellationToken,
    ) -> Result<String, AppError> {
        let lease = self.pool.acquire(&source.name, cancel).await?;
        let engine = self.pool.engine();
        let url = item.url();

        let fetched = self
            .retry
            .execute(
                |timeout| {
                    let options = FetchOptions::new(timeout).with_headers(source.headers.clone());
                    let handle = lease.handle.clone();
                    async move { engine.fetch(&handle, url, &options).await }
                },
                cancel,
            )
            .await;
        drop(lease);
        self.pool.release_if_expired(&source.name).await;

        self.parser.parse(&fetched?, &source.selectors)
    }
}

impl<E: AutomationEngine, P: ContentParser> ExtractionStrategy for AutomationTier<E, P> {
    fn tier(&self) -> ExtractionTier {
        ExtractionTier::Automation
    }

    fn attempt<'a>(
        &'a self,
        item: &'a DiscoveredItem,
        source: &'a SourceConfig,
        cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, Result<String, AppError>> {
        self.run(item, source, cancel).boxed()
    }
}

// ---------------------------------------------------------------------------
// Tier 2: plain HTTP fetch + selector parse
// ---------------------------------------------------------------------------

/// Fetches the item URL over HTTP and parses it with the source's selectors.
pub struct LightweightTier<F, P> {
    fetcher: F,
    parser: P,
    retry_delay: Duration,
}

impl<F: Fetcher, P: ContentParser> LightweightTier<F, P> {
    pub fn new(fetcher: F, parser: P) -> Self {
        Self {
            fetcher,
            parser,
            retry_delay: Duration::ZERO,
        }
    }

    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    fn policy(&self, source: &SourceConfig) -> RetryPolicy {
        RetryPolicy::new(source.lightweight_schedule()).with_delay(self.retry_delay)
    }

    async fn run(
        &self,
        item: &DiscoveredItem,
        source: &SourceConfig,
        cancel: &CancellationToken,
    ) -> Result<String, AppError> {
        let url = item.url();
        let html = self
            .policy(source)
            .execute(|_| self.fetcher.fetch(url), cancel)
            .await?;
        self.parser.parse(&html, &source.selectors)
    }
}

impl<F: Fetcher, P: ContentParser> ExtractionStrategy for LightweightTier<F, P> {
    fn tier(&self) -> ExtractionTier {
        ExtractionTier::LightweightFetch
    }

    fn attempt<'a>(
        &'a self,
        item: &'a DiscoveredItem,
        source: &'a SourceConfig,
        cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, Result<String, AppError>> {
        self.run(item, source, cancel).boxed()
    }
}

// ---------------------------------------------------------------------------
// Tier 3: summary carried by the feed entry
// ---------------------------------------------------------------------------

/// Uses the feed-supplied summary as the article body.
pub struct FeedFallbackTier<P> {
    parser: P,
}

impl<P: ContentParser> FeedFallbackTier<P> {
    pub fn new(parser: P) -> Self {
        Self { parser }
    }

    fn run(&self, item: &DiscoveredItem) -> Result<String, AppError> {
        let summary = item
            .entry
            .summary
            .as_deref()
            .filter(|s| !s.trim().is_empty())
            .ok_or_else(|| AppError::ParseError("feed entry has no summary".into()))?;

        if summary.contains('<') {
            self.parser.parse(summary, &Selectors::default())
        } else {
            Ok(summary.to_string())
        }
    }
}

impl<P: ContentParser> ExtractionStrategy for FeedFallbackTier<P> {
    fn tier(&self) -> ExtractionTier {
        ExtractionTier::FeedFallback
    }

    fn attempt<'a>(
        &'a self,
        item: &'a DiscoveredItem,
        _source: &'a SourceConfig,
        _cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, Result<String, AppError>> {
        let result = self.run(item);
        async move { result }.boxed()
    }
}

/// Build the default three-tier chain.
pub fn default_chain<E, F, P>(
    pool: Arc<SessionPool<E>>,
    automation_retry: RetryPolicy,
    fetcher: F,
    parser: P,
    min_content_len: usize,
) -> TieredExtractor
where
    E: AutomationEngine,
    F: Fetcher,
    P: ContentParser,
{
    let retry_delay = automation_retry.delay_between();
    TieredExtractor::new(min_content_len)
        .with_strategy(AutomationTier::new(pool, automation_retry, parser.clone()))
        .with_strategy(LightweightTier::new(fetcher, parser.clone()).with_retry_delay(retry_delay))
        .with_strategy(FeedFallbackTier::new(parser))
}
