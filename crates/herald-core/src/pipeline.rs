use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::SourceConfig;
use crate::error::AppError;
use crate::models::{DiscoveredItem, ExtractionTier, FeedEntry, NewArticle, RunStatistics};
use crate::rate_limit::RateLimiter;
use crate::retry::RetryPolicy;
use crate::seen::SeenTracker;
use crate::tiered::TieredExtractor;
use crate::traits::{ArticleStore, ContentCleaner, ItemDiscovery, SeenStore};

/// Stage at which an item was dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureStage {
    Extract,
    Clean,
    Store,
}

impl fmt::Display for FailureStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FailureStage::Extract => "extract",
            FailureStage::Clean => "clean",
            FailureStage::Store => "store",
        };
        f.write_str(s)
    }
}

/// Events emitted by the pipeline for monitoring/logging.
#[derive(Debug, Clone)]
pub enum PipelineEvent<'a> {
    RunStarted {
        source: &'a str,
        run_id: Uuid,
    },
    Discovered {
        source: &'a str,
        available: usize,
        taken: usize,
    },
    DiscoveryFailed {
        source: &'a str,
        error: &'a str,
    },
    ItemSkipped {
        source: &'a str,
        item_id: &'a str,
    },
    ItemProcessed {
        source: &'a str,
        url: &'a str,
        tier: ExtractionTier,
    },
    ItemFailed {
        source: &'a str,
        url: &'a str,
        stage: FailureStage,
        error: &'a str,
    },
    Cancelled {
        source: &'a str,
        remaining: usize,
    },
    RunFinished {
        stats: &'a RunStatistics,
    },
}

/// Trait for receiving pipeline events (decoupled logging).
pub trait PipelineReporter: Send + Sync {
    fn report(&self, event: PipelineEvent<'_>) {
        let _ = event;
    }
}

/// Reporter that uses the `tracing` crate.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingPipelineReporter;

impl PipelineReporter for TracingPipelineReporter {
    fn report(&self, event: PipelineEvent<'_>) {
        match event {
            PipelineEvent::RunStarted { source, run_id } => {
                tracing::info!(%source, %run_id, "Run started");
            }
            PipelineEvent::Discovered {
                source,
                available,
                taken,
            } => {
                tracing::info!(%source, %available, %taken, "Items discovered");
            }
            PipelineEvent::DiscoveryFailed { source, error } => {
                tracing::error!(%source, %error, "Discovery failed");
            }
            PipelineEvent::ItemSkipped { source, item_id } => {
                tracing::debug!(%source, %item_id, "Already seen, skipping");
            }
            PipelineEvent::ItemProcessed { source, url, tier } => {
                tracing::info!(%source, %url, %tier, "Item stored");
            }
            PipelineEvent::ItemFailed {
                source,
                url,
                stage,
                error,
            } => {
                tracing::warn!(%source, %url, %stage, %error, "Item failed");
            }
            PipelineEvent::Cancelled { source, remaining } => {
                tracing::warn!(%source, %remaining, "Run cancelled");
            }
            PipelineEvent::RunFinished { stats } => {
                tracing::info!(
                    source = %stats.source,
                    run_id = %stats.run_id,
                    discovered = stats.discovered,
                    processed = stats.processed,
                    skipped = stats.skipped,
                    failed = stats.failed,
                    success_rate = %format!("{:.1}%", stats.success_rate()),
                    duration_ms = stats.duration.as_millis() as u64,
                    "Run finished"
                );
            }
        }
    }
}

/// Per-source batch processor: discover, dedup, extract, clean, store.
pub struct ProcessingPipeline<D, C, S, T>
where
    D: ItemDiscovery,
    C: ContentCleaner,
    S: ArticleStore,
    T: SeenStore,
{
    discovery: D,
    extractor: Arc<TieredExtractor>,
    cleaner: C,
    store: S,
    seen: Arc<SeenTracker<T>>,
    limiter: RateLimiter,
    auto_flush: Duration,
    retry_delay: Duration,
}

impl<D, C, S, T> ProcessingPipeline<D, C, S, T>
where
    D: ItemDiscovery,
    C: ContentCleaner,
    S: ArticleStore,
    T: SeenStore,
{
    pub fn new(
        discovery: D,
        extractor: Arc<TieredExtractor>,
        cleaner: C,
        store: S,
        seen: Arc<SeenTracker<T>>,
        limiter: RateLimiter,
    ) -> Self {
        Self {
            discovery,
            extractor,
            cleaner,
            store,
            seen,
            limiter,
            auto_flush: Duration::from_secs(5 * 60),
            retry_delay: Duration::ZERO,
        }
    }

    pub fn with_auto_flush(mut self, interval: Duration) -> Self {
        self.auto_flush = interval;
        self
    }

    /// Pause between discovery attempts.
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    pub fn extractor(&self) -> &TieredExtractor {
        &self.extractor
    }

    pub fn seen(&self) -> &SeenTracker<T> {
        &self.seen
    }

    /// Process one source. Always returns statistics, whatever failed.
    pub async fn run<R: PipelineReporter>(
        &self,
        source: &SourceConfig,
        cancel: &CancellationToken,
        reporter: &R,
    ) -> RunStatistics {
        let started = Instant::now();
        let mut stats = RunStatistics::new(&source.name);
        reporter.report(PipelineEvent::RunStarted {
            source: &source.name,
            run_id: stats.run_id,
        });

        self.limiter
            .set_interval(&source.name, source.rate_limit())
            .await;

        let entries = match self.discover(source, cancel).await {
            Ok(entries) => entries,
            Err(AppError::Cancelled) => {
                reporter.report(PipelineEvent::Cancelled {
                    source: &source.name,
                    remaining: 0,
                });
                stats.errors.push(AppError::Cancelled.to_string());
                return self.finish(stats, started, reporter).await;
            }
            Err(e) => {
                let error = e.to_string();
                reporter.report(PipelineEvent::DiscoveryFailed {
                    source: &source.name,
                    error: &error,
                });
                stats.errors.push(error);
                return self.finish(stats, started, reporter).await;
            }
        };

        let available = entries.len();
        let items: Vec<DiscoveredItem> = entries
            .into_iter()
            .take(source.max_articles_per_run)
            .map(|entry| DiscoveredItem::new(&source.name, entry))
            .collect();
        stats.discovered = items.len() as u64;
        reporter.report(PipelineEvent::Discovered {
            source: &source.name,
            available,
            taken: items.len(),
        });

        for (idx, item) in items.iter().enumerate() {
            if cancel.is_cancelled() {
                self.report_cancel(&mut stats, source, items.len() - idx, reporter);
                break;
            }

            if self.seen.is_seen(&item.id) {
                stats.skipped += 1;
                reporter.report(PipelineEvent::ItemSkipped {
                    source: &source.name,
                    item_id: &item.id,
                });
                continue;
            }

            if self
                .limiter
                .wait_cancellable(&source.name, cancel)
                .await
                .is_err()
            {
                self.report_cancel(&mut stats, source, items.len() - idx, reporter);
                break;
            }

            match self.process_item(item, source, cancel).await {
                Ok(tier) => {
                    self.seen.mark_seen(&item.id);
                    stats.processed += 1;
                    stats.record_tier_success(tier);
                    reporter.report(PipelineEvent::ItemProcessed {
                        source: &source.name,
                        url: item.url(),
                        tier,
                    });
                }
                // Interrupted items are neither failed nor seen.
                Err(_) if cancel.is_cancelled() => {
                    self.report_cancel(&mut stats, source, items.len() - idx, reporter);
                    break;
                }
                Err((stage, error)) => {
                    stats.failed += 1;
                    reporter.report(PipelineEvent::ItemFailed {
                        source: &source.name,
                        url: item.url(),
                        stage,
                        error: &error,
                    });
                }
            }
        }

        self.finish(stats, started, reporter).await
    }

    async fn discover(
        &self,
        source: &SourceConfig,
        cancel: &CancellationToken,
    ) -> Result<Vec<FeedEntry>, AppError> {
        self.limiter.wait_cancellable(&source.name, cancel).await?;
        RetryPolicy::new(source.lightweight_schedule())
            .with_delay(self.retry_delay)
            .execute(|_| self.discovery.discover(source), cancel)
            .await
    }

    async fn process_item(
        &self,
        item: &DiscoveredItem,
        source: &SourceConfig,
        cancel: &CancellationToken,
    ) -> Result<ExtractionTier, (FailureStage, String)> {
        let result = self.extractor.extract(item, source, cancel).await;
        let (tier, content) = match (result.success, result.tier, result.content) {
            (true, Some(tier), Some(content)) => (tier, content),
            _ => {
                return Err((
                    FailureStage::Extract,
                    result.error.unwrap_or_else(|| "extraction failed".into()),
                ));
            }
        };

        let cleaned = self
            .cleaner
            .clean(&content, &source.name, item.url())
            .await
            .map_err(|e| (FailureStage::Clean, e.to_string()))?;

        let article = NewArticle::from_parts(item, tier, cleaned);
        self.store
            .store(&article)
            .await
            .map_err(|e| (FailureStage::Store, e.to_string()))?;

        Ok(tier)
    }

    fn report_cancel<R: PipelineReporter>(
        &self,
        stats: &mut RunStatistics,
        source: &SourceConfig,
        remaining: usize,
        reporter: &R,
    ) {
        stats.errors.push(format!(
            "{} ({remaining} item(s) not processed)",
            AppError::Cancelled
        ));
        reporter.report(PipelineEvent::Cancelled {
            source: &source.name,
            remaining,
        });
    }

    async fn finish<R: PipelineReporter>(
        &self,
        mut stats: RunStatistics,
        started: Instant,
        reporter: &R,
    ) -> RunStatistics {
        stats.duration = started.elapsed();
        self.seen.auto_flush(self.auto_flush).await;
        reporter.report(PipelineEvent::RunFinished { stats: &stats });
        stats
    }
}
