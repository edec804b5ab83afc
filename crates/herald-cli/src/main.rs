use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use futures::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use herald_client::{
    BasicCleaner, ConfiguredCleaner, HttpFetcher, OpenAiCleaner, ScraperParser, SourceDiscovery,
    TokenUsage,
};
use herald_core::config::{CrawlerConfig, CrawlerSettings, SourceConfig};
use herald_core::error::AppError;
use herald_core::models::RunStatistics;
use herald_core::pipeline::{ProcessingPipeline, TracingPipelineReporter};
use herald_core::rate_limit::{RateLimitConfig, RateLimiter};
use herald_core::seen::{JsonFileSeenStore, SeenTracker};
use herald_core::tiered::{FeedFallbackTier, LightweightTier, TieredExtractor};
use herald_core::traits::{ArticleStore, LogStore};
use herald_db::{Database, DatabaseConfig};

#[cfg(feature = "browser")]
use herald_client::{ChromiumEngine, MarkdownParser};
#[cfg(feature = "browser")]
use herald_core::retry::RetryPolicy;
#[cfg(feature = "browser")]
use herald_core::session_pool::{SessionPolicy, SessionPool, SessionProfile};
#[cfg(feature = "browser")]
use herald_core::tiered::AutomationTier;

#[derive(Parser)]
#[command(name = "herald", version, about = "Tiered news crawler")]
struct Cli {
    /// Path to the YAML sources file
    #[arg(
        short,
        long,
        global = true,
        env = "HERALD_CONFIG",
        default_value = "config/sources.yaml"
    )]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Crawl enabled sources, repeating every cycle until interrupted
    Crawl {
        /// Run a single cycle and exit
        #[arg(long, default_value_t = false)]
        once: bool,

        /// Only crawl the source with this name
        #[arg(short, long)]
        source: Option<String>,

        /// Log articles instead of storing them (no database needed)
        #[arg(long, default_value_t = false)]
        dry_run: bool,

        /// API key for LLM cleaning (basic cleaning is used without one)
        #[arg(long, env = "HERALD_API_KEY", hide_env_values = true)]
        api_key: Option<String>,

        /// LLM model used for cleaning
        #[arg(short, long, env = "HERALD_MODEL", default_value = "gpt-4o-mini")]
        model: String,

        /// OpenAI-compatible API base URL
        #[arg(
            short,
            long,
            env = "HERALD_BASE_URL",
            default_value = "https://api.openai.com/v1"
        )]
        base_url: String,
    },

    /// Validate the configuration file and list its sources
    CheckConfig,

    /// Inspect or reset the seen-item store
    Seen {
        #[command(subcommand)]
        action: SeenAction,
    },

    /// List recently stored articles
    Articles {
        /// Only show articles from this source
        #[arg(short, long)]
        source: Option<String>,

        /// Number of articles to show
        #[arg(short, long, default_value_t = 20)]
        limit: usize,
    },
}

#[derive(Subcommand)]
enum SeenAction {
    /// Show how many items are recorded
    Stats,
    /// Forget every recorded item
    Clear,
}

struct CrawlOptions {
    once: bool,
    source: Option<String>,
    dry_run: bool,
    api_key: Option<String>,
    model: String,
    base_url: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("herald=info".parse()?))
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Crawl {
            once,
            source,
            dry_run,
            api_key,
            model,
            base_url,
        } => {
            let config = load_config(&cli.config)?;
            let opts = CrawlOptions {
                once,
                source,
                dry_run,
                api_key: api_key.filter(|k| !k.trim().is_empty()),
                model,
                base_url,
            };
            cmd_crawl(config, opts).await?;
        }
        Commands::CheckConfig => cmd_check_config(&cli.config)?,
        Commands::Seen { action } => {
            let config = load_config(&cli.config)?;
            cmd_seen(&config.crawler, action).await?;
        }
        Commands::Articles { source, limit } => cmd_articles(source.as_deref(), limit).await?,
    }

    Ok(())
}

fn load_config(path: &Path) -> Result<CrawlerConfig> {
    CrawlerConfig::from_path(path)
        .map_err(|e| anyhow::anyhow!(e))
        .with_context(|| format!("Invalid configuration in {}", path.display()))
}

/// Connect to PostgreSQL using DATABASE_URL and apply migrations.
async fn connect_db() -> Result<Database> {
    let config = DatabaseConfig::from_env().map_err(|e| anyhow::anyhow!(e))?;
    Database::connect_and_migrate(&config)
        .await
        .map_err(|e| anyhow::anyhow!(e))
        .context("Failed to open article database")
}

fn build_cleaner(settings: &CrawlerSettings, opts: &CrawlOptions) -> Result<ConfiguredCleaner> {
    if !settings.enable_llm_cleaning {
        return Ok(ConfiguredCleaner::Basic(BasicCleaner::new()));
    }
    match &opts.api_key {
        Some(key) => {
            let cleaner = OpenAiCleaner::with_base_url(key, &opts.model, &opts.base_url)
                .map_err(|e| anyhow::anyhow!(e))?;
            let cleaner = match settings.llm_token_budget {
                Some(limit) => cleaner.with_token_budget(limit),
                None => cleaner,
            };
            Ok(ConfiguredCleaner::Llm(cleaner))
        }
        None => {
            tracing::warn!("LLM cleaning enabled but HERALD_API_KEY is not set, using basic cleaner");
            Ok(ConfiguredCleaner::Basic(BasicCleaner::new()))
        }
    }
}

/// Shared state for every source in every cycle.
struct Crawler {
    settings: CrawlerSettings,
    cleaner: ConfiguredCleaner,
    seen: Arc<SeenTracker<JsonFileSeenStore>>,
    limiter: RateLimiter,
    #[cfg(feature = "browser")]
    pool: Arc<SessionPool<ChromiumEngine>>,
}

impl Crawler {
    fn new(
        settings: CrawlerSettings,
        cleaner: ConfiguredCleaner,
        seen: Arc<SeenTracker<JsonFileSeenStore>>,
    ) -> Self {
        Self {
            limiter: RateLimiter::new(RateLimitConfig::default()),
            #[cfg(feature = "browser")]
            pool: Arc::new(SessionPool::new(
                ChromiumEngine::new(),
                SessionProfile::default(),
                SessionPolicy {
                    max_usage: settings.session_max_usage,
                    max_lifetime: settings.session_max_lifetime(),
                },
            )),
            settings,
            cleaner,
            seen,
        }
    }

    fn extractor(&self, fetcher: HttpFetcher) -> TieredExtractor {
        let extractor = TieredExtractor::new(self.settings.min_content_length);

        #[cfg(feature = "browser")]
        let extractor = extractor.with_strategy(AutomationTier::new(
            self.pool.clone(),
            RetryPolicy::new(self.settings.automation_schedule())
                .with_delay(self.settings.retry_delay()),
            MarkdownParser::new(),
        ));

        extractor
            .with_strategy(
                LightweightTier::new(fetcher, ScraperParser::new())
                    .with_retry_delay(self.settings.retry_delay()),
            )
            .with_strategy(FeedFallbackTier::new(ScraperParser::new()))
    }

    fn pipeline<S: ArticleStore>(
        &self,
        source: &SourceConfig,
        store: S,
    ) -> Result<
        ProcessingPipeline<SourceDiscovery<HttpFetcher>, ConfiguredCleaner, S, JsonFileSeenStore>,
        AppError,
    > {
        let fetcher = HttpFetcher::with_headers(
            Duration::from_secs(source.timeout_seconds),
            &source.headers,
        )?;

        Ok(ProcessingPipeline::new(
            SourceDiscovery::new(fetcher.clone()),
            Arc::new(self.extractor(fetcher)),
            self.cleaner.clone(),
            store,
            self.seen.clone(),
            self.limiter.clone(),
        )
        .with_auto_flush(self.settings.auto_flush_interval())
        .with_retry_delay(self.settings.retry_delay()))
    }

    async fn run_source<S: ArticleStore>(
        &self,
        source: &SourceConfig,
        store: S,
        cancel: &CancellationToken,
    ) -> RunStatistics {
        match self.pipeline(source, store) {
            Ok(pipeline) => pipeline.run(source, cancel, &TracingPipelineReporter).await,
            Err(e) => {
                tracing::error!(source = %source.name, error = %e, "Failed to set up source");
                let mut stats = RunStatistics::new(&source.name);
                stats.errors.push(e.to_string());
                stats
            }
        }
    }

    async fn run_cycle<S: ArticleStore>(
        &self,
        sources: &[SourceConfig],
        store: &S,
        cancel: &CancellationToken,
    ) -> Vec<RunStatistics> {
        futures::stream::iter(sources)
            .map(|source| self.run_source(source, store.clone(), cancel))
            .buffer_unordered(self.settings.max_concurrent_sources.max(1))
            .collect()
            .await
    }

    async fn run<S: ArticleStore>(
        &self,
        sources: &[SourceConfig],
        store: S,
        cancel: &CancellationToken,
        once: bool,
    ) {
        let mut cycle = 0u64;
        loop {
            cycle += 1;
            tracing::info!(cycle, sources = sources.len(), "Starting crawl cycle");
            let results = self.run_cycle(sources, &store, cancel).await;
            print_summary(cycle, &results);
            if let Some(usage) = self.cleaner.token_usage() {
                print_token_usage(&usage);
            }

            #[cfg(feature = "browser")]
            {
                let closed = self.pool.cleanup_expired().await;
                if closed > 0 {
                    tracing::info!(closed, "Closed expired browser sessions");
                }
            }

            if once || cancel.is_cancelled() {
                break;
            }

            tracing::info!(
                secs = self.settings.cycle_interval_secs,
                "Waiting for next cycle"
            );
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.settings.cycle_interval()) => {}
            }
        }
    }

    /// Release sessions and persist the seen set.
    async fn shutdown(&self) {
        #[cfg(feature = "browser")]
        {
            let closed = self.pool.close_all().await;
            tracing::info!(closed, "Closed browser sessions");
        }
        if self.seen.store().is_read_only() {
            tracing::info!(count = self.seen.len(), "Dry run, seen items not saved");
        } else if self.seen.flush().await {
            tracing::info!(count = self.seen.len(), "Saved seen items");
        } else {
            tracing::error!("Final flush of seen items failed");
        }
    }
}

async fn cmd_crawl(config: CrawlerConfig, opts: CrawlOptions) -> Result<()> {
    let sources: Vec<SourceConfig> = config
        .enabled_sources(opts.source.as_deref())
        .into_iter()
        .cloned()
        .collect();
    if sources.is_empty() {
        match &opts.source {
            Some(name) => anyhow::bail!("No enabled source named '{name}'"),
            None => anyhow::bail!("No enabled sources in configuration"),
        }
    }

    let settings = config.crawler;
    let cleaner = build_cleaner(&settings, &opts)?;
    tracing::info!(
        cleaner = %cleaner.describe(),
        sources = sources.len(),
        browser = cfg!(feature = "browser"),
        "Starting crawler"
    );

    let mut store = JsonFileSeenStore::new(&settings.seen_file);
    if opts.dry_run {
        store = store.read_only();
    }
    let seen = Arc::new(SeenTracker::load(store).await);
    let crawler = Crawler::new(settings, cleaner, seen);

    let cancel = CancellationToken::new();
    let signal_token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupt received, stopping after current items");
            signal_token.cancel();
        }
    });

    let result = async {
        if opts.dry_run {
            crawler.run(&sources, LogStore, &cancel, opts.once).await;
        } else {
            let db = connect_db().await?;
            crawler
                .run(&sources, db.article_repo(), &cancel, opts.once)
                .await;
        }
        Ok::<(), anyhow::Error>(())
    }
    .await;

    crawler.shutdown().await;
    result
}

fn print_summary(cycle: u64, results: &[RunStatistics]) {
    println!("Cycle {cycle}:");
    for stats in results {
        let tiers = stats
            .tier_successes
            .iter()
            .map(|(tier, n)| format!("{tier}={n}"))
            .collect::<Vec<_>>()
            .join(" ");
        println!(
            "  {:<16} discovered={} processed={} skipped={} failed={} ({:.1}%) in {:.1}s {}",
            stats.source,
            stats.discovered,
            stats.processed,
            stats.skipped,
            stats.failed,
            stats.success_rate(),
            stats.duration.as_secs_f64(),
            tiers,
        );
        for error in &stats.errors {
            println!("    ! {error}");
        }
    }

    let processed: u64 = results.iter().map(|s| s.processed).sum();
    let failed: u64 = results.iter().map(|s| s.failed).sum();
    println!("  total: processed={processed} failed={failed}");
}

fn print_token_usage(usage: &TokenUsage) {
    let limit = usage
        .limit
        .map_or_else(|| "unlimited".to_string(), |l| l.to_string());
    println!(
        "  llm: tokens={} of {} requests={} refused={}",
        usage.total_tokens, limit, usage.requests, usage.refused
    );
}

fn cmd_check_config(path: &Path) -> Result<()> {
    let config = load_config(path)?;
    let enabled = config.enabled_sources(None).len();

    println!(
        "{}: OK ({} sources, {} enabled)",
        path.display(),
        config.sources.len(),
        enabled
    );
    for source in &config.sources {
        let tiers = match &source.tiers {
            Some(tiers) => tiers
                .iter()
                .map(|t| t.as_str())
                .collect::<Vec<_>>()
                .join(","),
            None => "all".to_string(),
        };
        println!(
            "  {} {:<16} {:?} max={} every {:.1}s tiers={} {}",
            if source.enabled { "+" } else { "-" },
            source.name,
            source.source_type,
            source.max_articles_per_run,
            source.rate_limit_seconds,
            tiers,
            source.url,
        );
    }
    Ok(())
}

async fn cmd_seen(settings: &CrawlerSettings, action: SeenAction) -> Result<()> {
    let path = &settings.seen_file;
    let tracker = SeenTracker::load(JsonFileSeenStore::new(path)).await;

    match action {
        SeenAction::Stats => {
            let stats = tracker.stats();
            println!(
                "{}",
                serde_json::to_string_pretty(&serde_json::json!({
                    "seen_file": path.display().to_string(),
                    "total_seen": stats.total_seen,
                }))?
            );
        }
        SeenAction::Clear => {
            let removed = tracker.len();
            if !tracker.clear().await {
                anyhow::bail!("Failed to write {}", path.display());
            }
            println!("Cleared {removed} seen item(s) from {}", path.display());
        }
    }
    Ok(())
}

async fn cmd_articles(source: Option<&str>, limit: usize) -> Result<()> {
    let db = connect_db().await?;
    let repo = db.article_repo();

    let articles = repo
        .list_recent(source, limit)
        .await
        .map_err(|e| anyhow::anyhow!(e))?;

    if articles.is_empty() {
        println!("No stored articles");
        return Ok(());
    }

    for article in &articles {
        println!(
            "{} [{}] {} ({}, {} chars)\n    {}",
            article.created_at.format("%Y-%m-%d %H:%M"),
            article.source,
            article.title,
            article.tier,
            article.content.chars().count(),
            article.url,
        );
    }

    let counts = repo
        .count_by_source()
        .await
        .map_err(|e| anyhow::anyhow!(e))?;
    println!("\nStored per source:");
    for (source, count) in counts {
        println!("  {source:<16} {count}");
    }
    Ok(())
}
