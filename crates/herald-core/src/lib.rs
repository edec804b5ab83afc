pub mod config;
pub mod error;
pub mod models;
pub mod pipeline;
pub mod rate_limit;
pub mod retry;
pub mod seen;
pub mod session_pool;
pub mod tiered;
pub mod traits;

#[cfg(test)]
pub(crate) mod testutil;

pub use config::{CrawlerConfig, CrawlerSettings, Selectors, SourceConfig, SourceType};
pub use error::AppError;
pub use models::{
    Article, ArticleStats, CleanedContent, DiscoveredItem, ExtractionResult, ExtractionTier,
    FeedEntry, NewArticle, RunStatistics, compute_hash, compute_item_id,
};
pub use pipeline::{PipelineReporter, ProcessingPipeline, TracingPipelineReporter};
pub use rate_limit::{RateLimitConfig, RateLimiter};
pub use retry::{RetryPolicy, RetrySchedule};
pub use seen::{JsonFileSeenStore, SeenTracker};
pub use session_pool::{SessionPolicy, SessionPool, SessionProfile};
pub use tiered::{ExtractionStrategy, TieredExtractor};
pub use traits::{
    ArticleStore, AutomationEngine, ContentCleaner, ContentParser, FetchOptions, Fetcher,
    ItemDiscovery, LogStore, SeenStore,
};
