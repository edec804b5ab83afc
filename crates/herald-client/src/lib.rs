pub mod cleaner;
pub mod discovery;
pub mod fetcher;
pub mod markdown;
pub mod parser;

#[cfg(feature = "browser")]
pub mod browser;

pub use cleaner::{BasicCleaner, ConfiguredCleaner, OpenAiCleaner, TokenBudget, TokenUsage};
pub use discovery::{FeedDiscovery, HtmlDiscovery, SourceDiscovery};
pub use fetcher::HttpFetcher;
pub use markdown::MarkdownParser;
pub use parser::ScraperParser;

#[cfg(feature = "browser")]
pub use browser::{ChromiumEngine, ChromiumSession};
