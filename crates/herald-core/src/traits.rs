use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;

use crate::config::{Selectors, SourceConfig};
use crate::error::AppError;
use crate::models::{CleanedContent, FeedEntry, NewArticle};
use crate::session_pool::SessionProfile;

/// Per-request options passed to the automation engine.
#[derive(Debug, Clone)]
pub struct FetchOptions {
    /// Bound for a single navigation attempt.
    pub timeout: Duration,
    pub user_agent: Option<String>,
    pub headers: HashMap<String, String>,
    /// CSS selector that must be present before the page is read.
    pub wait_for: String,
}

impl FetchOptions {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            user_agent: None,
            headers: HashMap::new(),
            wait_for: "body".to_string(),
        }
    }

    pub fn with_headers(mut self, headers: HashMap<String, String>) -> Self {
        self.headers = headers;
        self
    }
}

/// Headless browser automation backend.
///
/// A handle is an opaque live session (one browser instance). The pool owns
/// handles and is responsible for closing them.
pub trait AutomationEngine: Send + Sync + Clone + 'static {
    type Handle: Send + Sync + 'static;

    fn start(
        &self,
        profile: &SessionProfile,
    ) -> impl Future<Output = Result<Self::Handle, AppError>> + Send;

    /// Navigate to `url` and return the rendered HTML.
    fn fetch(
        &self,
        handle: &Self::Handle,
        url: &str,
        options: &FetchOptions,
    ) -> impl Future<Output = Result<String, AppError>> + Send;

    fn close(&self, handle: &Self::Handle) -> impl Future<Output = Result<(), AppError>> + Send;
}

/// Fetches raw HTML content from a URL.
pub trait Fetcher: Send + Sync + Clone + 'static {
    fn fetch(&self, url: &str) -> impl Future<Output = Result<String, AppError>> + Send;
}

/// Turns raw HTML into readable text.
pub trait ContentParser: Send + Sync + Clone + 'static {
    fn parse(&self, html: &str, selectors: &Selectors) -> Result<String, AppError>;
}

/// Lists candidate entries for a source (feed or listing page).
pub trait ItemDiscovery: Send + Sync + Clone {
    fn discover(
        &self,
        source: &SourceConfig,
    ) -> impl Future<Output = Result<Vec<FeedEntry>, AppError>> + Send;
}

/// Post-processes extracted content before storage.
pub trait ContentCleaner: Send + Sync + Clone {
    fn clean(
        &self,
        raw: &str,
        source_name: &str,
        url: &str,
    ) -> impl Future<Output = Result<CleanedContent, AppError>> + Send;
}

/// Persists cleaned articles.
pub trait ArticleStore: Send + Sync + Clone {
    fn store(&self, article: &NewArticle) -> impl Future<Output = Result<(), AppError>> + Send;
}

/// Durable backing for the seen-item tracker.
pub trait SeenStore: Send + Sync + Clone {
    fn load(&self) -> impl Future<Output = Result<Vec<String>, AppError>> + Send;

    fn save(&self, ids: &[String]) -> impl Future<Output = Result<(), AppError>> + Send;
}

/// An ArticleStore that logs articles instead of persisting them (dry runs).
#[derive(Debug, Clone)]
pub struct LogStore;

impl ArticleStore for LogStore {
    async fn store(&self, article: &NewArticle) -> Result<(), AppError> {
        tracing::info!(
            source = %article.source,
            tier = %article.tier,
            chars = article.content.chars().count(),
            title = %article.title,
            "Dry run, article not stored"
        );
        Ok(())
    }
}
