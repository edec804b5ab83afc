//! Test utilities: mock implementations of all core traits.
//!
//! Handwritten mocks for dependency injection in unit tests.
//! All mocks use `Arc<Mutex<_>>` for interior mutability, allowing
//! test assertions on recorded calls.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::FutureExt;
use futures::future::BoxFuture;
use tokio_util::sync::CancellationToken;

use crate::config::{Selectors, SourceConfig};
use crate::error::AppError;
use crate::models::{CleanedContent, DiscoveredItem, ExtractionTier, FeedEntry, NewArticle};
use crate::pipeline::{PipelineEvent, PipelineReporter};
use crate::session_pool::SessionProfile;
use crate::tiered::ExtractionStrategy;
use crate::traits::{
    ArticleStore, AutomationEngine, ContentCleaner, ContentParser, FetchOptions, Fetcher,
    ItemDiscovery, SeenStore,
};

// ---------------------------------------------------------------------------
// MockEngine
// ---------------------------------------------------------------------------

#[derive(Default)]
struct EngineState {
    next_id: u64,
    starts: usize,
    closed: Vec<u64>,
    fetched: Vec<String>,
    timeouts: Vec<Duration>,
}

/// Mock automation engine. Handles are sequential ids.
#[derive(Clone)]
pub struct MockEngine {
    html: String,
    start_delay: Duration,
    failing_starts: Arc<Mutex<u32>>,
    failing_close: bool,
    fetch_errors: Arc<Mutex<Vec<AppError>>>,
    state: Arc<Mutex<EngineState>>,
}

impl MockEngine {
    pub fn new(html: &str) -> Self {
        Self {
            html: html.to_string(),
            start_delay: Duration::ZERO,
            failing_starts: Arc::new(Mutex::new(0)),
            failing_close: false,
            fetch_errors: Arc::new(Mutex::new(Vec::new())),
            state: Arc::new(Mutex::new(EngineState::default())),
        }
    }

    pub fn with_start_delay(mut self, delay: Duration) -> Self {
        self.start_delay = delay;
        self
    }

    /// The next `n` starts fail.
    pub fn failing_starts(self, n: u32) -> Self {
        *self.failing_starts.lock().unwrap() = n;
        self
    }

    pub fn failing_close(mut self) -> Self {
        self.failing_close = true;
        self
    }

    /// Errors returned (in order) by the first fetch calls.
    pub fn with_fetch_errors(self, errors: Vec<AppError>) -> Self {
        *self.fetch_errors.lock().unwrap() = errors;
        self
    }

    pub fn start_count(&self) -> usize {
        self.state.lock().unwrap().starts
    }

    pub fn close_count(&self) -> usize {
        self.state.lock().unwrap().closed.len()
    }

    pub fn closed_ids(&self) -> Vec<u64> {
        self.state.lock().unwrap().closed.clone()
    }

    pub fn fetched_urls(&self) -> Vec<String> {
        self.state.lock().unwrap().fetched.clone()
    }

    pub fn fetch_timeouts(&self) -> Vec<Duration> {
        self.state.lock().unwrap().timeouts.clone()
    }
}

impl AutomationEngine for MockEngine {
    type Handle = u64;

    async fn start(&self, _profile: &SessionProfile) -> Result<u64, AppError> {
        if !self.start_delay.is_zero() {
            tokio::time::sleep(self.start_delay).await;
        }
        {
            let mut failing = self.failing_starts.lock().unwrap();
            if *failing > 0 {
                *failing -= 1;
                return Err(AppError::Browser("launch failed".into()));
            }
        }
        let mut state = self.state.lock().unwrap();
        state.starts += 1;
        state.next_id += 1;
        Ok(state.next_id)
    }

    async fn fetch(
        &self,
        _handle: &u64,
        url: &str,
        options: &FetchOptions,
    ) -> Result<String, AppError> {
        {
            let mut state = self.state.lock().unwrap();
            state.fetched.push(url.to_string());
            state.timeouts.push(options.timeout);
        }
        let mut errors = self.fetch_errors.lock().unwrap();
        if !errors.is_empty() {
            return Err(errors.remove(0));
        }
        Ok(self.html.clone())
    }

    async fn close(&self, handle: &u64) -> Result<(), AppError> {
        self.state.lock().unwrap().closed.push(*handle);
        if self.failing_close {
            return Err(AppError::Browser("close failed".into()));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// MockFetcher
// ---------------------------------------------------------------------------

/// Mock fetcher that returns a configurable response.
#[derive(Clone)]
pub struct MockFetcher {
    /// Queue of responses. Each call pops the first element.
    /// If empty, returns a default HTML string.
    responses: Arc<Mutex<Vec<Result<String, AppError>>>>,
    urls: Arc<Mutex<Vec<String>>>,
}

impl MockFetcher {
    pub fn new(html: &str) -> Self {
        Self::with_responses(vec![Ok(html.to_string())])
    }

    pub fn with_error(error: AppError) -> Self {
        Self::with_responses(vec![Err(error)])
    }

    pub fn with_responses(responses: Vec<Result<String, AppError>>) -> Self {
        Self {
            responses: Arc::new(Mutex::new(responses)),
            urls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn call_count(&self) -> usize {
        self.urls.lock().unwrap().len()
    }

    pub fn urls(&self) -> Vec<String> {
        self.urls.lock().unwrap().clone()
    }
}

impl Fetcher for MockFetcher {
    async fn fetch(&self, url: &str) -> Result<String, AppError> {
        self.urls.lock().unwrap().push(url.to_string());
        let mut responses = self.responses.lock().unwrap();
        if responses.is_empty() {
            Ok("<html><body>default</body></html>".to_string())
        } else {
            responses.remove(0)
        }
    }
}

// ---------------------------------------------------------------------------
// MockParser
// ---------------------------------------------------------------------------

/// Parser that drops markup and trims.
#[derive(Clone, Default)]
pub struct MockParser;

impl MockParser {
    pub fn strip_tags() -> Self {
        Self
    }
}

impl ContentParser for MockParser {
    fn parse(&self, html: &str, _selectors: &Selectors) -> Result<String, AppError> {
        let mut out = String::with_capacity(html.len());
        let mut in_tag = false;
        for c in html.chars() {
            match c {
                '<' => in_tag = true,
                '>' => in_tag = false,
                _ if !in_tag => out.push(c),
                _ => {}
            }
        }
        Ok(out.trim().to_string())
    }
}

// ---------------------------------------------------------------------------
// MockDiscovery
// ---------------------------------------------------------------------------

/// Discovery returning a fixed entry list or error.
#[derive(Clone)]
pub struct MockDiscovery {
    result: Arc<Mutex<Result<Vec<FeedEntry>, String>>>,
    /// Errors returned (in order) before `result`.
    failures: Arc<Mutex<Vec<AppError>>>,
    calls: Arc<Mutex<usize>>,
}

impl MockDiscovery {
    pub fn with_entries(entries: Vec<FeedEntry>) -> Self {
        Self {
            result: Arc::new(Mutex::new(Ok(entries))),
            failures: Arc::new(Mutex::new(Vec::new())),
            calls: Arc::new(Mutex::new(0)),
        }
    }

    pub fn with_error(error: AppError) -> Self {
        Self {
            result: Arc::new(Mutex::new(Err(error.to_string()))),
            failures: Arc::new(Mutex::new(Vec::new())),
            calls: Arc::new(Mutex::new(0)),
        }
    }

    /// The first calls fail with `errors`, in order.
    pub fn failing_first(self, errors: Vec<AppError>) -> Self {
        *self.failures.lock().unwrap() = errors;
        self
    }

    pub fn call_count(&self) -> usize {
        *self.calls.lock().unwrap()
    }
}

impl ItemDiscovery for MockDiscovery {
    async fn discover(&self, _source: &SourceConfig) -> Result<Vec<FeedEntry>, AppError> {
        *self.calls.lock().unwrap() += 1;
        {
            let mut failures = self.failures.lock().unwrap();
            if !failures.is_empty() {
                return Err(failures.remove(0));
            }
        }
        self.result.lock().unwrap().clone().map_err(AppError::Generic)
    }
}

// ---------------------------------------------------------------------------
// MockTier
// ---------------------------------------------------------------------------

/// Extraction strategy returning fixed content, failing for chosen URLs.
pub struct MockTier {
    tier: ExtractionTier,
    content: String,
    fail_urls: HashSet<String>,
    calls: Arc<Mutex<Vec<String>>>,
}

impl MockTier {
    pub fn new(tier: ExtractionTier, content: &str) -> Self {
        Self {
            tier,
            content: content.to_string(),
            fail_urls: HashSet::new(),
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn failing_for(mut self, url: &str) -> Self {
        self.fail_urls.insert(url.to_string());
        self
    }

    /// URLs this tier was invoked for, in order.
    pub fn calls(&self) -> Arc<Mutex<Vec<String>>> {
        self.calls.clone()
    }
}

impl ExtractionStrategy for MockTier {
    fn tier(&self) -> ExtractionTier {
        self.tier
    }

    fn attempt<'a>(
        &'a self,
        item: &'a DiscoveredItem,
        _source: &'a SourceConfig,
        _cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, Result<String, AppError>> {
        self.calls.lock().unwrap().push(item.url().to_string());
        let result = if self.fail_urls.contains(item.url()) {
            Err(AppError::NetworkError(format!("unreachable: {}", item.url())))
        } else {
            Ok(self.content.clone())
        };
        async move { result }.boxed()
    }
}

// ---------------------------------------------------------------------------
// MockCleaner
// ---------------------------------------------------------------------------

/// Mock cleaner that passes text through.
#[derive(Clone)]
pub struct MockCleaner {
    fail_urls: Arc<Mutex<HashSet<String>>>,
}

impl MockCleaner {
    /// Creates a cleaner that returns the input unchanged.
    pub fn passthrough() -> Self {
        Self {
            fail_urls: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    pub fn failing_for(self, url: &str) -> Self {
        self.fail_urls.lock().unwrap().insert(url.to_string());
        self
    }
}

impl ContentCleaner for MockCleaner {
    async fn clean(
        &self,
        raw: &str,
        source_name: &str,
        url: &str,
    ) -> Result<CleanedContent, AppError> {
        if self.fail_urls.lock().unwrap().contains(url) {
            return Err(AppError::CleanerError(format!("cannot clean {url}")));
        }
        Ok(CleanedContent {
            text: raw.to_string(),
            metadata: serde_json::json!({ "source": source_name }),
        })
    }
}

// ---------------------------------------------------------------------------
// MockStore
// ---------------------------------------------------------------------------

/// Mock article store that records saves.
#[derive(Clone)]
pub struct MockStore {
    pub stored: Arc<Mutex<Vec<NewArticle>>>,
    fail_urls: Arc<Mutex<HashSet<String>>>,
}

impl MockStore {
    pub fn new() -> Self {
        Self {
            stored: Arc::new(Mutex::new(Vec::new())),
            fail_urls: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// Store that rejects articles for `url`.
    pub fn failing_for(self, url: &str) -> Self {
        self.fail_urls.lock().unwrap().insert(url.to_string());
        self
    }

    pub fn stored_urls(&self) -> Vec<String> {
        self.stored
            .lock()
            .unwrap()
            .iter()
            .map(|a| a.url.clone())
            .collect()
    }
}

impl Default for MockStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ArticleStore for MockStore {
    async fn store(&self, article: &NewArticle) -> Result<(), AppError> {
        if self.fail_urls.lock().unwrap().contains(&article.url) {
            return Err(AppError::StorageError(format!("rejected {}", article.url)));
        }
        self.stored.lock().unwrap().push(article.clone());
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// MockSeenStore
// ---------------------------------------------------------------------------

/// In-memory seen store with switchable failures.
#[derive(Clone, Default)]
pub struct MockSeenStore {
    ids: Arc<Mutex<Vec<String>>>,
    saves: Arc<Mutex<usize>>,
    fail_load: bool,
    fail_save: bool,
}

impl MockSeenStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_load(mut self) -> Self {
        self.fail_load = true;
        self
    }

    pub fn failing_save(mut self) -> Self {
        self.fail_save = true;
        self
    }

    pub fn save_count(&self) -> usize {
        *self.saves.lock().unwrap()
    }

    pub fn saved(&self) -> Vec<String> {
        self.ids.lock().unwrap().clone()
    }
}

impl SeenStore for MockSeenStore {
    async fn load(&self) -> Result<Vec<String>, AppError> {
        if self.fail_load {
            return Err(AppError::StorageError("corrupt seen file".into()));
        }
        Ok(self.ids.lock().unwrap().clone())
    }

    async fn save(&self, ids: &[String]) -> Result<(), AppError> {
        if self.fail_save {
            return Err(AppError::StorageError("disk full".into()));
        }
        *self.ids.lock().unwrap() = ids.to_vec();
        *self.saves.lock().unwrap() += 1;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// MockReporter
// ---------------------------------------------------------------------------

/// Mock pipeline reporter that records event names.
#[derive(Default)]
pub struct MockReporter {
    pub events: Arc<Mutex<Vec<String>>>,
}

impl MockReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn count(&self, label: &str) -> usize {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|e| *e == label)
            .count()
    }

    pub fn last(&self) -> Option<String> {
        self.events.lock().unwrap().last().cloned()
    }
}

impl PipelineReporter for MockReporter {
    fn report(&self, event: PipelineEvent<'_>) {
        let label = match &event {
            PipelineEvent::RunStarted { .. } => "RunStarted",
            PipelineEvent::Discovered { .. } => "Discovered",
            PipelineEvent::DiscoveryFailed { .. } => "DiscoveryFailed",
            PipelineEvent::ItemSkipped { .. } => "ItemSkipped",
            PipelineEvent::ItemProcessed { .. } => "ItemProcessed",
            PipelineEvent::ItemFailed { .. } => "ItemFailed",
            PipelineEvent::Cancelled { .. } => "Cancelled",
            PipelineEvent::RunFinished { .. } => "RunFinished",
        };
        self.events.lock().unwrap().push(label.to_string());
    }
}

// ---------------------------------------------------------------------------
// Test helpers
// ---------------------------------------------------------------------------

/// Text of exactly `n` chars with no whitespace or markup.
pub fn long_text(n: usize) -> String {
    "abcdefghij".chars().cycle().take(n).collect()
}

/// `n` feed entries with distinct titles and links.
pub fn make_entries(n: usize) -> Vec<FeedEntry> {
    (1..=n)
        .map(|i| {
            FeedEntry::new(
                format!("Story {i}"),
                format!("https://www.fxstreet.com/news/story-{i}"),
            )
            .with_summary(format!("Summary of story {i}"))
        })
        .collect()
}
