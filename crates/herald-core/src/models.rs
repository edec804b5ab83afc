use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// One entry as produced by feed or listing discovery.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FeedEntry {
    pub title: String,
    pub link: String,
    /// Feed-supplied summary or body (may contain HTML).
    pub summary: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
    pub author: Option<String>,
    pub tags: Vec<String>,
}

impl FeedEntry {
    pub fn new(title: impl Into<String>, link: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            link: link.into(),
            ..Default::default()
        }
    }

    pub fn with_summary(mut self, summary: impl Into<String>) -> Self {
        self.summary = Some(summary.into());
        self
    }
}

/// A discovered entry bound to its source, identified by a stable hash.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DiscoveredItem {
    pub id: String,
    pub source: String,
    pub entry: FeedEntry,
}

impl DiscoveredItem {
    pub fn new(source: impl Into<String>, entry: FeedEntry) -> Self {
        let source = source.into();
        let id = compute_item_id(&source, &entry.title, &entry.link);
        Self { id, source, entry }
    }

    pub fn url(&self) -> &str {
        &self.entry.link
    }

    pub fn title(&self) -> &str {
        &self.entry.title
    }
}

/// Named extraction strategy in the fixed-priority fallback chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ExtractionTier {
    Automation,
    LightweightFetch,
    FeedFallback,
}

impl ExtractionTier {
    /// All tiers in default priority order.
    pub const ALL: [ExtractionTier; 3] = [
        ExtractionTier::Automation,
        ExtractionTier::LightweightFetch,
        ExtractionTier::FeedFallback,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ExtractionTier::Automation => "automation",
            ExtractionTier::LightweightFetch => "lightweight-fetch",
            ExtractionTier::FeedFallback => "feed-fallback",
        }
    }
}

impl fmt::Display for ExtractionTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ExtractionTier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "automation" => Ok(ExtractionTier::Automation),
            "lightweight-fetch" => Ok(ExtractionTier::LightweightFetch),
            "feed-fallback" => Ok(ExtractionTier::FeedFallback),
            _ => Err(format!("Unknown extraction tier: {s}")),
        }
    }
}

/// Outcome of one tiered extraction. Never mutated after creation.
#[derive(Debug, Clone)]
pub struct ExtractionResult {
    pub success: bool,
    /// Winning tier, `None` when every tier failed.
    pub tier: Option<ExtractionTier>,
    pub content: Option<String>,
    pub error: Option<String>,
    pub byte_len: usize,
    pub elapsed: Duration,
}

impl ExtractionResult {
    pub fn succeeded(tier: ExtractionTier, content: String, elapsed: Duration) -> Self {
        Self {
            success: true,
            tier: Some(tier),
            byte_len: content.len(),
            content: Some(content),
            error: None,
            elapsed,
        }
    }

    pub fn failed(error: impl Into<String>, elapsed: Duration) -> Self {
        Self {
            success: false,
            tier: None,
            content: None,
            error: Some(error.into()),
            byte_len: 0,
            elapsed,
        }
    }
}

/// Per-run counters for one source.
#[derive(Debug, Clone, Serialize)]
pub struct RunStatistics {
    pub run_id: Uuid,
    pub source: String,
    pub started_at: DateTime<Utc>,
    pub discovered: u64,
    pub processed: u64,
    pub skipped: u64,
    pub failed: u64,
    #[serde(with = "duration_millis")]
    pub duration: Duration,
    pub tier_successes: BTreeMap<ExtractionTier, u64>,
    /// Run-level problems (discovery failure, cancellation).
    pub errors: Vec<String>,
}

impl RunStatistics {
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            source: source.into(),
            started_at: Utc::now(),
            discovered: 0,
            processed: 0,
            skipped: 0,
            failed: 0,
            duration: Duration::ZERO,
            tier_successes: BTreeMap::new(),
            errors: Vec::new(),
        }
    }

    pub fn record_tier_success(&mut self, tier: ExtractionTier) {
        *self.tier_successes.entry(tier).or_insert(0) += 1;
    }

    /// Percentage of attempted (non-skipped) items that were processed.
    pub fn success_rate(&self) -> f64 {
        let attempted = self.processed + self.failed;
        if attempted == 0 {
            return 0.0;
        }
        self.processed as f64 * 100.0 / attempted as f64
    }
}

mod duration_millis {
    use std::time::Duration;

    use serde::Serializer;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }
}

/// Output of the content cleaner.
#[derive(Debug, Clone, PartialEq)]
pub struct CleanedContent {
    pub text: String,
    pub metadata: serde_json::Value,
}

/// Record handed to article storage after cleaning.
#[derive(Debug, Clone, Serialize)]
pub struct NewArticle {
    pub item_id: String,
    pub source: String,
    pub title: String,
    pub url: String,
    pub published_at: Option<DateTime<Utc>>,
    pub author: Option<String>,
    pub tags: Vec<String>,
    pub content: String,
    /// SHA-256 of the cleaned content
    pub content_hash: String,
    pub tier: ExtractionTier,
    pub metadata: serde_json::Value,
}

impl NewArticle {
    pub fn from_parts(item: &DiscoveredItem, tier: ExtractionTier, cleaned: CleanedContent) -> Self {
        Self {
            item_id: item.id.clone(),
            source: item.source.clone(),
            title: item.entry.title.clone(),
            url: item.entry.link.clone(),
            published_at: item.entry.published_at,
            author: item.entry.author.clone(),
            tags: item.entry.tags.clone(),
            content_hash: compute_hash(&cleaned.text),
            content: cleaned.text,
            tier,
            metadata: cleaned.metadata,
        }
    }
}

/// A stored article as read back from storage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Article {
    pub item_id: String,
    pub source: String,
    pub title: String,
    pub url: String,
    pub published_at: Option<DateTime<Utc>>,
    pub author: Option<String>,
    pub tags: Vec<String>,
    pub content: String,
    pub content_hash: String,
    pub tier: ExtractionTier,
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

/// Basic text statistics stored alongside cleaned content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ArticleStats {
    pub word_count: usize,
    pub character_count: usize,
    pub paragraph_count: usize,
    pub reading_time_minutes: usize,
}

impl ArticleStats {
    pub fn from_content(content: &str) -> Self {
        let word_count = content.split_whitespace().count();
        Self {
            word_count,
            character_count: content.chars().count(),
            paragraph_count: content.matches("\n\n").count() + 1,
            // 200 words per minute
            reading_time_minutes: (word_count / 200).max(1),
        }
    }
}

/// Compute a SHA-256 hash of a string, returned as 64-char hex.
pub fn compute_hash(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Stable identifier of a discovered item: hash of source, title and URL.
pub fn compute_item_id(source: &str, title: &str, url: &str) -> String {
    compute_hash(&format!("{source}:{title}:{url}"))
}
