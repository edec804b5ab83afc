//! Crawler and per-source configuration loaded from YAML.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::AppError;
use crate::models::ExtractionTier;
use crate::retry::RetrySchedule;

/// How a source's items are discovered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceType {
    /// RSS/Atom feed.
    Rss,
    /// HTML listing page scanned for article links.
    Html,
}

/// CSS selectors used by the lightweight parser.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Selectors {
    /// Candidate content containers, tried in order.
    pub content: Vec<String>,
    /// Elements removed before text extraction.
    pub remove: Vec<String>,
}

/// Configuration of a single news source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceConfig {
    pub name: String,
    #[serde(rename = "type")]
    pub source_type: SourceType,
    /// Feed URL for `rss`, listing page for `html`.
    pub url: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_max_articles")]
    pub max_articles_per_run: usize,
    #[serde(default = "default_rate_limit")]
    pub rate_limit_seconds: f64,
    #[serde(default = "default_timeout")]
    pub timeout_seconds: u64,
    #[serde(default)]
    pub selectors: Selectors,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    /// Allowed extraction tiers; `None` means every configured tier.
    #[serde(default)]
    pub tiers: Option<Vec<ExtractionTier>>,
}

fn default_true() -> bool {
    true
}

/// Longest pause allowed between two requests to one source.
pub const MAX_RATE_LIMIT_SECS: f64 = 3600.0;

fn default_max_articles() -> usize {
    50
}

fn default_rate_limit() -> f64 {
    1.0
}

fn default_timeout() -> u64 {
    30
}

impl SourceConfig {
    pub fn new(name: impl Into<String>, source_type: SourceType, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            source_type,
            url: url.into(),
            enabled: true,
            max_articles_per_run: default_max_articles(),
            rate_limit_seconds: default_rate_limit(),
            timeout_seconds: default_timeout(),
            selectors: Selectors::default(),
            headers: HashMap::new(),
            tiers: None,
        }
    }

    pub fn with_max_articles(mut self, max: usize) -> Self {
        self.max_articles_per_run = max;
        self
    }

    pub fn with_rate_limit(mut self, seconds: f64) -> Self {
        self.rate_limit_seconds = seconds;
        self
    }

    pub fn with_tiers(mut self, tiers: Vec<ExtractionTier>) -> Self {
        self.tiers = Some(tiers);
        self
    }

    pub fn rate_limit(&self) -> Duration {
        let secs = self.rate_limit_seconds;
        if secs.is_nan() {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(secs.clamp(0.0, MAX_RATE_LIMIT_SECS))
    }

    /// Whether the given tier may be used for this source.
    pub fn allows_tier(&self, tier: ExtractionTier) -> bool {
        self.tiers.as_ref().is_none_or(|t| t.contains(&tier))
    }

    /// Two-step progressive schedule for lightweight fetches.
    pub fn lightweight_schedule(&self) -> RetrySchedule {
        RetrySchedule::progressive(Duration::from_secs(self.timeout_seconds), 2)
    }
}

/// Process-wide crawler settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CrawlerSettings {
    pub seen_file: PathBuf,
    pub auto_flush_minutes: u64,
    pub min_content_length: usize,
    pub automation_timeouts_secs: Vec<u64>,
    pub retry_delay_ms: u64,
    pub session_max_usage: u32,
    pub session_max_lifetime_secs: u64,
    pub cycle_interval_secs: u64,
    pub max_concurrent_sources: usize,
    pub enable_llm_cleaning: bool,
    /// Tokens the LLM cleaner may use per process; unlimited when unset.
    pub llm_token_budget: Option<u64>,
}

impl Default for CrawlerSettings {
    fn default() -> Self {
        Self {
            seen_file: PathBuf::from("data/seen_articles.json"),
            auto_flush_minutes: 5,
            min_content_length: 100,
            automation_timeouts_secs: vec![30, 60, 120],
            retry_delay_ms: 2000,
            session_max_usage: 50,
            session_max_lifetime_secs: 3600,
            cycle_interval_secs: 3600,
            max_concurrent_sources: 5,
            enable_llm_cleaning: true,
            llm_token_budget: None,
        }
    }
}

impl CrawlerSettings {
    pub fn automation_schedule(&self) -> RetrySchedule {
        RetrySchedule::from_secs(&self.automation_timeouts_secs)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn auto_flush_interval(&self) -> Duration {
        Duration::from_secs(self.auto_flush_minutes * 60)
    }

    pub fn session_max_lifetime(&self) -> Duration {
        Duration::from_secs(self.session_max_lifetime_secs)
    }

    pub fn cycle_interval(&self) -> Duration {
        Duration::from_secs(self.cycle_interval_secs)
    }
}

/// Top-level configuration file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrawlerConfig {
    #[serde(default)]
    pub crawler: CrawlerSettings,
    #[serde(default)]
    pub sources: Vec<SourceConfig>,
}

impl CrawlerConfig {
    /// Read, parse and validate a YAML configuration file.
    pub fn from_path(path: &Path) -> Result<Self, AppError> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            AppError::ConfigError(format!("Failed to read {}: {e}", path.display()))
        })?;
        Self::from_yaml(&raw)
    }

    /// Parse and validate YAML text.
    pub fn from_yaml(raw: &str) -> Result<Self, AppError> {
        let config: CrawlerConfig = serde_yaml::from_str(raw)
            .map_err(|e| AppError::ConfigError(format!("Invalid YAML: {e}")))?;

        let errors = config.validate();
        if !errors.is_empty() {
            return Err(AppError::ConfigError(errors.join("; ")));
        }
        Ok(config)
    }

    /// Returns every validation problem found (empty when valid).
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        let settings = &self.crawler;

        if settings.max_concurrent_sources == 0 {
            errors.push("max_concurrent_sources must be positive".to_string());
        }
        if settings.session_max_usage == 0 {
            errors.push("session_max_usage must be positive".to_string());
        }
        if settings.automation_timeouts_secs.is_empty() {
            errors.push("automation_timeouts_secs must not be empty".to_string());
        } else if settings.automation_timeouts_secs.contains(&0) {
            errors.push("automation_timeouts_secs entries must be positive".to_string());
        } else if !settings.automation_schedule().is_progressive() {
            errors.push("automation_timeouts_secs must be non-decreasing".to_string());
        }
        if settings.llm_token_budget == Some(0) {
            errors.push("llm_token_budget must be positive when set".to_string());
        }

        let mut names = HashSet::new();
        for source in &self.sources {
            if source.name.trim().is_empty() {
                errors.push("source name cannot be empty".to_string());
            } else if !names.insert(source.name.as_str()) {
                errors.push(format!("duplicate source name '{}'", source.name));
            }
            if !(0.0..=MAX_RATE_LIMIT_SECS).contains(&source.rate_limit_seconds) {
                errors.push(format!(
                    "source '{}': rate_limit_seconds must be between 0 and {MAX_RATE_LIMIT_SECS}",
                    source.name
                ));
            }
            if source.timeout_seconds == 0 {
                errors.push(format!(
                    "source '{}': timeout_seconds must be positive",
                    source.name
                ));
            }
            match Url::parse(&source.url) {
                Ok(url) if matches!(url.scheme(), "http" | "https") => {}
                Ok(url) => errors.push(format!(
                    "source '{}': URL scheme '{}' is not allowed",
                    source.name,
                    url.scheme()
                )),
                Err(e) => errors.push(format!("source '{}': invalid URL: {e}", source.name)),
            }
            if source.tiers.as_ref().is_some_and(|t| t.is_empty()) {
                errors.push(format!(
                    "source '{}': tiers must list at least one tier",
                    source.name
                ));
            }
        }

        errors
    }

    /// Enabled sources, optionally restricted to a single name.
    pub fn enabled_sources(&self, only: Option<&str>) -> Vec<&SourceConfig> {
        self.sources
            .iter()
            .filter(|s| s.enabled)
            .filter(|s| only.is_none_or(|name| s.name == name))
            .collect()
    }
}
