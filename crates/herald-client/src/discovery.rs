//! Item discovery for RSS/Atom feeds and HTML listing pages.

use std::collections::HashSet;

use chrono::Utc;
use herald_core::config::{SourceConfig, SourceType};
use herald_core::error::AppError;
use herald_core::models::FeedEntry;
use herald_core::traits::{Fetcher, ItemDiscovery};
use scraper::{Html, Selector};
use url::Url;

/// Upper bound on links taken from one listing page.
pub const MAX_LISTING_LINKS: usize = 20;

const ARTICLE_PATH_MARKERS: &[&str] = &[
    "/article/",
    "/news/",
    "/post/",
    "/blog/",
    "/story/",
    "/analysis/",
    "/market/",
    "/forex/",
    "/stock/",
    "/trading/",
];

/// Discovers entries from an RSS or Atom feed using feed-rs.
#[derive(Clone)]
pub struct FeedDiscovery<F: Fetcher> {
    fetcher: F,
}

impl<F: Fetcher> FeedDiscovery<F> {
    pub fn new(fetcher: F) -> Self {
        Self { fetcher }
    }
}

/// Parse a feed document into entries. Entries without a title or link are skipped.
pub fn parse_feed(body: &str) -> Result<Vec<FeedEntry>, AppError> {
    let feed = feed_rs::parser::parse(body.as_bytes())
        .map_err(|e| AppError::Feed(format!("Failed to parse feed: {e}")))?;

    let total = feed.entries.len();
    let entries: Vec<FeedEntry> = feed.entries.into_iter().filter_map(convert_entry).collect();
    if entries.len() < total {
        tracing::debug!(
            skipped = total - entries.len(),
            "Skipped feed entries without title or link"
        );
    }
    Ok(entries)
}

fn convert_entry(entry: feed_rs::model::Entry) -> Option<FeedEntry> {
    let title = entry
        .title
        .map(|t| t.content.trim().to_string())
        .filter(|t| !t.is_empty())?;
    let link = entry.links.first()?.href.trim().to_string();
    if link.is_empty() {
        return None;
    }

    let summary = entry
        .content
        .and_then(|c| c.body)
        .or_else(|| entry.summary.map(|s| s.content))
        .filter(|s| !s.trim().is_empty());

    Some(FeedEntry {
        title,
        link,
        summary,
        published_at: entry
            .published
            .or(entry.updated)
            .map(|dt| dt.with_timezone(&Utc)),
        author: entry.authors.first().map(|a| a.name.clone()),
        tags: entry.categories.into_iter().map(|c| c.term).collect(),
    })
}

impl<F: Fetcher> FeedDiscovery<F> {
    /// Article links from the front page of the feed's site.
    async fn site_links(&self, source: &SourceConfig) -> Result<Vec<FeedEntry>, AppError> {
        let root = site_root(&source.url)?;
        let body = self.fetcher.fetch(&root).await?;
        extract_article_links(&body, &root)
    }
}

/// `scheme://host[:port]/` of a URL.
pub fn site_root(url: &str) -> Result<String, AppError> {
    let mut root = Url::parse(url).map_err(|e| AppError::Feed(format!("Invalid feed URL: {e}")))?;
    root.set_path("/");
    root.set_query(None);
    root.set_fragment(None);
    Ok(root.to_string())
}

impl<F: Fetcher> ItemDiscovery for FeedDiscovery<F> {
    /// Falls back to the site's front page when the feed body cannot be parsed.
    /// The feed error is kept if that also yields nothing.
    async fn discover(&self, source: &SourceConfig) -> Result<Vec<FeedEntry>, AppError> {
        let body = self.fetcher.fetch(&source.url).await?;
        let feed_error = match parse_feed(&body) {
            Ok(entries) => {
                tracing::info!(source = %source.name, entries = entries.len(), "Parsed feed");
                return Ok(entries);
            }
            Err(e) => e,
        };

        tracing::warn!(
            source = %source.name,
            error = %feed_error,
            "Feed unparseable, trying site links"
        );
        match self.site_links(source).await {
            Ok(entries) if !entries.is_empty() => {
                tracing::info!(
                    source = %source.name,
                    links = entries.len(),
                    "Collected site links instead of feed"
                );
                Ok(entries)
            }
            Ok(_) => Err(feed_error),
            Err(e) => {
                tracing::debug!(source = %source.name, error = %e, "Site link fallback failed");
                Err(feed_error)
            }
        }
    }
}

/// Discovers article links on an HTML listing page.
#[derive(Clone)]
pub struct HtmlDiscovery<F: Fetcher> {
    fetcher: F,
}

impl<F: Fetcher> HtmlDiscovery<F> {
    pub fn new(fetcher: F) -> Self {
        Self { fetcher }
    }
}

/// Collect same-host article links from a listing page, in document order.
pub fn extract_article_links(html: &str, base: &str) -> Result<Vec<FeedEntry>, AppError> {
    let base = Url::parse(base).map_err(|e| AppError::Feed(format!("Invalid listing URL: {e}")))?;
    let document = Html::parse_document(html);
    let anchors = Selector::parse("a[href]")
        .map_err(|e| AppError::Feed(format!("Invalid selector: {e}")))?;

    let mut seen = HashSet::new();
    let mut entries = Vec::new();

    for anchor in document.select(&anchors) {
        let Some(href) = anchor.value().attr("href") else {
            continue;
        };
        let Ok(mut url) = base.join(href) else {
            continue;
        };
        url.set_fragment(None);

        if url.host_str() != base.host_str() || !looks_like_article(&url) {
            continue;
        }
        if !seen.insert(url.to_string()) {
            continue;
        }

        let text = anchor.text().collect::<Vec<_>>().join(" ");
        let title = text.split_whitespace().collect::<Vec<_>>().join(" ");
        let title = if title.is_empty() {
            anchor
                .value()
                .attr("title")
                .map(str::to_string)
                .unwrap_or_else(|| url.to_string())
        } else {
            title
        };

        entries.push(FeedEntry::new(title, url.to_string()));
        if entries.len() >= MAX_LISTING_LINKS {
            break;
        }
    }

    Ok(entries)
}

fn looks_like_article(url: &Url) -> bool {
    let path = url.path().to_lowercase();
    if ARTICLE_PATH_MARKERS.iter().any(|m| path.contains(m)) {
        return true;
    }

    // Dated paths such as /2024/05/...
    let segments: Vec<&str> = path.split('/').collect();
    let dated = segments.windows(2).any(|w| {
        w[0].len() == 4
            && w[1].len() == 2
            && w[0].bytes().all(|b| b.is_ascii_digit())
            && w[1].bytes().all(|b| b.is_ascii_digit())
    });
    if dated {
        return true;
    }

    // Numbered pages such as /eur-usd-outlook-12345.html
    let stem = path
        .strip_suffix(".html")
        .or_else(|| path.strip_suffix(".htm"));
    stem.and_then(|s| s.rsplit_once('-'))
        .is_some_and(|(_, n)| !n.is_empty() && n.bytes().all(|b| b.is_ascii_digit()))
}

impl<F: Fetcher> ItemDiscovery for HtmlDiscovery<F> {
    async fn discover(&self, source: &SourceConfig) -> Result<Vec<FeedEntry>, AppError> {
        let body = self.fetcher.fetch(&source.url).await?;
        let entries = extract_article_links(&body, &source.url)?;
        tracing::info!(source = %source.name, links = entries.len(), "Collected listing links");
        Ok(entries)
    }
}

/// Dispatches to feed or listing discovery by source type.
#[derive(Clone)]
pub struct SourceDiscovery<F: Fetcher> {
    feed: FeedDiscovery<F>,
    html: HtmlDiscovery<F>,
}

impl<F: Fetcher> SourceDiscovery<F> {
    pub fn new(fetcher: F) -> Self {
        Self {
            feed: FeedDiscovery::new(fetcher.clone()),
            html: HtmlDiscovery::new(fetcher),
        }
    }
}

impl<F: Fetcher> ItemDiscovery for SourceDiscovery<F> {
    async fn discover(&self, source: &SourceConfig) -> Result<Vec<FeedEntry>, AppError> {
        match source.source_type {
            SourceType::Rss => self.feed.discover(source).await,
            SourceType::Html => self.html.discover(source).await,
        }
    }
}
