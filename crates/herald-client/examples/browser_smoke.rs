/// Smoke test for `ChromiumEngine` behind the session pool.
///
/// Launches one headless Chromium session, renders a page twice through the
/// pool (one browser start, two fetches) and parses it to text.
///
/// Run with:
///   cargo run -p herald-client --example browser_smoke --features browser -- <url>
use std::time::Duration;

use herald_client::{ChromiumEngine, ScraperParser};
use herald_core::config::Selectors;
use herald_core::traits::{AutomationEngine, ContentParser, FetchOptions};
use herald_core::{SessionPolicy, SessionPool, SessionProfile};
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().with_env_filter("info").init();

    let url = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "https://example.com".to_string());

    let pool = SessionPool::new(
        ChromiumEngine::new(),
        SessionProfile::default(),
        SessionPolicy::default(),
    );
    let cancel = CancellationToken::new();
    let options = FetchOptions::new(Duration::from_secs(30));

    for round in 1..=2 {
        let lease = pool.acquire("smoke", &cancel).await?;
        let html = pool.engine().fetch(&lease.handle, &url, &options).await?;
        let text = ScraperParser::new().parse(&html, &Selectors::default())?;
        println!(
            "round {round}: session use #{}, {} bytes HTML, {} chars text",
            lease.usage_count,
            html.len(),
            text.chars().count()
        );
    }

    let stats = pool.stats().await;
    assert_eq!(stats.created_total, 1, "second round should reuse the session");

    let closed = pool.close_all().await;
    println!("closed {closed} session(s)");
    Ok(())
}
