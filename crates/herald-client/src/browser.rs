use std::path::PathBuf;
use std::time::{Duration, Instant};

use chromiumoxide::{Browser, BrowserConfig, Page};
use futures::StreamExt;
use herald_core::error::AppError;
use herald_core::session_pool::SessionProfile;
use herald_core::traits::{AutomationEngine, FetchOptions};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

/// Headless Chromium automation over the Chrome DevTools Protocol.
///
/// Every [`start`](AutomationEngine::start) launches one browser process. The
/// session pool decides how long it lives; each fetch opens a tab, waits for
/// the `wait_for` selector, reads the rendered DOM and closes the tab. Opening
/// and rendering finish inside the attempt's timeout minus a reserve for the
/// close, so the tab is released before the caller gives up on the attempt.
///
/// The user agent comes from the [`SessionProfile`]. Extra request headers are
/// only honoured by the lightweight fetcher.
#[derive(Debug, Clone, Default)]
pub struct ChromiumEngine {
    executable: Option<PathBuf>,
}

/// Part of each attempt's bound kept back for closing the tab.
const CLOSE_RESERVE: Duration = Duration::from_secs(2);

/// Time allowed for opening and rendering a page within an attempt bound.
fn render_budget(timeout: Duration) -> Duration {
    if timeout > CLOSE_RESERVE * 2 {
        timeout - CLOSE_RESERVE
    } else {
        timeout / 2
    }
}

/// Closes its tab when dropped, unless [`close`](Self::close) ran first.
struct TabGuard {
    page: Option<Page>,
}

impl TabGuard {
    fn new(page: Page) -> Self {
        Self { page: Some(page) }
    }

    fn page(&self) -> Result<&Page, AppError> {
        self.page
            .as_ref()
            .ok_or_else(|| AppError::Browser("tab already closed".into()))
    }

    async fn close(mut self, url: &str) {
        let Some(page) = self.page.take() else {
            return;
        };
        match tokio::time::timeout(CLOSE_RESERVE, page.close()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::debug!(url, error = %e, "Failed to close tab"),
            Err(_) => tracing::warn!(url, "Timed out closing tab"),
        }
    }
}

impl Drop for TabGuard {
    fn drop(&mut self) {
        // Attempt abandoned mid-render (outer timeout or cancellation).
        if let Some(page) = self.page.take()
            && let Ok(runtime) = tokio::runtime::Handle::try_current()
        {
            runtime.spawn(async move {
                if let Err(e) = page.close().await {
                    tracing::debug!(error = %e, "Failed to close abandoned tab");
                }
            });
        }
    }
}

/// One live browser process and its CDP event loop.
pub struct ChromiumSession {
    browser: Mutex<Browser>,
    handler: JoinHandle<()>,
}

impl ChromiumEngine {
    /// Use `$CHROME_BIN` or the first known Chrome/Chromium install.
    pub fn new() -> Self {
        Self {
            executable: find_chrome_binary(),
        }
    }

    pub fn with_executable(path: impl Into<PathBuf>) -> Self {
        Self {
            executable: Some(path.into()),
        }
    }

    fn config(&self, profile: &SessionProfile) -> Result<BrowserConfig, AppError> {
        let mut builder = BrowserConfig::builder().no_sandbox().disable_default_args();

        if let Some(bin) = &self.executable {
            tracing::debug!(path = %bin.display(), "Using Chrome binary");
            builder = builder.chrome_executable(bin);
        }
        if profile.headless {
            builder = builder.arg("--headless=new");
        }

        builder = builder
            .window_size(profile.viewport_width, profile.viewport_height)
            .arg(format!("--user-agent={}", profile.user_agent));
        for arg in &profile.args {
            builder = builder.arg(arg.as_str());
        }

        builder
            .build()
            .map_err(|e| AppError::Browser(format!("Browser config error: {e}")))
    }
}

/// Locate a Chrome/Chromium binary usable in headless mode.
///
/// Snap's `/snap/bin/chromium` wrapper strips unknown flags, so the real
/// binary inside the snap is preferred.
fn find_chrome_binary() -> Option<PathBuf> {
    if let Ok(p) = std::env::var("CHROME_BIN") {
        let path = PathBuf::from(p);
        if path.exists() {
            return Some(path);
        }
    }

    [
        "/snap/chromium/current/usr/lib/chromium-browser/chrome",
        "/var/lib/flatpak/exports/bin/org.chromium.Chromium",
        "/usr/bin/google-chrome-stable",
        "/usr/bin/google-chrome",
        "/usr/bin/chromium",
        "/usr/bin/chromium-browser",
    ]
    .iter()
    .map(PathBuf::from)
    .find(|p| p.exists())
}

impl AutomationEngine for ChromiumEngine {
    type Handle = ChromiumSession;

    async fn start(&self, profile: &SessionProfile) -> Result<ChromiumSession, AppError> {
        let config = self.config(profile)?;
        let (browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|e| AppError::Browser(format!("Failed to launch browser: {e}")))?;

        // The CDP handler must be polled for the connection to make progress.
        let handler = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    tracing::warn!(error = %e, "Browser CDP handler error");
                    break;
                }
            }
        });

        Ok(ChromiumSession {
            browser: Mutex::new(browser),
            handler,
        })
    }

    async fn fetch(
        &self,
        handle: &ChromiumSession,
        url: &str,
        options: &FetchOptions,
    ) -> Result<String, AppError> {
        let budget = render_budget(options.timeout);
        let started = Instant::now();

        let page = {
            let browser = handle.browser.lock().await;
            tokio::time::timeout(budget, browser.new_page("about:blank"))
                .await
                .map_err(|_| AppError::Timeout(options.timeout))?
                .map_err(|e| AppError::Browser(format!("Failed to open tab: {e}")))?
        };
        let tab = TabGuard::new(page);

        let rendered = tokio::time::timeout(budget.saturating_sub(started.elapsed()), async {
            let page = tab.page()?;
            page.goto(url)
                .await
                .map_err(|e| AppError::Browser(format!("Failed to navigate to {url}: {e}")))?;
            page.find_element(options.wait_for.as_str())
                .await
                .map_err(|e| {
                    AppError::Browser(format!("'{}' never appeared: {e}", options.wait_for))
                })?;
            page.content()
                .await
                .map_err(|e| AppError::Browser(format!("Failed to read page content: {e}")))
        })
        .await;

        tab.close(url).await;

        match rendered {
            Ok(inner) => inner,
            Err(_) => Err(AppError::Timeout(options.timeout)),
        }
    }

    async fn close(&self, handle: &ChromiumSession) -> Result<(), AppError> {
        let result = {
            let mut browser = handle.browser.lock().await;
            browser.close().await
        };
        handle.handler.abort();
        result
            .map(|_| ())
            .map_err(|e| AppError::Browser(format!("Failed to close browser: {e}")))
    }
}
