//! Headless-browser fallback for pages that only materialize their product
//! grid through client-side JavaScript. Browsers are pooled and reused;
//! concurrent renders are capped at the configured worker count.

use anyhow::{Context, Result};
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::Page;
use futures::StreamExt;
use reqwest::Url;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout, Duration};

const PAGE_LOAD_TIMEOUT: Duration = Duration::from_secs(30);
const BODY_WAIT_TIMEOUT: Duration = Duration::from_secs(10);
const BODY_POLL_INTERVAL: Duration = Duration::from_millis(250);
const SCROLL_SETTLE_INTERVAL: Duration = Duration::from_secs(2);

/// Outcome of a render attempt. Timeouts are reported separately so the
/// engine can record them; every other failure collapses to an empty page.
pub(crate) enum Rendered {
    Html(String),
    Timeout,
    Empty,
}

enum RenderError {
    Timeout,
    Other(anyhow::Error),
}

impl RenderError {
    fn other<E: Into<anyhow::Error>>(error: E) -> Self {
        RenderError::Other(error.into())
    }
}

/// A launched browser together with its CDP event-handler task.
struct PooledBrowser {
    browser: Browser,
    handler: JoinHandle<()>,
}

impl PooledBrowser {
    /// Close the browser process and stop its handler task.
    async fn quit(mut self) {
        if let Err(error) = self.browser.close().await {
            tracing::warn!(%error, "failed to close browser");
        }
        let _ = self.browser.wait().await;
        self.handler.abort();
    }
}

/// Pool of reusable headless browsers. Instances are launched lazily on
/// first use and health-checked before being handed out again.
pub(crate) struct BrowserPool {
    user_agent: String,
    permits: Arc<Semaphore>,
    idle: Arc<Mutex<VecDeque<PooledBrowser>>>,
}

impl BrowserPool {
    pub(crate) fn new(size: usize, user_agent: String) -> Self {
        Self {
            user_agent,
            permits: Arc::new(Semaphore::new(size.max(1))),
            idle: Arc::new(Mutex::new(VecDeque::new())),
        }
    }

    /// Navigate to `url`, scroll until the page height settles, and return
    /// the final DOM HTML. The acquired browser is always given back, or
    /// quit outright when the render went wrong.
    #[tracing::instrument(skip(self))]
    pub(crate) async fn render(&self, url: &Url) -> Rendered {
        let guard = match self.acquire().await {
            Ok(guard) => guard,
            Err(error) => {
                tracing::warn!(%url, %error, "no browser available for render");
                return Rendered::Empty;
            }
        };

        match render_page(guard.browser(), url).await {
            Ok(html) => Rendered::Html(html),
            Err(RenderError::Timeout) => {
                tracing::warn!(%url, "render timed out");
                guard.discard().await;
                Rendered::Timeout
            }
            Err(RenderError::Other(error)) => {
                tracing::warn!(%url, %error, "render failed");
                guard.discard().await;
                Rendered::Empty
            }
        }
    }

    async fn acquire(&self) -> Result<BrowserGuard> {
        let permit = Arc::clone(&self.permits)
            .acquire_owned()
            .await
            .context("render pool closed")?;

        loop {
            let candidate = self.idle.lock().await.pop_front();
            let Some(pooled) = candidate else { break };

            // Health check before handing out a reused instance.
            match pooled.browser.version().await {
                Ok(_) => {
                    return Ok(BrowserGuard {
                        browser: Some(pooled),
                        idle: Arc::clone(&self.idle),
                        _permit: permit,
                    })
                }
                Err(error) => {
                    tracing::debug!(%error, "pooled browser failed health check");
                    pooled.quit().await;
                }
            }
        }

        let pooled = self.launch().await?;
        Ok(BrowserGuard {
            browser: Some(pooled),
            idle: Arc::clone(&self.idle),
            _permit: permit,
        })
    }

    async fn launch(&self) -> Result<PooledBrowser> {
        // The config builder defaults to headless.
        let config = BrowserConfig::builder()
            .request_timeout(PAGE_LOAD_TIMEOUT)
            .arg(format!("--user-agent={}", self.user_agent))
            .arg("--no-sandbox")
            .arg("--disable-dev-shm-usage")
            .arg("--disable-gpu")
            .arg("--disable-extensions")
            .build()
            .map_err(|error| anyhow::anyhow!("failed to build browser config: {error}"))?;

        let (browser, mut handler) = Browser::launch(config)
            .await
            .context("failed to launch headless browser")?;

        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(error) = event {
                    tracing::trace!(%error, "browser handler event");
                }
            }
        });

        tracing::debug!("launched headless browser");
        Ok(PooledBrowser {
            browser,
            handler: handler_task,
        })
    }

    /// Quit every idle browser. Renders in flight keep their instance until
    /// their guard resolves.
    pub(crate) async fn shutdown(&self) {
        let mut idle = self.idle.lock().await;
        while let Some(pooled) = idle.pop_front() {
            pooled.quit().await;
        }
    }
}

/// Hands the browser back to the pool on drop unless it was discarded.
struct BrowserGuard {
    browser: Option<PooledBrowser>,
    idle: Arc<Mutex<VecDeque<PooledBrowser>>>,
    _permit: OwnedSemaphorePermit,
}

impl BrowserGuard {
    fn browser(&self) -> Option<&Browser> {
        self.browser.as_ref().map(|pooled| &pooled.browser)
    }

    /// Quit this browser instead of returning it to the pool.
    async fn discard(mut self) {
        if let Some(pooled) = self.browser.take() {
            pooled.quit().await;
        }
    }
}

impl Drop for BrowserGuard {
    fn drop(&mut self) {
        if let Some(pooled) = self.browser.take() {
            let idle = Arc::clone(&self.idle);
            tokio::spawn(async move {
                idle.lock().await.push_back(pooled);
            });
        }
    }
}

async fn render_page(browser: Option<&Browser>, url: &Url) -> Result<String, RenderError> {
    let browser = browser.ok_or_else(|| RenderError::Other(anyhow::anyhow!("browser gone")))?;
    let page = browser
        .new_page("about:blank")
        .await
        .map_err(RenderError::other)?;

    let result = drive_page(&page, url).await;

    if let Err(error) = page.close().await {
        tracing::debug!(%error, "failed to close page");
    }

    result
}

/// Navigate, wait for `<body>`, then scroll to the bottom until two
/// consecutive height measurements agree, so lazy-loaded product grids have
/// a chance to materialize.
async fn drive_page(page: &Page, url: &Url) -> Result<String, RenderError> {
    timeout(PAGE_LOAD_TIMEOUT, page.goto(url.as_str()))
        .await
        .map_err(|_| RenderError::Timeout)?
        .map_err(RenderError::other)?;

    wait_for_body(page).await?;

    let mut last_height = scroll_height(page).await.map_err(RenderError::other)?;
    loop {
        page.evaluate("window.scrollTo(0, document.body.scrollHeight);")
            .await
            .map_err(RenderError::other)?;
        sleep(SCROLL_SETTLE_INTERVAL).await;

        let new_height = scroll_height(page).await.map_err(RenderError::other)?;
        if new_height == last_height {
            break;
        }
        last_height = new_height;
    }

    page.content().await.map_err(RenderError::other)
}

async fn wait_for_body(page: &Page) -> Result<(), RenderError> {
    let body_present = async {
        while page.find_element("body").await.is_err() {
            sleep(BODY_POLL_INTERVAL).await;
        }
    };

    timeout(BODY_WAIT_TIMEOUT, body_present)
        .await
        .map_err(|_| RenderError::Timeout)
}

async fn scroll_height(page: &Page) -> Result<i64> {
    let height = page
        .evaluate("document.body.scrollHeight")
        .await?
        .into_value::<i64>()?;
    Ok(height)
}
