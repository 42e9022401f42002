//! The traversal engine: a bounded-concurrency, per-domain, depth-limited
//! expansion of the hyperlink graph with dedup, robots admission, the
//! two-tier fetch, and product routing into the sink.

use anyhow::{Context, Result};
use futures::future::join_all;
use indexmap::IndexMap;
use reqwest::header::HeaderValue;
use reqwest::{Client, Url};
use scraper::{Html, Selector};
use std::collections::HashSet;
use tokio::sync::{Mutex, RwLock, Semaphore};
use tokio::time::Duration;

use crate::classify;
use crate::render::{BrowserPool, Rendered};
use crate::robots::RobotsGate;
use crate::sink::ProductSink;
use crate::{CrawlerBuilder, CrawlerConfig};

const FETCH_TIMEOUT: Duration = Duration::from_secs(30);

/// A seed domain. The URL as supplied is kept for reporting; the parsed
/// form drives the traversal.
struct Seed {
    raw: String,
    host: String,
    url: Url,
}

/// A URL paired with the text it was received as. The parsed form drives
/// identity and classification (hosts compare case-insensitively there);
/// `received` keeps the original scheme/host casing for everything written
/// to output files. Fragments are stripped from both on construction.
#[derive(Debug)]
struct CrawlUrl {
    url: Url,
    received: String,
}

impl CrawlUrl {
    fn new(mut url: Url, text: &str) -> Self {
        url.set_fragment(None);
        Self {
            received: strip_fragment(text).to_string(),
            url,
        }
    }

    /// A link resolved against `base`. An absolute href keeps its own
    /// text; a relative one inherits the scheme and host exactly as the
    /// base was received.
    fn resolved(href: &str, resolved: Url, base: &CrawlUrl) -> Self {
        let href = strip_fragment(href);
        if Url::parse(href).is_ok() {
            return Self::new(resolved, href);
        }

        let mut received = origin_text(&base.received).to_string();
        received.push_str(resolved.path());
        if let Some(query) = resolved.query() {
            received.push('?');
            received.push_str(query);
        }
        Self::new(resolved, &received)
    }
}

/// Drop a `#fragment` suffix, if any.
fn strip_fragment(text: &str) -> &str {
    match text.find('#') {
        Some(index) => &text[..index],
        None => text,
    }
}

/// The `scheme://authority` prefix of a received URL string.
fn origin_text(received: &str) -> &str {
    let Some(authority_start) = received.find("://").map(|index| index + 3) else {
        return received;
    };
    match received[authority_start..].find(|c| c == '/' || c == '?') {
        Some(end) => &received[..authority_start + end],
        None => received,
    }
}

/// Mutable crawl state, one instance per `crawl_all` run so concurrent
/// crawls never share visited sets or sinks.
struct CrawlRun {
    /// Caps total in-flight HTTP fetches at `2 * max_workers`.
    semaphore: Semaphore,
    /// Check-and-insert must be atomic with respect to sibling tasks.
    visited: Mutex<HashSet<Url>>,
    /// Diagnostic only; never consulted by control flow.
    parent_child: RwLock<IndexMap<Url, HashSet<Url>>>,
    priorities: RwLock<IndexMap<Url, f64>>,
    disallowed: RwLock<HashSet<String>>,
    render_timeouts: RwLock<HashSet<String>>,
    sink: ProductSink,
}

/// Main structure for the `Crawler` containing the HTTP client, the robots
/// gate, and the browser pool shared across runs.
pub struct Crawler {
    config: CrawlerConfig,
    client: Client,
    robots: RobotsGate,
    render_pool: BrowserPool,
}

impl Crawler {
    /// Initializes the crawler with a given configuration.
    pub(crate) fn from_config(config: CrawlerConfig) -> Result<Self> {
        let client = Client::builder()
            .user_agent(config.user_agent.as_str())
            // Pool sizing never exceeds the fetch semaphore capacity.
            .pool_max_idle_per_host(config.max_workers * 2)
            .build()?;

        Ok(Self {
            robots: RobotsGate::new(config.user_agent.clone()),
            render_pool: BrowserPool::new(config.max_workers, config.user_agent.clone()),
            client,
            config,
        })
    }

    /// Initializes a new `Crawler` instance with the default configuration.
    pub fn new() -> Result<Self> {
        Self::from_config(CrawlerConfig::default())
    }

    /// Returns a builder for customized configurations.
    pub fn builder() -> CrawlerBuilder {
        CrawlerBuilder::new()
    }

    /// Crawls every seed domain to completion, then drains the product
    /// sink and writes the run summaries beneath the output directory.
    ///
    /// Per-URL failures are logged and swallowed; only seed validation and
    /// sink filesystem errors surface here.
    #[tracing::instrument(skip(self, seeds))]
    pub async fn crawl_all<S: AsRef<str>>(&self, seeds: &[S]) -> Result<()> {
        let seeds = seeds
            .iter()
            .map(|seed| {
                let raw = seed.as_ref().to_string();
                let url = Url::parse(&raw).with_context(|| format!("invalid seed URL: {raw}"))?;
                let host = url
                    .host_str()
                    .map(str::to_string)
                    .ok_or_else(|| anyhow::anyhow!("seed URL has no host: {raw}"))?;
                Ok(Seed { raw, host, url })
            })
            .collect::<Result<Vec<Seed>>>()?;

        self.initialize_domain_folders(&seeds).await?;

        let run = CrawlRun {
            semaphore: Semaphore::new(self.config.max_workers * 2),
            visited: Mutex::new(HashSet::new()),
            parent_child: RwLock::new(IndexMap::new()),
            priorities: RwLock::new(IndexMap::new()),
            disallowed: RwLock::new(HashSet::new()),
            render_timeouts: RwLock::new(HashSet::new()),
            sink: ProductSink::new(
                self.config.output_dir.clone(),
                self.config.product_url_threshold,
            ),
        };

        join_all(seeds.iter().map(|seed| {
            let start = CrawlUrl::new(seed.url.clone(), &seed.raw);
            self.crawl(&run, start, None, 0)
        }))
        .await
        .into_iter()
        .collect::<Result<Vec<()>>>()?;

        run.sink
            .finish(seeds.iter().map(|seed| (seed.host.as_str(), seed.raw.as_str())))
            .await?;

        tracing::debug!(
            urls = run.priorities.read().await.len(),
            pages_with_children = run.parent_child.read().await.len(),
            "traversal diagnostics"
        );

        self.save_results(&run, &seeds).await?;

        tracing::info!("all crawling completed");
        Ok(())
    }

    /// Quit any live pooled browser instances. `crawl_all` does not do this
    /// on completion so that a subsequent run can reuse warm browsers; call
    /// it once the crawler is done for good, and on cancellation.
    pub async fn shutdown(&self) {
        self.render_pool.shutdown().await;
    }

    /// Asynchronously crawls a URL: dedup, robots admission, product
    /// routing, the two-tier fetch, and priority-ordered expansion of the
    /// children. Returns `Err` only for sink filesystem failures.
    #[async_recursion::async_recursion]
    #[tracing::instrument(skip(self, run, parent))]
    async fn crawl(
        &self,
        run: &CrawlRun,
        link: CrawlUrl,
        parent: Option<Url>,
        depth: usize,
    ) -> Result<()> {
        if depth > self.config.max_depth {
            return Ok(());
        }

        if !run.visited.lock().await.insert(link.url.clone()) {
            return Ok(());
        }

        tracing::info!(url = %link.url, depth, "crawling");

        if let Some(parent) = parent {
            run.parent_child
                .write()
                .await
                .entry(parent)
                .or_insert_with(HashSet::new)
                .insert(link.url.clone());
        }

        run.priorities
            .write()
            .await
            .insert(link.url.clone(), classify::assign_priority(&link.url, depth));

        if self.config.robots && !self.robots.allows(&self.client, &link.url).await {
            tracing::debug!(url = %link.url, "disallowed by robots.txt");
            run.disallowed.write().await.insert(link.received);
            return Ok(());
        }

        // Product pages are terminal: recorded, never expanded for children.
        if classify::is_product(&link.url) {
            tracing::info!(url = %link.url, depth, "product URL");
            if let Some(host) = link.url.host_str() {
                run.sink.add(host, &link.received).await?;
            }
            return Ok(());
        }

        let content = {
            let permit = run.semaphore.acquire().await;
            let fetched = self.fetch(&link.url).await;
            drop(permit);

            match fetched {
                Ok(content) => content,
                Err(error) => {
                    tracing::warn!(url = %link.url, %error, "fetch failed");
                    return Ok(());
                }
            }
        };

        let mut links = self.extract_links(&link, &content);

        // Static HTML without a single product link suggests a
        // client-rendered catalog; retry through the browser before moving on.
        if self.config.render && !links.iter().any(|child| classify::is_product(&child.url)) {
            tracing::info!(url = %link.url, "no product links in static HTML, escalating to render");
            let rendered = match self.render_pool.render(&link.url).await {
                Rendered::Html(html) => html,
                Rendered::Timeout => {
                    run.render_timeouts.write().await.insert(link.received.clone());
                    String::new()
                }
                Rendered::Empty => String::new(),
            };
            links = self.extract_links(&link, &rendered);
        }

        tracing::debug!(url = %link.url, links = links.len(), "extracted links");

        // Highest-priority siblings are scheduled first; the sort is stable
        // so document order breaks ties.
        let mut scored: Vec<(f64, CrawlUrl)> = links
            .into_iter()
            .map(|child| (classify::assign_priority(&child.url, depth + 1), child))
            .collect();
        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));

        join_all(
            scored
                .into_iter()
                .map(|(_, child)| self.crawl(run, child, Some(link.url.clone()), depth + 1)),
        )
        .await
        .into_iter()
        .collect::<Result<Vec<()>>>()?;

        tracing::debug!(url = %link.url, "finished crawling URL");
        Ok(())
    }

    /// HTTP tier: a plain GET with the crawl user agent. Non-2xx bodies
    /// are returned as-is; transport errors propagate to the caller.
    async fn fetch(&self, url: &Url) -> Result<String> {
        let response = self
            .client
            .get(url.clone())
            .timeout(FETCH_TIMEOUT)
            .send()
            .await?;

        // Challenge interstitials carry no crawlable content; skip them.
        if response.headers().get("cf-mitigated") == Some(&HeaderValue::from_static("challenge")) {
            tracing::debug!(%url, "Cloudflare mitigation found, skipping this URL");
            return Ok(String::new());
        }

        Ok(response.text().await?)
    }

    /// Extracts hyperlinks from the HTML content: absolute, same-origin,
    /// crawlable links in document order. Malformed HTML tolerantly yields
    /// whatever anchors the parser recovers.
    fn extract_links(&self, base: &CrawlUrl, content: &str) -> Vec<CrawlUrl> {
        let document = Html::parse_document(content);
        let Ok(selector) = Selector::parse("a") else {
            return Vec::new();
        };

        document
            .select(&selector)
            .filter_map(|element| element.value().attr("href"))
            .filter_map(|href| {
                let resolved = base.url.join(href).ok()?;
                if classify::is_same_origin(&resolved, &base.url)
                    && classify::should_crawl(&resolved)
                {
                    Some(CrawlUrl::resolved(href, resolved, base))
                } else {
                    None
                }
            })
            .collect()
    }

    async fn initialize_domain_folders(&self, seeds: &[Seed]) -> Result<()> {
        for seed in seeds {
            let folder = self.config.output_dir.join(&seed.host);
            tokio::fs::create_dir_all(&folder)
                .await
                .with_context(|| format!("failed to create directory {}", folder.display()))?;
        }
        tracing::info!("initialized folders for all domains");
        Ok(())
    }

    /// Writes `disallowed_urls.txt`, `selenium_timeout_urls.txt`, and the
    /// per-domain crawl summary.
    async fn save_results(&self, run: &CrawlRun, seeds: &[Seed]) -> Result<()> {
        let disallowed = run.disallowed.read().await;
        let render_timeouts = run.render_timeouts.read().await;
        let visited = run.visited.lock().await;
        let flush_counts = run.sink.flush_counts().await;

        let mut lines = String::new();
        for url in disallowed.iter() {
            lines.push_str(url);
            lines.push('\n');
        }
        let path = self.config.output_dir.join("disallowed_urls.txt");
        tokio::fs::write(&path, lines)
            .await
            .with_context(|| format!("failed to write {}", path.display()))?;

        let mut lines = String::new();
        for url in render_timeouts.iter() {
            lines.push_str(url);
            lines.push('\n');
        }
        let path = self.config.output_dir.join("selenium_timeout_urls.txt");
        tokio::fs::write(&path, lines)
            .await
            .with_context(|| format!("failed to write {}", path.display()))?;

        let mut summary = String::new();
        for seed in seeds {
            let crawled = visited
                .iter()
                .filter(|visited_url| visited_url.host_str() == Some(seed.host.as_str()))
                .count();
            summary.push_str(&format!("Domain: {}\n", seed.host));
            summary.push_str(&format!(
                "  Total product URL files: {}\n",
                flush_counts.get(&seed.host).copied().unwrap_or(0)
            ));
            summary.push_str(&format!("  Total URLs crawled: {crawled}\n"));
            summary.push('\n');
        }
        summary.push_str(&format!(
            "Total unique URLs crawled across all domains: {}\n",
            visited.len()
        ));
        summary.push_str(&format!("Total disallowed URLs: {}\n", disallowed.len()));
        summary.push_str(&format!(
            "Total Selenium timeout URLs: {}\n",
            render_timeouts.len()
        ));

        let path = self.config.output_dir.join("crawl_summary.txt");
        tokio::fs::write(&path, summary)
            .await
            .with_context(|| format!("failed to write {}", path.display()))?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base(text: &str) -> CrawlUrl {
        CrawlUrl::new(Url::parse(text).expect("base URL"), text)
    }

    #[test]
    fn absolute_links_keep_their_received_casing() {
        let base = base("https://Shop.Example.com");
        let href = "HTTPS://Shop.Example.com/products/Widget-A";
        let resolved = base.url.join(href).expect("join");
        let link = CrawlUrl::resolved(href, resolved, &base);

        assert_eq!(link.received, href);
        assert_eq!(link.url.as_str(), "https://shop.example.com/products/Widget-A");
    }

    #[test]
    fn relative_links_inherit_the_received_origin() {
        let base = base("https://Shop.Example.com/catalog?page=2#top");
        let resolved = base.url.join("/products/a?ref=1#reviews").expect("join");
        let link = CrawlUrl::resolved("/products/a?ref=1#reviews", resolved, &base);

        assert_eq!(link.received, "https://Shop.Example.com/products/a?ref=1");
        assert_eq!(link.url.host_str(), Some("shop.example.com"));
    }

    #[test]
    fn fragments_are_stripped_from_both_forms() {
        let link = base("https://Shop.Example.com/products/a#reviews");
        assert_eq!(link.received, "https://Shop.Example.com/products/a");
        assert_eq!(link.url.fragment(), None);
    }
}
