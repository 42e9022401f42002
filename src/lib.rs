//! The `shopcrawl` web crawler discovers and persists product-detail page
//! URLs across a configured set of e-commerce domains. It respects
//! `robots.txt`, keeps each traversal same-origin with its seed, and
//! escalates to a headless browser when a page yields no product links
//! through static HTML.

use anyhow::Result;
use std::path::PathBuf;

mod classify;
mod crawler;
mod render;
mod robots;
mod sink;

pub use crawler::Crawler;
pub use sink::ChunkedWriter;

pub const USER_AGENT: &str = "CustomWebCrawler/1.0";

// Default configuration constants.
pub const DEFAULT_MAX_DEPTH: usize = 300;
pub const DEFAULT_MAX_WORKERS: usize = 10;
pub const DEFAULT_PRODUCT_URL_THRESHOLD: usize = 10_000;
pub const DEFAULT_OUTPUT_DIR: &str = "final";

/// Configuration parameters for the `Crawler`.
/// Defines bounds and behaviors for the crawling process.
pub(crate) struct CrawlerConfig {
    pub(crate) user_agent: String,
    pub(crate) max_depth: usize,
    pub(crate) max_workers: usize,
    pub(crate) product_url_threshold: usize,
    pub(crate) output_dir: PathBuf,
    pub(crate) robots: bool,
    pub(crate) render: bool,
}

impl Default for CrawlerConfig {
    /// Default configuration for the crawler.
    fn default() -> Self {
        Self {
            user_agent: USER_AGENT.into(),
            max_depth: DEFAULT_MAX_DEPTH,
            max_workers: DEFAULT_MAX_WORKERS,
            product_url_threshold: DEFAULT_PRODUCT_URL_THRESHOLD,
            output_dir: DEFAULT_OUTPUT_DIR.into(),
            robots: true,
            render: true,
        }
    }
}

/// Builder pattern for `Crawler`. Allows for customizable configurations.
pub struct CrawlerBuilder {
    config: CrawlerConfig,
}

impl Default for CrawlerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl CrawlerBuilder {
    /// Initializes a new builder with default configuration.
    pub fn new() -> Self {
        CrawlerBuilder {
            config: CrawlerConfig::default(),
        }
    }

    /// Set a specific maximum depth for the traversal. Links discovered
    /// past this depth are not expanded.
    pub fn with_max_depth(mut self, depth: usize) -> Self {
        self.config.max_depth = depth;
        self
    }

    /// Set the worker budget. In-flight HTTP fetches are capped at twice
    /// this value; concurrent browser renders at exactly this value.
    pub fn with_max_workers(mut self, workers: usize) -> Self {
        self.config.max_workers = workers;
        self
    }

    /// Set how many product URLs a domain accumulates before its buffer is
    /// flushed to chunked files.
    pub fn with_product_url_threshold(mut self, threshold: usize) -> Self {
        self.config.product_url_threshold = threshold;
        self
    }

    /// Set the root directory for product files and run summaries.
    pub fn with_output_dir<P: Into<PathBuf>>(mut self, dir: P) -> Self {
        self.config.output_dir = dir.into();
        self
    }

    /// Enable or disable `robots.txt` handling
    pub fn with_robots(mut self, robots: bool) -> Self {
        self.config.robots = robots;
        self
    }

    /// Enable or disable the headless-browser fallback for pages whose
    /// static HTML yields no product links
    pub fn with_render(mut self, render: bool) -> Self {
        self.config.render = render;
        self
    }

    /// Set a custom user agent
    pub fn with_user_agent<S: AsRef<str>>(mut self, user_agent: S) -> Self {
        self.config.user_agent = user_agent.as_ref().into();
        self
    }

    /// Consumes the builder and returns a configured `Crawler` instance.
    pub fn build(self) -> Result<Crawler> {
        Crawler::from_config(self.config)
    }
}
