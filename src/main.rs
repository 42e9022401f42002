//! Binary entry point: crawl the seed domains given on the command line.
//!
//! Worker, depth, and flush-threshold budgets are read from the
//! environment (`SHOPCRAWL_MAX_WORKERS`, `SHOPCRAWL_MAX_DEPTH`,
//! `SHOPCRAWL_PRODUCT_URL_THRESHOLD`) since the invocation takes no flags.

use anyhow::Result;
use shopcrawl::{
    Crawler, DEFAULT_MAX_DEPTH, DEFAULT_MAX_WORKERS, DEFAULT_PRODUCT_URL_THRESHOLD,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

fn env_usize(key: &str, default: usize) -> usize {
    std::env::var(key)
        .ok()
        .and_then(|value| value.parse().ok())
        .unwrap_or(default)
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"))
                .add_directive("chromiumoxide::handler=off".parse()?)
                .add_directive("chromiumoxide::conn=off".parse()?),
        )
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    let seeds: Vec<String> = std::env::args().skip(1).collect();
    if seeds.is_empty() {
        eprintln!("usage: shopcrawl <seed-url>...");
        std::process::exit(2);
    }

    let crawler = Crawler::builder()
        .with_max_workers(env_usize("SHOPCRAWL_MAX_WORKERS", DEFAULT_MAX_WORKERS))
        .with_max_depth(env_usize("SHOPCRAWL_MAX_DEPTH", DEFAULT_MAX_DEPTH))
        .with_product_url_threshold(env_usize(
            "SHOPCRAWL_PRODUCT_URL_THRESHOLD",
            DEFAULT_PRODUCT_URL_THRESHOLD,
        ))
        .build()?;

    tokio::select! {
        result = crawler.crawl_all(&seeds) => {
            crawler.shutdown().await;
            result
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::warn!("interrupted, quitting live browsers");
            crawler.shutdown().await;
            std::process::exit(130);
        }
    }
}
