//! Per-origin `robots.txt` admission control.

use indexmap::IndexMap;
use reqwest::{Client, StatusCode, Url};
use robotstxt::DefaultMatcher;
use tokio::sync::RwLock;
use tokio::time::Duration;

const ROBOTS_FETCH_TIMEOUT: Duration = Duration::from_secs(30);

/// Cache of `robots.txt` bodies keyed by origin (`scheme://host`), filled
/// on the first admission check per origin and kept for the whole run.
pub(crate) struct RobotsGate {
    user_agent: String,
    cache: RwLock<IndexMap<String, String>>,
}

impl RobotsGate {
    pub(crate) fn new<S: Into<String>>(user_agent: S) -> Self {
        Self {
            user_agent: user_agent.into(),
            cache: RwLock::new(IndexMap::new()),
        }
    }

    /// Whether the configured agent may fetch `url` according to the
    /// origin's policy. An empty policy body allows everything.
    pub(crate) async fn allows(&self, client: &Client, url: &Url) -> bool {
        let Some(host) = url.host_str() else {
            return true;
        };
        let origin = format!("{}://{}", url.scheme(), host);

        {
            let cache = self.cache.read().await;
            if let Some(policy) = cache.get(&origin) {
                tracing::debug!(%origin, "cache found for robots.txt");

                return DefaultMatcher::default().one_agent_allowed_by_robots(
                    policy,
                    &self.user_agent,
                    url.as_str(),
                );
            }
        }

        let policy = Self::fetch_policy(client, &origin).await;

        let mut cache = self.cache.write().await;
        let policy = cache.entry(origin).or_insert(policy);

        DefaultMatcher::default().one_agent_allowed_by_robots(
            policy,
            &self.user_agent,
            url.as_str(),
        )
    }

    /// Fetch the origin's `robots.txt`. Any failure, and any status other
    /// than 200, degrades to an empty (allow-all) policy rather than
    /// surfacing as a crawl error.
    async fn fetch_policy(client: &Client, origin: &str) -> String {
        let robots_url = format!("{origin}/robots.txt");
        let response = client
            .get(&robots_url)
            .timeout(ROBOTS_FETCH_TIMEOUT)
            .send()
            .await;

        match response {
            Ok(response) if response.status() == StatusCode::OK => {
                tracing::debug!(%robots_url, "fetched robots.txt");
                response.text().await.unwrap_or_default()
            }
            Ok(response) => {
                tracing::debug!(%robots_url, status = %response.status(), "no usable robots.txt, allowing all");
                String::new()
            }
            Err(error) => {
                tracing::debug!(%robots_url, %error, "robots.txt fetch failed, allowing all");
                String::new()
            }
        }
    }
}
