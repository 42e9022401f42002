//! URL admission predicates and the sibling-ordering priority function.

use regex::RegexSet;
use reqwest::Url;
use std::sync::OnceLock;

/// Product URL patterns, matched by substring search over the whole URL.
const PRODUCT_PATTERNS: &[&str] = &[
    r"/product/",
    r"/products/",
    r"/item/",
    r"/items/",
    r"/p/",
    r"/[A-Za-z0-9-]+-p-\d+",
];

/// Path keywords that mark a link as likely to lead to products.
const PRIORITY_KEYWORDS: &[&str] = &[
    "sale",
    "new",
    "best",
    "hot",
    "trending",
    "special",
    "limited",
    "collectible",
    "category",
    "categories",
    "collection",
    "shop",
    "store",
    "buy",
    "purchase",
];

/// File extensions that are never worth fetching.
const IGNORED_EXTENSIONS: &[&str] = &[".jpg", ".jpeg", ".png", ".gif", ".pdf", ".css", ".js"];

/// Path prefixes excluded from the traversal.
const RESTRICTED_PATHS: &[&str] = &[
    "/about", "/blog", "/news", "/contact", "/faq", "/terms", "/privacy", "/account", "/login",
    "/signup", "/cart", "/checkout", "/order", "/career", "/job",
];

fn product_patterns() -> &'static RegexSet {
    static PATTERNS: OnceLock<RegexSet> = OnceLock::new();
    PATTERNS.get_or_init(|| RegexSet::new(PRODUCT_PATTERNS).expect("product patterns are valid"))
}

/// True iff both URLs carry a host and the hosts are equal. Parsed URLs
/// always have a scheme and an already-lowercased host.
pub(crate) fn is_same_origin(url: &Url, base: &Url) -> bool {
    matches!((url.host_str(), base.host_str()), (Some(a), Some(b)) if a == b)
}

/// True unless the path sits under a restricted prefix or ends in an
/// ignored file extension.
pub(crate) fn should_crawl(url: &Url) -> bool {
    let path = url.path();
    if RESTRICTED_PATHS
        .iter()
        .any(|restricted| path.starts_with(restricted))
    {
        return false;
    }

    match file_extension(path) {
        Some(extension) => !IGNORED_EXTENSIONS
            .iter()
            .any(|ignored| extension.eq_ignore_ascii_case(ignored)),
        None => true,
    }
}

/// Extension of the last path segment, dot included. A leading dot alone
/// does not count as an extension.
fn file_extension(path: &str) -> Option<&str> {
    let segment = path.rsplit('/').next()?;
    match segment.rfind('.') {
        Some(index) if index > 0 => Some(&segment[index..]),
        _ => None,
    }
}

/// True iff the URL matches any product pattern.
pub(crate) fn is_product(url: &Url) -> bool {
    product_patterns().is_match(url.as_str())
}

/// Score in [0, 1] used to order sibling links at scheduling time.
/// Product URLs are pinned to 1.0; keyword paths decay from 1.0 towards
/// 0.5 with depth; everything else decays from 1.0 towards 0.
pub(crate) fn assign_priority(url: &Url, depth: usize) -> f64 {
    let depth_factor = 1.0 / (1.0 + depth as f64);

    if is_product(url) {
        return 1.0;
    }

    let path = url.path().to_ascii_lowercase();
    if PRIORITY_KEYWORDS
        .iter()
        .any(|keyword| path.contains(keyword))
    {
        return 0.5 + 0.5 * depth_factor;
    }

    depth_factor
}
