//! Environment-driven service configuration.

use anyhow::{Context, Result};
use std::env;
use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Config {
    pub bind_addr: SocketAddr,
    pub upstream: UpstreamConfig,
    pub timeouts: TimeoutConfig,
    pub cache_ttl: Duration,
    pub rate_limit: RateLimitConfig,
    pub max_product_count: usize,
    pub default_product_count: usize,
    pub default_category: String,
    pub outbound_concurrency: usize,
    pub chrome_executable: Option<String>,
    /// Peers whose `X-Forwarded-For` header is believed.
    pub trusted_proxies: Vec<IpAddr>,
}

/// Where listings come from and how bare prices are labelled.
#[derive(Debug, Clone)]
pub struct UpstreamConfig {
    pub base_url: String,
    pub search_path: String,
    pub bestsellers_path: String,
    pub currency_symbol: String,
}

impl UpstreamConfig {
    pub fn search_url(&self, query: &str) -> Result<url::Url> {
        let mut url = url::Url::parse(&self.base_url)
            .with_context(|| format!("Invalid upstream base URL '{}'", self.base_url))?
            .join(&self.search_path)
            .context("Invalid upstream search path")?;
        url.query_pairs_mut().append_pair("k", query);
        Ok(url)
    }

    pub fn bestsellers_url(&self) -> Result<url::Url> {
        url::Url::parse(&self.base_url)
            .with_context(|| format!("Invalid upstream base URL '{}'", self.base_url))?
            .join(&self.bestsellers_path)
            .context("Invalid upstream bestsellers path")
    }
}

#[derive(Debug, Clone)]
pub struct TimeoutConfig {
    pub fetch: Duration,
    pub navigation: Duration,
    pub selector: Duration,
    pub request_deadline: Duration,
}

#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    pub max_requests: usize,
    pub window: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 5000)),
            upstream: UpstreamConfig {
                base_url: "https://www.amazon.com".to_string(),
                search_path: "/s".to_string(),
                bestsellers_path: "/gp/bestsellers".to_string(),
                currency_symbol: "$".to_string(),
            },
            timeouts: TimeoutConfig {
                fetch: Duration::from_secs(15),
                navigation: Duration::from_secs(30),
                selector: Duration::from_secs(10),
                request_deadline: Duration::from_secs(45),
            },
            cache_ttl: Duration::from_secs(60 * 10),
            rate_limit: RateLimitConfig {
                max_requests: 10,
                window: Duration::from_secs(60),
            },
            max_product_count: 12,
            default_product_count: 8,
            default_category: "electronics".to_string(),
            outbound_concurrency: 8,
            chrome_executable: None,
            trusted_proxies: Vec::new(),
        }
    }
}

impl Config {
    /// Build from the process environment, falling back to defaults for
    /// anything unset. Malformed values are rejected rather than ignored.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = Self::default();
        let secs = |key: &str, fallback: Duration| -> Result<Duration> {
            parse_or(&lookup, key, fallback.as_secs()).map(Duration::from_secs)
        };

        let max_product_count = parse_or(&lookup, "MAX_PRODUCT_COUNT", defaults.max_product_count)?.max(1);
        let default_product_count = parse_or(&lookup, "DEFAULT_PRODUCT_COUNT", defaults.default_product_count)?
            .clamp(1, max_product_count);

        Ok(Self {
            bind_addr: parse_or(&lookup, "BIND_ADDR", defaults.bind_addr)?,
            upstream: UpstreamConfig {
                base_url: lookup("UPSTREAM_BASE_URL").unwrap_or(defaults.upstream.base_url),
                search_path: lookup("UPSTREAM_SEARCH_PATH").unwrap_or(defaults.upstream.search_path),
                bestsellers_path: lookup("UPSTREAM_BESTSELLERS_PATH")
                    .unwrap_or(defaults.upstream.bestsellers_path),
                currency_symbol: lookup("CURRENCY_SYMBOL").unwrap_or(defaults.upstream.currency_symbol),
            },
            timeouts: TimeoutConfig {
                fetch: secs("FETCH_TIMEOUT_SECS", defaults.timeouts.fetch)?,
                navigation: secs("NAVIGATION_TIMEOUT_SECS", defaults.timeouts.navigation)?,
                selector: secs("SELECTOR_TIMEOUT_SECS", defaults.timeouts.selector)?,
                request_deadline: secs("REQUEST_DEADLINE_SECS", defaults.timeouts.request_deadline)?,
            },
            cache_ttl: secs("CACHE_TTL_SECS", defaults.cache_ttl)?,
            rate_limit: RateLimitConfig {
                max_requests: parse_or(&lookup, "RATE_LIMIT_MAX", defaults.rate_limit.max_requests)?,
                window: secs("RATE_LIMIT_WINDOW_SECS", defaults.rate_limit.window)?,
            },
            max_product_count,
            default_product_count,
            default_category: lookup("DEFAULT_CATEGORY")
                .filter(|c| !c.trim().is_empty())
                .unwrap_or(defaults.default_category),
            outbound_concurrency: parse_or(&lookup, "OUTBOUND_CONCURRENCY", defaults.outbound_concurrency)?.max(1),
            chrome_executable: lookup("CHROME_EXECUTABLE").filter(|p| !p.is_empty()),
            trusted_proxies: parse_list(&lookup, "TRUSTED_PROXIES")?,
        })
    }
}

fn parse_list<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Vec<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    lookup(key)
        .unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(|item| {
            item.parse::<T>()
                .with_context(|| format!("Invalid entry in {}: '{}'", key, item))
        })
        .collect()
}

fn parse_or<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, fallback: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .with_context(|| format!("Invalid value for {}: '{}'", key, raw)),
        None => Ok(fallback),
    }
}
