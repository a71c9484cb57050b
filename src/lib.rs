pub mod api;
pub mod browser;
pub mod cache;
pub mod config;
pub mod error;
pub mod lightweight;
pub mod rate_limit;
pub mod search;
pub mod selectors;
pub mod trending;
pub mod types;

use anyhow::Context;
use std::env;
use std::path::Path;
use std::sync::Arc;
use tracing::info;

use browser::BrowserManager;
use cache::ResultCache;
use config::Config;
use lightweight::LightweightExtractor;
use rate_limit::RateLimiter;
use search::{ListingSource, SearchOrchestrator};
use trending::{BestSellerFetcher, TrendingFeed, TrendingSource};

pub use types::*;

const CERT_DIR: &str = "/app/certificates";

/// Everything a request handler needs. Built once at startup; the browser
/// is released by `shutdown`.
pub struct AppState {
    pub config: Config,
    pub cache: ResultCache,
    pub rate_limiter: RateLimiter,
    pub orchestrator: SearchOrchestrator,
    pub trending: TrendingFeed,
    pub browser: Option<Arc<BrowserManager>>,
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("upstream", &self.config.upstream.base_url)
            .field("cache_ttl", &self.cache.ttl())
            .field("browser_enabled", &self.browser.is_some())
            .finish()
    }
}

impl AppState {
    pub fn new(config: Config, http_client: reqwest::Client) -> Self {
        let outbound_limit = Arc::new(tokio::sync::Semaphore::new(config.outbound_concurrency));
        let lightweight = Arc::new(LightweightExtractor::new(
            http_client,
            config.upstream.clone(),
            outbound_limit,
        ));
        let browser = Arc::new(BrowserManager::new(&config));
        let trending = Arc::new(BestSellerFetcher::new(lightweight.clone()));

        let mut state = Self::with_sources(config, lightweight, browser.clone(), trending);
        state.browser = Some(browser);
        state
    }

    /// Wire the service around arbitrary extraction tiers.
    pub fn with_sources(
        config: Config,
        lightweight: Arc<dyn ListingSource>,
        browser: Arc<dyn ListingSource>,
        trending: Arc<dyn TrendingSource>,
    ) -> Self {
        let cache = ResultCache::new(config.cache_ttl);
        let deadline = config.timeouts.request_deadline;
        Self {
            rate_limiter: RateLimiter::new(config.rate_limit.max_requests, config.rate_limit.window),
            orchestrator: SearchOrchestrator::new(lightweight, browser, cache.clone(), deadline),
            trending: TrendingFeed::new(trending, cache.clone(), deadline, config.max_product_count),
            cache,
            browser: None,
            config,
        }
    }

    pub async fn shutdown(&self) {
        if let Some(browser) = &self.browser {
            browser.close().await;
        }
    }
}

pub fn build_http_client(config: &Config) -> anyhow::Result<reqwest::Client> {
    let mut builder = reqwest::Client::builder()
        .timeout(config.timeouts.fetch)
        .redirect(reqwest::redirect::Policy::limited(10));

    if let Ok(ca_cert_name) = env::var("TLS_CA_CERT") {
        let cert_path = Path::new(CERT_DIR).join(&ca_cert_name);
        let pem = std::fs::read(&cert_path)
            .with_context(|| format!("Failed to read TLS CA certificate at {}", cert_path.display()))?;
        let cert = reqwest::Certificate::from_pem(&pem)
            .with_context(|| format!("Failed to parse TLS CA certificate at {}", cert_path.display()))?;
        info!("Loaded TLS CA certificate from {}", cert_path.display());
        builder = builder.add_root_certificate(cert);
    }

    builder.build().context("Failed to build HTTP client")
}
