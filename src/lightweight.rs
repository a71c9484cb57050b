use async_trait::async_trait;
use rand::Rng;
use reqwest::Client;
use scraper::Html;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};
use url::Url;

use crate::config::UpstreamConfig;
use crate::error::{AcquisitionError, AcquisitionResult};
use crate::search::ListingSource;
use crate::selectors::{self, CardPattern};
use crate::types::ProductListing;

/// User agents for rotation
pub const USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:125.0) Gecko/20100101 Firefox/125.0",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.4 Safari/605.1.15",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36",
];

pub fn random_user_agent() -> &'static str {
    let mut rng = rand::thread_rng();
    USER_AGENTS[rng.gen_range(0..USER_AGENTS.len())]
}

/// Plain-HTTP product extraction: one GET, one HTML parse, no browser.
pub struct LightweightExtractor {
    client: Client,
    upstream: UpstreamConfig,
    outbound_limit: Arc<Semaphore>,
}

impl LightweightExtractor {
    pub fn new(client: Client, upstream: UpstreamConfig, outbound_limit: Arc<Semaphore>) -> Self {
        Self {
            client,
            upstream,
            outbound_limit,
        }
    }

    pub fn upstream(&self) -> &UpstreamConfig {
        &self.upstream
    }

    /// GET a page with browser-like headers and return its body.
    /// Non-2xx statuses are errors.
    pub async fn fetch_page(&self, url: &Url) -> AcquisitionResult<String> {
        let _permit = self
            .outbound_limit
            .acquire()
            .await
            .map_err(|e| AcquisitionError::Network(e.to_string()))?;

        debug!("Fetching {}", url);
        let response = self
            .client
            .get(url.as_str())
            .header("User-Agent", random_user_agent())
            .header("Accept", "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8")
            .header("Accept-Language", "en-US,en;q=0.9")
            .header("Cache-Control", "no-cache")
            .header("Pragma", "no-cache")
            .header("DNT", "1")
            .header("Connection", "keep-alive")
            .header("Upgrade-Insecure-Requests", "1")
            .send()
            .await?
            .error_for_status()?;

        Ok(response.text().await?)
    }

    /// Parse `html` with `pattern`, returning at most `limit` listings.
    /// A robot-check page is reported as `Blocked` rather than as no results.
    pub fn parse_listings(
        &self,
        html: &str,
        pattern: &CardPattern,
        base: &Url,
        limit: usize,
    ) -> AcquisitionResult<Vec<ProductListing>> {
        parse_listings(html, pattern, base, &self.upstream.currency_symbol, limit)
    }
}

pub fn parse_listings(
    html: &str,
    pattern: &CardPattern,
    base: &Url,
    currency: &str,
    limit: usize,
) -> AcquisitionResult<Vec<ProductListing>> {
    let document = Html::parse_document(html);
    if selectors::looks_blocked(&document) {
        return Err(AcquisitionError::Blocked);
    }
    Ok(pattern
        .raw_cards(&document, limit)
        .into_iter()
        .map(|raw| raw.normalize(base, currency))
        .collect())
}

#[async_trait]
impl ListingSource for LightweightExtractor {
    async fn search(&self, query: &str, count: usize) -> AcquisitionResult<Vec<ProductListing>> {
        let url = self
            .upstream
            .search_url(query)
            .map_err(|e| AcquisitionError::Network(e.to_string()))?;
        info!("Lightweight fetch for '{}'", query);

        let html = self.fetch_page(&url).await?;
        let listings = self.parse_listings(&html, &selectors::SEARCH_RESULTS, &url, count)?;
        if listings.is_empty() {
            warn!("Search markup matched no result cards for '{}'", query);
        } else {
            info!("Lightweight fetch extracted {} listings", listings.len());
        }
        Ok(listings)
    }

    fn name(&self) -> &'static str {
        "lightweight"
    }
}
