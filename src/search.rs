use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::cache::ResultCache;
use crate::error::{AcquisitionError, AcquisitionResult};
use crate::types::ProductListing;

/// Fewer lightweight results than `min(ESCALATION_THRESHOLD, count)` sends
/// the query to the browser tier.
pub const ESCALATION_THRESHOLD: usize = 3;

/// Something that can turn a query into product listings.
#[async_trait]
pub trait ListingSource: Send + Sync {
    /// Up to `count` listings in upstream order. Selector drift yields
    /// `Ok` with fewer (or zero) items, not an error.
    async fn search(&self, query: &str, count: usize) -> AcquisitionResult<Vec<ProductListing>>;

    fn name(&self) -> &'static str;
}

#[derive(Debug, Clone)]
pub struct SearchOutcome {
    pub listings: Vec<ProductListing>,
    pub cached: bool,
}

pub fn cache_key(query: &str, count: usize) -> String {
    format!("{}_{}", query.trim().to_lowercase(), count)
}

pub fn should_escalate(found: usize, count: usize) -> bool {
    found < ESCALATION_THRESHOLD.min(count)
}

/// Drop invalid listings, then cap at `count`.
pub fn finalize(listings: Vec<ProductListing>, count: usize) -> Vec<ProductListing> {
    listings
        .into_iter()
        .filter(ProductListing::is_valid)
        .take(count)
        .collect()
}

/// Cache-first, two-tier product search.
#[derive(Clone)]
pub struct SearchOrchestrator {
    lightweight: Arc<dyn ListingSource>,
    browser: Arc<dyn ListingSource>,
    cache: ResultCache,
    deadline: Duration,
}

impl SearchOrchestrator {
    pub fn new(
        lightweight: Arc<dyn ListingSource>,
        browser: Arc<dyn ListingSource>,
        cache: ResultCache,
        deadline: Duration,
    ) -> Self {
        Self {
            lightweight,
            browser,
            cache,
            deadline,
        }
    }

    /// `count` is expected to be clamped by the caller.
    pub async fn search(&self, query: &str, count: usize) -> AcquisitionResult<SearchOutcome> {
        let key = cache_key(query, count);
        if let Some(listings) = self.cache.get(&key).await {
            debug!("search cache hit for '{}'", key);
            return Ok(SearchOutcome {
                listings,
                cached: true,
            });
        }

        // Dropping the acquisition future on expiry cancels the in-flight
        // HTTP request or page navigation.
        let listings = match tokio::time::timeout(self.deadline, self.acquire(query, count)).await {
            Ok(result) => result?,
            Err(_) => {
                warn!("Acquisition for '{}' exceeded {:?}", query, self.deadline);
                return Err(AcquisitionError::DeadlineExceeded(self.deadline));
            }
        };

        self.cache.put(key, listings.clone()).await;
        Ok(SearchOutcome {
            listings,
            cached: false,
        })
    }

    async fn acquire(&self, query: &str, count: usize) -> AcquisitionResult<Vec<ProductListing>> {
        info!("Searching for: {} (count {})", query, count);

        let mut working = match self.lightweight.search(query, count).await {
            Ok(listings) => listings,
            Err(AcquisitionError::Blocked) => {
                warn!("{} tier was served a robot check for '{}'", self.lightweight.name(), query);
                Vec::new()
            }
            Err(e) => {
                warn!("{} tier failed for '{}': {}", self.lightweight.name(), query, e);
                Vec::new()
            }
        };

        if should_escalate(working.len(), count) {
            info!(
                "{} tier returned {} of {}; escalating to {}",
                self.lightweight.name(),
                working.len(),
                count,
                self.browser.name()
            );
            working = match self.browser.search(query, count).await {
                Ok(listings) => listings,
                Err(e) if e.is_degradable() => {
                    warn!("{} tier degraded for '{}': {}", self.browser.name(), query, e);
                    Vec::new()
                }
                Err(e) => return Err(e),
            };
        }

        let listings = finalize(working, count);
        debug!("{} valid listings for '{}'", listings.len(), query);
        Ok(listings)
    }
}
