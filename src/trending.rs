//! Best-sellers feed shown next to search results.
//!
//! Independent of the user's query and cached under its own key. Nothing in
//! here can fail a product response: every error becomes an empty feed.

use async_trait::async_trait;
use scraper::Html;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::cache::{ResultCache, TRENDING_KEY};
use crate::error::{AcquisitionError, AcquisitionResult};
use crate::lightweight::LightweightExtractor;
use crate::selectors::{self, CardPattern};
use crate::types::ProductListing;

/// The feed always asks for at least this many items.
pub const MIN_TRENDING: usize = 5;

/// Patterns tried in order against the best-sellers page.
pub static TRENDING_PATTERNS: [&CardPattern; 2] =
    [&selectors::BESTSELLER_CARDS, &selectors::PRODUCT_ANCHORS];

#[async_trait]
pub trait TrendingSource: Send + Sync {
    async fn fetch(&self, limit: usize) -> AcquisitionResult<Vec<ProductListing>>;
}

/// Scrapes the upstream best-sellers page over plain HTTP.
pub struct BestSellerFetcher {
    extractor: Arc<LightweightExtractor>,
}

impl BestSellerFetcher {
    pub fn new(extractor: Arc<LightweightExtractor>) -> Self {
        Self { extractor }
    }
}

#[async_trait]
impl TrendingSource for BestSellerFetcher {
    async fn fetch(&self, limit: usize) -> AcquisitionResult<Vec<ProductListing>> {
        let upstream = self.extractor.upstream();
        let url = upstream
            .bestsellers_url()
            .map_err(|e| AcquisitionError::Network(e.to_string()))?;
        let html = self.extractor.fetch_page(&url).await?;
        parse_trending(&html, &url, &upstream.currency_symbol, limit)
    }
}

/// First pattern that yields anything wins.
pub fn parse_trending(
    html: &str,
    base: &url::Url,
    currency: &str,
    limit: usize,
) -> AcquisitionResult<Vec<ProductListing>> {
    let document = Html::parse_document(html);
    if selectors::looks_blocked(&document) {
        return Err(AcquisitionError::Blocked);
    }
    for (i, pattern) in TRENDING_PATTERNS.iter().enumerate() {
        let raw = pattern.raw_cards(&document, limit);
        if !raw.is_empty() {
            debug!("Trending pattern {} matched {} cards", i, raw.len());
            return Ok(raw.into_iter().map(|r| r.normalize(base, currency)).collect());
        }
    }
    Ok(Vec::new())
}

#[derive(Debug, Clone, Default)]
pub struct TrendingPicks {
    pub items: Vec<ProductListing>,
    pub top: Option<ProductListing>,
}

impl TrendingPicks {
    fn from_items(items: Vec<ProductListing>) -> Self {
        let top = items.first().cloned();
        Self { items, top }
    }
}

#[derive(Clone)]
pub struct TrendingFeed {
    source: Arc<dyn TrendingSource>,
    cache: ResultCache,
    deadline: Duration,
    fetch_size: usize,
}

impl TrendingFeed {
    /// `largest_request` is the biggest count any caller may ask for. The
    /// cached feed holds that many so every later request can be served from it.
    pub fn new(
        source: Arc<dyn TrendingSource>,
        cache: ResultCache,
        deadline: Duration,
        largest_request: usize,
    ) -> Self {
        Self {
            source,
            cache,
            deadline,
            fetch_size: largest_request.max(MIN_TRENDING),
        }
    }

    /// Up to `max(MIN_TRENDING, requested)` valid best-sellers; empty on any failure.
    pub async fn get(&self, requested: usize) -> TrendingPicks {
        let limit = requested.max(MIN_TRENDING);

        if let Some(items) = self.cache.get(TRENDING_KEY).await {
            debug!("trending cache hit");
            return TrendingPicks::from_items(items.into_iter().take(limit).collect());
        }

        let fetched = match tokio::time::timeout(self.deadline, self.source.fetch(self.fetch_size)).await {
            Ok(Ok(items)) => items,
            Ok(Err(e)) => {
                warn!("Trending fetch failed: {}", e);
                return TrendingPicks::default();
            }
            Err(_) => {
                warn!("Trending fetch exceeded {:?}", self.deadline);
                return TrendingPicks::default();
            }
        };

        let items: Vec<ProductListing> = fetched
            .into_iter()
            .filter(ProductListing::is_valid)
            .take(self.fetch_size)
            .collect();
        if items.is_empty() {
            warn!("Trending page yielded no usable listings");
            return TrendingPicks::default();
        }

        info!("Caching {} trending listings", items.len());
        self.cache.put(TRENDING_KEY, items.clone()).await;
        TrendingPicks::from_items(items.into_iter().take(limit).collect())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::search::tests::products;
    use std::sync::atomic::{AtomicUsize, Ordering};

    pub(crate) struct MockTrending {
        calls: AtomicUsize,
        result: fn() -> AcquisitionResult<Vec<ProductListing>>,
    }

    impl MockTrending {
        pub(crate) fn new(result: fn() -> AcquisitionResult<Vec<ProductListing>>) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                result,
            })
        }

        pub(crate) fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl TrendingSource for MockTrending {
        async fn fetch(&self, _limit: usize) -> AcquisitionResult<Vec<ProductListing>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            (self.result)()
        }
    }

    fn feed(source: Arc<MockTrending>) -> TrendingFeed {
        TrendingFeed::new(
            source,
            ResultCache::new(Duration::from_secs(600)),
            Duration::from_secs(10),
            12,
        )
    }

    #[tokio::test]
    async fn test_top_pick_is_first_item() {
        let feed = feed(MockTrending::new(|| Ok(products(8))));
        let picks = feed.get(3).await;
        assert_eq!(picks.items.len(), MIN_TRENDING);
        assert_eq!(picks.top, Some(products(1).remove(0)));
    }

    #[tokio::test]
    async fn test_larger_request_raises_the_cap() {
        let feed = feed(MockTrending::new(|| Ok(products(20))));
        assert_eq!(feed.get(12).await.items.len(), 12);
    }

    #[tokio::test]
    async fn test_small_request_does_not_shrink_cached_feed() {
        let source = MockTrending::new(|| Ok(products(20)));
        let feed = feed(source.clone());
        assert_eq!(feed.get(3).await.items.len(), MIN_TRENDING);
        assert_eq!(feed.get(12).await.items.len(), 12);
        assert_eq!(source.calls(), 1);
    }

    #[tokio::test]
    async fn test_failure_is_swallowed() {
        let source = MockTrending::new(|| Err(AcquisitionError::Network("reset".into())));
        let picks = feed(source.clone()).get(6).await;
        assert!(picks.items.is_empty());
        assert!(picks.top.is_none());
        assert_eq!(source.calls(), 1);
    }

    #[tokio::test]
    async fn test_success_is_cached_under_fixed_key() {
        let source = MockTrending::new(|| Ok(products(6)));
        let feed = feed(source.clone());
        feed.get(5).await;
        let again = feed.get(5).await;
        assert_eq!(again.items.len(), 5);
        assert_eq!(source.calls(), 1);
    }

    #[tokio::test]
    async fn test_empty_feed_is_not_cached() {
        let source = MockTrending::new(|| Ok(Vec::new()));
        let feed = feed(source.clone());
        feed.get(5).await;
        feed.get(5).await;
        assert_eq!(source.calls(), 2);
    }

    #[test]
    fn test_anchor_pattern_used_when_grid_missing() {
        let html = r#"<html><body>
            <a href="/Kindle-Paperwhite/dp/B08KTZ8249"><img alt="Kindle Paperwhite 16GB" src="https://m.media-amazon.com/k.jpg"></a>
            <a href="/Kindle-Paperwhite/dp/B08KTZ8249">Kindle Paperwhite 16GB</a>
        </body></html>"#;
        let base = url::Url::parse("https://www.amazon.com/gp/bestsellers").unwrap();
        let items = parse_trending(html, &base, "$", 5).unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].title, "Kindle Paperwhite 16GB");
        assert_eq!(items[0].url, "https://www.amazon.com/Kindle-Paperwhite/dp/B08KTZ8249");
    }

    #[test]
    fn test_grid_pattern_preferred() {
        let html = r#"<html><body>
            <div id="gridItemRoot">
              <a class="a-link-normal" href="/dp/B0A"><img alt="Stanley Quencher Tumbler" src="https://m.media-amazon.com/s.jpg"></a>
              <div class="_cDEzb_p13n-sc-css-line-clamp-3_g3dy1">Stanley Quencher H2.0 Tumbler 40oz</div>
              <span class="a-icon-alt">4.7 out of 5 stars</span>
              <span class="_cDEzb_p13n-sc-price_3mJ9Z">$45.00</span>
            </div>
        </body></html>"#;
        let base = url::Url::parse("https://www.amazon.com/gp/bestsellers").unwrap();
        let items = parse_trending(html, &base, "$", 5).unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].title, "Stanley Quencher H2.0 Tumbler 40oz");
        assert_eq!(items[0].rating, "4.7");
        assert_eq!(items[0].price, "$45.00");
    }
}
