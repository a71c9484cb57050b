//! Extraction rules for the upstream's product markup.
//!
//! Each field has an ordered list of rules; the first rule that yields a
//! non-empty value wins. Result cards are known to vary in shape, so every
//! field lists several candidates. Update these tables when the upstream
//! markup drifts. The same tables are serialized into the in-page script the
//! browser tier evaluates, so both tiers read the page the same way.

use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use serde::Serialize;
use std::collections::HashSet;
use std::sync::LazyLock;
use url::Url;

use crate::types::{ProductListing, MAX_TITLE_CHARS, PLACEHOLDER_IMAGE, PLACEHOLDER_TITLE};

pub const DEFAULT_RATING: &str = "4.0";
pub const PRICE_UNAVAILABLE: &str = "Price not available";

static DECIMAL: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\d+(?:\.\d+)?").unwrap());

/// One way of reading a field out of a card.
///
/// `css: None` targets the card element itself; `attr: None` reads the
/// element's text content.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct Rule {
    pub css: Option<&'static str>,
    pub attr: Option<&'static str>,
}

impl Rule {
    pub const fn text(css: &'static str) -> Self {
        Self { css: Some(css), attr: None }
    }

    pub const fn attr(css: &'static str, attr: &'static str) -> Self {
        Self { css: Some(css), attr: Some(attr) }
    }

    pub const fn own_attr(attr: &'static str) -> Self {
        Self { css: None, attr: Some(attr) }
    }

    pub const fn own_text() -> Self {
        Self { css: None, attr: None }
    }

    fn apply(&self, card: &ElementRef<'_>) -> Option<String> {
        let element = match self.css {
            Some(css) => {
                let selector = Selector::parse(css).ok()?;
                card.select(&selector).next()?
            }
            None => *card,
        };
        let value = match self.attr {
            Some(attr) => element.value().attr(attr)?.to_string(),
            None => element.text().collect::<String>(),
        };
        let value = value.trim();
        if value.is_empty() {
            None
        } else {
            Some(value.to_string())
        }
    }
}

/// First non-empty value produced by `rules`, in order.
pub fn first_match(rules: &[Rule], card: &ElementRef<'_>) -> Option<String> {
    rules.iter().find_map(|rule| rule.apply(card))
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct FieldRules {
    pub title: &'static [Rule],
    pub url: &'static [Rule],
    pub image: &'static [Rule],
    pub price: &'static [Rule],
    pub rating: &'static [Rule],
}

/// Where the cards are on a page and how to read each one.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct CardPattern {
    /// Card selectors tried in order; the first that matches anything is used.
    pub cards: &'static [&'static str],
    pub fields: FieldRules,
}

/// Fields as read from the page, before normalization.
#[derive(Debug, Clone, Default, PartialEq, serde::Deserialize)]
pub struct RawListing {
    pub title: Option<String>,
    pub url: Option<String>,
    pub image: Option<String>,
    pub price: Option<String>,
    pub rating: Option<String>,
}

impl CardPattern {
    /// Read up to `limit` cards in document order, skipping repeats of a
    /// detail URL already seen.
    pub fn raw_cards(&self, document: &Html, limit: usize) -> Vec<RawListing> {
        let Some(selector) = self
            .cards
            .iter()
            .filter_map(|css| Selector::parse(css).ok())
            .find(|sel| document.select(sel).next().is_some())
        else {
            return Vec::new();
        };

        let mut seen = HashSet::new();
        let mut out = Vec::new();
        for card in document.select(&selector) {
            if out.len() >= limit {
                break;
            }
            let raw = RawListing {
                title: first_match(self.fields.title, &card),
                url: first_match(self.fields.url, &card),
                image: first_match(self.fields.image, &card),
                price: first_match(self.fields.price, &card),
                rating: first_match(self.fields.rating, &card),
            };
            if raw.title.is_none() && raw.image.is_none() {
                continue;
            }
            if let Some(url) = &raw.url {
                if !seen.insert(url.clone()) {
                    continue;
                }
            }
            out.push(raw);
        }
        out
    }
}

impl RawListing {
    pub fn normalize(self, base: &Url, currency: &str) -> ProductListing {
        ProductListing {
            title: self
                .title
                .as_deref()
                .map(normalize_title)
                .filter(|t| !t.is_empty())
                .unwrap_or_else(|| PLACEHOLDER_TITLE.to_string()),
            price: normalize_price(self.price.as_deref(), currency),
            image: self
                .image
                .as_deref()
                .and_then(|src| resolve(base, src))
                .unwrap_or_else(|| PLACEHOLDER_IMAGE.to_string()),
            rating: normalize_rating(self.rating.as_deref()),
            url: self
                .url
                .as_deref()
                .and_then(|href| resolve(base, href))
                .unwrap_or_else(|| base.to_string()),
        }
    }
}

/// Collapse whitespace and cap the length in characters.
pub fn normalize_title(raw: &str) -> String {
    let collapsed = raw.split_whitespace().collect::<Vec<_>>().join(" ");
    collapsed.chars().take(MAX_TITLE_CHARS).collect()
}

pub fn normalize_price(raw: Option<&str>, currency: &str) -> String {
    let Some(price) = raw.map(str::trim).filter(|p| !p.is_empty()) else {
        return PRICE_UNAVAILABLE.to_string();
    };
    // ".a-price-whole" renders as "1,299." with the fraction in a sibling
    let price = price.trim_end_matches('.');
    if !price.chars().any(|c| c.is_ascii_digit()) || price.contains(currency) {
        price.to_string()
    } else {
        format!("{}{}", currency, price)
    }
}

pub fn normalize_rating(raw: Option<&str>) -> String {
    raw.and_then(|text| DECIMAL.find(text))
        .map(|m| m.as_str().to_string())
        .unwrap_or_else(|| DEFAULT_RATING.to_string())
}

fn resolve(base: &Url, href: &str) -> Option<String> {
    let href = href.trim();
    if href.is_empty() || href.starts_with("javascript:") {
        return None;
    }
    match base.join(href) {
        Ok(url) => Some(url.to_string()),
        Err(_) => Some(href.to_string()),
    }
}

/// Result cards on the search results page.
pub static SEARCH_RESULTS: CardPattern = CardPattern {
    cards: &[
        "div[data-component-type='s-search-result']",
        "div.s-result-item[data-asin]:not([data-asin=''])",
    ],
    fields: FieldRules {
        title: &[
            Rule::text("h2 a span"),
            Rule::text("h2 span"),
            Rule::text(".a-size-medium.a-text-normal"),
            Rule::text(".a-size-base-plus.a-text-normal"),
            Rule::attr("img.s-image", "alt"),
        ],
        url: &[
            Rule::attr("h2 a", "href"),
            Rule::attr("a.a-link-normal.s-no-outline", "href"),
            Rule::attr("a.a-link-normal", "href"),
        ],
        image: &[
            Rule::attr("img.s-image", "src"),
            Rule::attr(".s-product-image-container img", "src"),
            Rule::attr("img", "data-src"),
        ],
        price: &[
            Rule::text(".a-price:not([data-a-strike]) .a-offscreen"),
            Rule::text(".a-price .a-offscreen"),
            Rule::text(".a-price-whole"),
            Rule::text(".a-color-price"),
        ],
        rating: &[
            Rule::text("i.a-icon-star-small span.a-icon-alt"),
            Rule::text("span.a-icon-alt"),
            Rule::attr("[aria-label*='out of 5']", "aria-label"),
        ],
    },
};

/// Selector whose presence means the browser page has rendered results.
pub const SEARCH_READY_SELECTOR: &str =
    "div[data-component-type='s-search-result'], div.s-result-item[data-asin]";

/// Primary pattern for the best-sellers grid.
pub static BESTSELLER_CARDS: CardPattern = CardPattern {
    cards: &["#gridItemRoot", ".zg-grid-general-faceout", "li.zg-item-immersion"],
    fields: FieldRules {
        title: &[
            Rule::text("div[class*='line-clamp']"),
            Rule::text(".p13n-sc-truncate-desktop-type2"),
            Rule::text(".p13n-sc-truncated"),
            Rule::attr("img", "alt"),
        ],
        url: &[Rule::attr("a.a-link-normal", "href"), Rule::attr("a", "href")],
        image: &[Rule::attr("img", "src"), Rule::attr("img", "data-src")],
        price: &[
            Rule::text("span[class*='p13n-sc-price']"),
            Rule::text(".p13n-sc-price"),
            Rule::text(".a-color-price"),
        ],
        rating: &[
            Rule::text("span.a-icon-alt"),
            Rule::attr("a[title*='out of 5']", "title"),
        ],
    },
};

/// Fallback for best-seller pages: any product-detail anchor.
pub static PRODUCT_ANCHORS: CardPattern = CardPattern {
    cards: &["a[href*='/dp/']"],
    fields: FieldRules {
        title: &[Rule::attr("img", "alt"), Rule::own_attr("title"), Rule::own_text()],
        url: &[Rule::own_attr("href")],
        image: &[Rule::attr("img", "src"), Rule::attr("img", "data-src")],
        price: &[],
        rating: &[],
    },
};

/// Markers of the upstream's robot-check interstitial.
pub fn looks_blocked(document: &Html) -> bool {
    static CAPTCHA: LazyLock<Selector> =
        LazyLock::new(|| Selector::parse("form[action*='validateCaptcha'], #captchacharacters").unwrap());
    static TITLE: LazyLock<Selector> = LazyLock::new(|| Selector::parse("title").unwrap());

    if document.select(&CAPTCHA).next().is_some() {
        return true;
    }
    document
        .select(&TITLE)
        .next()
        .map(|t| t.text().collect::<String>().to_lowercase().contains("robot check"))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SEARCH_PAGE: &str = r#"
        <html><body>
          <div data-component-type="s-search-result" data-asin="B001">
            <h2><a href="/Wireless-Mouse/dp/B001"><span>Logitech   Wireless
              Mouse M185</span></a></h2>
            <img class="s-image" src="https://m.media-amazon.com/images/I/mouse.jpg">
            <span class="a-price"><span class="a-offscreen">$14.99</span></span>
            <i class="a-icon-star-small"><span class="a-icon-alt">4.6 out of 5 stars</span></i>
          </div>
          <div data-component-type="s-search-result" data-asin="B002">
            <span class="a-size-medium a-text-normal">USB-C Hub 7-in-1</span>
            <a class="a-link-normal" href="https://www.amazon.com/dp/B002">link</a>
            <img data-src="https://m.media-amazon.com/images/I/hub.jpg">
            <span class="a-price-whole">29.</span>
          </div>
          <div data-component-type="s-search-result" data-asin="B001">
            <h2><a href="/Wireless-Mouse/dp/B001"><span>Duplicate</span></a></h2>
          </div>
        </body></html>
    "#;

    fn base() -> Url {
        Url::parse("https://www.amazon.com").unwrap()
    }

    #[test]
    fn test_search_cards_use_fallback_rules() {
        let doc = Html::parse_document(SEARCH_PAGE);
        let raw = SEARCH_RESULTS.raw_cards(&doc, 10);
        assert_eq!(raw.len(), 2, "duplicate detail URL should be skipped");

        let first = raw[0].clone().normalize(&base(), "$");
        assert_eq!(first.title, "Logitech Wireless Mouse M185");
        assert_eq!(first.url, "https://www.amazon.com/Wireless-Mouse/dp/B001");
        assert_eq!(first.price, "$14.99");
        assert_eq!(first.rating, "4.6");

        let second = raw[1].clone().normalize(&base(), "$");
        assert_eq!(second.title, "USB-C Hub 7-in-1");
        assert_eq!(second.image, "https://m.media-amazon.com/images/I/hub.jpg");
        assert_eq!(second.price, "$29");
        assert_eq!(second.rating, DEFAULT_RATING);
    }

    #[test]
    fn test_raw_cards_stop_at_limit() {
        let doc = Html::parse_document(SEARCH_PAGE);
        assert_eq!(SEARCH_RESULTS.raw_cards(&doc, 1).len(), 1);
    }

    #[test]
    fn test_unmatched_markup_yields_nothing() {
        let doc = Html::parse_document("<html><body><p>new layout</p></body></html>");
        assert!(SEARCH_RESULTS.raw_cards(&doc, 10).is_empty());
    }

    #[test]
    fn test_missing_fields_get_placeholders() {
        let listing = RawListing::default().normalize(&base(), "$");
        assert_eq!(listing.title, PLACEHOLDER_TITLE);
        assert_eq!(listing.image, PLACEHOLDER_IMAGE);
        assert_eq!(listing.price, PRICE_UNAVAILABLE);
        assert!(!listing.is_valid());
    }

    #[test]
    fn test_price_prefix() {
        assert_eq!(normalize_price(Some("1,299"), "₹"), "₹1,299");
        assert_eq!(normalize_price(Some("₹1,299"), "₹"), "₹1,299");
        assert_eq!(normalize_price(Some("Currently unavailable"), "$"), "Currently unavailable");
        assert_eq!(normalize_price(None, "$"), PRICE_UNAVAILABLE);
    }

    #[test]
    fn test_title_is_truncated() {
        let long = "x".repeat(MAX_TITLE_CHARS * 2);
        assert_eq!(normalize_title(&long).chars().count(), MAX_TITLE_CHARS);
    }

    #[test]
    fn test_anchor_fallback_reads_the_anchor_itself() {
        let doc = Html::parse_document(
            r#"<a href="/dp/B00X"><img alt="Echo Dot (5th Gen)" src="https://m.media-amazon.com/e.jpg"></a>"#,
        );
        let raw = PRODUCT_ANCHORS.raw_cards(&doc, 5);
        assert_eq!(raw.len(), 1);
        let listing = raw[0].clone().normalize(&base(), "$");
        assert_eq!(listing.title, "Echo Dot (5th Gen)");
        assert_eq!(listing.url, "https://www.amazon.com/dp/B00X");
    }

    #[test]
    fn test_robot_check_detection() {
        let doc = Html::parse_document("<html><head><title>Robot Check</title></head></html>");
        assert!(looks_blocked(&doc));
        let doc = Html::parse_document(SEARCH_PAGE);
        assert!(!looks_blocked(&doc));
    }
}
