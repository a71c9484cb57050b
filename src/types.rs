use serde::{Deserialize, Deserializer, Serialize};
use std::str::FromStr;

/// A product card as shown by the storefront. Every field is display text;
/// the upstream does not format prices or ratings consistently enough to
/// parse them into numbers.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct ProductListing {
    pub title: String,
    pub price: String,
    pub image: String,
    pub rating: String,
    pub url: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ProductsQuery {
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub count: Option<usize>,
    #[serde(default, deserialize_with = "lenient")]
    pub trending: Option<bool>,
}

/// Unparseable values read as absent, so the handler falls back to defaults.
fn lenient<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: FromStr,
{
    let raw = Option::<String>::deserialize(deserializer)?;
    Ok(raw.and_then(|v| v.trim().parse().ok()))
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductsResponse {
    pub success: bool,
    pub products: Vec<ProductListing>,
    pub trending: Vec<ProductListing>,
    pub top_trending: Option<ProductListing>,
    pub count: usize,
    pub query: String,
    pub cached: bool,
    pub timestamp: String,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: String,
    pub service: String,
    pub timestamp: String,
    pub cache_size: u64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub error: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: error.into(),
            message: None,
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

/// Stand-in title for a card whose title could not be extracted.
pub const PLACEHOLDER_TITLE: &str = "No title";
/// Stand-in image for a card whose image could not be extracted.
pub const PLACEHOLDER_IMAGE: &str = "https://via.placeholder.com/300x300?text=No+Image";
pub const MAX_TITLE_CHARS: usize = 100;
pub const MIN_TITLE_CHARS: usize = 5;

impl ProductListing {
    /// A listing is only shown if it has a real title and a real image.
    pub fn is_valid(&self) -> bool {
        let title = self.title.trim();
        !title.is_empty()
            && title != PLACEHOLDER_TITLE
            && title.chars().count() > MIN_TITLE_CHARS
            && self.image.starts_with("http")
            && self.image != PLACEHOLDER_IMAGE
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn listing(title: &str, image: &str) -> ProductListing {
        ProductListing {
            title: title.to_string(),
            price: "$10.00".to_string(),
            image: image.to_string(),
            rating: "4.0".to_string(),
            url: "https://www.amazon.com/dp/B000000001".to_string(),
        }
    }

    #[test]
    fn test_validity_rules() {
        let img = "https://m.media-amazon.com/images/I/71abc.jpg";
        assert!(listing("Wireless Mouse", img).is_valid());
        assert!(!listing("", img).is_valid());
        assert!(!listing("   ", img).is_valid());
        assert!(!listing(PLACEHOLDER_TITLE, img).is_valid());
        assert!(!listing("Mouse", img).is_valid());
        assert!(!listing("Wireless Mouse", PLACEHOLDER_IMAGE).is_valid());
        assert!(!listing("Wireless Mouse", "data:image/gif;base64,R0lGOD").is_valid());
    }

    #[test]
    fn test_products_response_uses_camel_case() {
        let response = ProductsResponse {
            success: true,
            products: vec![],
            trending: vec![],
            top_trending: None,
            count: 0,
            query: "laptop".to_string(),
            cached: false,
            timestamp: "2024-01-01T00:00:00Z".to_string(),
        };
        let json = serde_json::to_value(&response).unwrap();
        assert!(json.get("topTrending").unwrap().is_null());
        assert_eq!(json["query"], "laptop");
    }

    #[test]
    fn test_query_tolerates_malformed_numbers() {
        let query: ProductsQuery =
            serde_json::from_value(serde_json::json!({ "count": "lots", "trending": "false" })).unwrap();
        assert_eq!(query.count, None);
        assert_eq!(query.trending, Some(false));

        let query: ProductsQuery = serde_json::from_value(serde_json::json!({ "count": " 6 " })).unwrap();
        assert_eq!(query.count, Some(6));
        assert_eq!(query.category, None);
    }

    #[test]
    fn test_error_response_omits_absent_message() {
        let json = serde_json::to_value(ErrorResponse::new("Too many requests")).unwrap();
        assert_eq!(json["success"], false);
        assert!(json.get("message").is_none());
    }
}
