use axum::{
    extract::{ConnectInfo, Query, State},
    http::{HeaderMap, StatusCode},
    response::Json,
    routing::get,
    Router,
};
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use crate::trending::TrendingPicks;
use crate::types::*;
use crate::AppState;

const SERVICE_NAME: &str = "product-feed";

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(health_check))
        .route("/health", get(health_check))
        .route("/products", get(products_handler).post(health_check))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health_check(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        service: SERVICE_NAME.to_string(),
        timestamp: chrono::Utc::now().to_rfc3339(),
        cache_size: state.cache.len().await,
    })
}

/// The peer address, unless the peer is a trusted proxy. Then the forwarding
/// chain is read from the nearest hop outwards and the first address that is
/// not a trusted proxy wins.
pub fn client_id(headers: &HeaderMap, peer: Option<SocketAddr>, trusted_proxies: &[IpAddr]) -> String {
    let Some(peer) = peer.map(|addr| addr.ip()) else {
        return "unknown".to_string();
    };
    if !trusted_proxies.contains(&peer) {
        return peer.to_string();
    }
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|chain| {
            chain
                .rsplit(',')
                .map(str::trim)
                .map_while(|hop| hop.parse::<IpAddr>().ok())
                .find(|ip| !trusted_proxies.contains(ip))
        })
        .unwrap_or(peer)
        .to_string()
}

async fn products_handler(
    State(state): State<Arc<AppState>>,
    peer: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    Query(params): Query<ProductsQuery>,
) -> Result<Json<ProductsResponse>, (StatusCode, Json<ErrorResponse>)> {
    let client = client_id(
        &headers,
        peer.map(|ConnectInfo(addr)| addr),
        &state.config.trusted_proxies,
    );
    if !state.rate_limiter.admit(&client) {
        warn!("Rate limit exceeded for {}", client);
        return Err((
            StatusCode::TOO_MANY_REQUESTS,
            Json(ErrorResponse::new("Too many requests")),
        ));
    }

    let query = params
        .category
        .map(|c| c.trim().to_string())
        .filter(|c| !c.is_empty())
        .unwrap_or_else(|| state.config.default_category.clone());
    let count = params
        .count
        .unwrap_or(state.config.default_product_count)
        .clamp(1, state.config.max_product_count);
    let include_trending = params.trending.unwrap_or(true);

    info!("Products request from {}: '{}' x{}", client, query, count);

    let trending = async {
        if include_trending {
            state.trending.get(count).await
        } else {
            TrendingPicks::default()
        }
    };
    let (outcome, trending) = tokio::join!(state.orchestrator.search(&query, count), trending);

    let outcome = outcome.map_err(|e| {
        error!("Product acquisition failed for '{}': {}", query, e);
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ErrorResponse::new("Failed to fetch products").with_message(e.to_string())),
        )
    })?;

    Ok(Json(ProductsResponse {
        success: true,
        count: outcome.listings.len(),
        products: outcome.listings,
        trending: trending.items,
        top_trending: trending.top,
        query,
        cached: outcome.cached,
        timestamp: chrono::Utc::now().to_rfc3339(),
    }))
}
