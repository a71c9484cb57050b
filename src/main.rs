use std::env;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use product_feed::{api, build_http_client, config::Config, AppState};

const CERT_DIR: &str = "/app/certificates";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = Config::from_env()?;

    info!("Starting product feed service");
    info!("Upstream: {}", config.upstream.base_url);

    let http_client = build_http_client(&config)?;
    let bind_addr = config.bind_addr;
    let state = Arc::new(AppState::new(config, http_client));
    let app = api::router(state.clone()).into_make_service_with_connect_info::<SocketAddr>();

    let tls_cert = env::var("TLS_HOST_CERT").ok();
    let tls_key = env::var("TLS_HOST_KEY").ok();

    match (tls_cert, tls_key) {
        (Some(cert_name), Some(key_name)) => {
            let tls_config = axum_server::tls_rustls::RustlsConfig::from_pem_file(
                Path::new(CERT_DIR).join(cert_name),
                Path::new(CERT_DIR).join(key_name),
            )
            .await?;
            let handle = axum_server::Handle::new();
            let shutdown = handle.clone();
            tokio::spawn(async move {
                shutdown_signal().await;
                shutdown.graceful_shutdown(Some(Duration::from_secs(10)));
            });
            info!("Listening on https://{}", bind_addr);
            axum_server::bind_rustls(bind_addr, tls_config)
                .handle(handle)
                .serve(app)
                .await?;
        }
        (cert, key) => {
            if cert.is_some() || key.is_some() {
                warn!("TLS_HOST_CERT and TLS_HOST_KEY must both be set to enable inbound TLS. Falling back to HTTP.");
            }
            let listener = tokio::net::TcpListener::bind(bind_addr).await?;
            info!("Listening on http://{}", bind_addr);
            axum::serve(listener, app)
                .with_graceful_shutdown(shutdown_signal())
                .await?;
        }
    }

    state.shutdown().await;
    info!("Shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
