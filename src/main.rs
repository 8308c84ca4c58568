//! Aervyn binary entry point

use aervyn::{AppState, config};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Application entry point
///
/// # Setup
/// 1. Initialize tracing/logging
/// 2. Initialize metrics
/// 3. Load configuration from file and environment
/// 4. Initialize AppState
/// 5. Build Axum router and start HTTP server
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 1. Initialize tracing/logging
    let log_format =
        std::env::var("AERVYN__LOGGING__FORMAT").unwrap_or_else(|_| "pretty".to_string());
    let filter = || {
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| "aervyn=info,tower_http=debug".into())
    };

    if log_format == "json" {
        tracing_subscriber::registry()
            .with(filter())
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter())
            .with(tracing_subscriber::fmt::layer().pretty())
            .init();
    }

    tracing::info!("Starting Aervyn...");

    // 2. Initialize metrics
    aervyn::metrics::init_metrics();

    // 3. Load configuration
    let config = config::AppConfig::load()?;
    tracing::info!(
        domain = %config.server.domain,
        protocol = %config.server.protocol,
        "Configuration loaded"
    );

    // 4. Initialize application state
    let state = AppState::new(config.clone()).await?;

    // 5. Build Axum router and start HTTP server
    let app = aervyn::build_router(state);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    tracing::info!("Server listening on {}", addr);
    tracing::info!("Public URL: {}", config.server.base_url());

    axum::serve(listener, app).await?;

    Ok(())
}
