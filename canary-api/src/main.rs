use axum::{routing::get, Router};
use canary_api::artifacts::ArtifactStore;
use canary_api::config::Config;
use canary_api::db::{self, PgStore};
use canary_api::metrics;
use canary_api::registry::DeviceRegistry;
use canary_api::rest::{self, AppState};
use canary_api::telemetry::TelemetryService;
use clap::Parser;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    let config = Config::parse();

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("Starting canary API");
    info!("HTTP server: {}", config.http_addr);
    info!("Database: {}", db::redact_url(&config.database_url));
    info!("Update bundles: {}", config.update_dir.display());

    if let Err(e) = metrics::init_metrics() {
        error!("Failed to register metrics: {}", e);
        std::process::exit(1);
    }

    let pool = match db::make_pool(
        &config.database_url,
        config.db_max_connections,
        config.db_timeout(),
    )
    .await
    {
        Ok(pool) => pool,
        Err(e) => {
            error!("Failed to connect to database: {}", e);
            std::process::exit(1);
        }
    };

    let store = Arc::new(PgStore::new(pool));
    let registry = DeviceRegistry::new(store.clone(), ArtifactStore::new(&config.update_dir));
    let telemetry = TelemetryService::new(store, registry.clone());
    let state = AppState::new(registry, telemetry);

    let app = Router::new()
        .route("/metrics", get(metrics_handler))
        .merge(rest::create_router(state, config.max_upload_bytes))
        .layer(TraceLayer::new_for_http());

    let listener = tokio::net::TcpListener::bind(&config.http_addr)
        .await
        .unwrap_or_else(|e| {
            error!("Failed to bind to {}: {}", config.http_addr, e);
            std::process::exit(1);
        });

    info!("HTTP server listening on {}", config.http_addr);

    let server = axum::serve(listener, app).with_graceful_shutdown(async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for shutdown signal: {}", e);
        }
        info!("Received shutdown signal");
    });

    if let Err(e) = server.await {
        error!("HTTP server error: {}", e);
    }

    info!("Shutting down");
}

async fn metrics_handler() -> String {
    metrics::gather_metrics()
}
