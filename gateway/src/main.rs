use canary_gateway::config::Config;
use canary_gateway::relay::{self, RelayState};
use clap::Parser;
use tower_http::trace::TraceLayer;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    let config = Config::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("Starting canary gateway");
    info!("Internal service: {}", config.upstream_url);
    info!("Update script: {}", config.script_path.display());

    let state = match RelayState::new(
        &config.upstream_url,
        config.script_path.clone(),
        config.upstream_timeout(),
    ) {
        Ok(state) => state,
        Err(e) => {
            error!("Failed to build upstream client: {}", e);
            std::process::exit(1);
        }
    };

    let app = relay::create_router(state).layer(TraceLayer::new_for_http());

    let listener = tokio::net::TcpListener::bind(&config.listen_addr)
        .await
        .unwrap_or_else(|e| {
            error!("Failed to bind to {}: {}", config.listen_addr, e);
            std::process::exit(1);
        });

    info!("Gateway listening on {}", config.listen_addr);

    let server = axum::serve(listener, app).with_graceful_shutdown(async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for shutdown signal: {}", e);
        }
        info!("Received shutdown signal");
    });

    if let Err(e) = server.await {
        error!("Gateway server error: {}", e);
    }

    info!("Shutting down");
}
