//! Authgate API server

use std::net::SocketAddr;
use std::sync::Arc;

use authgate_api::config::Config;
use authgate_api::state::AppState;
use authgate_api::{build_router, setup_metrics, shutdown_signal, spawn_purge_task};
use authgate_core::{CognitoProvider, Gateway, InMemorySessionStore};
use axum::extract::connect_info::IntoMakeServiceWithConnectInfo;
use axum::Router;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Initialize logging
    tracing_subscriber::registry()
        .with(
            EnvFilter::from_default_env()
                .add_directive("authgate_api=debug".parse()?)
                .add_directive("authgate_core=info".parse()?),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Authgate API");

    // Load configuration
    let config = Config::from_env()?;
    tracing::info!(
        http_port = config.http_port,
        issuer = %config.gateway.cognito_issuer(),
        "Configuration loaded"
    );

    // Initialize metrics
    let metrics_handle = if config.metrics_enabled {
        Some(setup_metrics()?)
    } else {
        None
    };

    // Create gateway
    let provider = Arc::new(CognitoProvider::new(&config.gateway));
    let store = Arc::new(InMemorySessionStore::new());
    let gateway = Gateway::new(config.gateway.clone(), provider, store)?;

    // Load signing keys up front; readiness keeps retrying if this fails
    match gateway.warm_keys().await {
        Ok(keys) => tracing::info!(keys, "Signing keys loaded"),
        Err(e) => tracing::warn!(error = %e, "Initial signing key fetch failed"),
    }

    let state = AppState::new(gateway, config.clone());
    let purge = spawn_purge_task(
        Arc::clone(&state.gateway),
        Arc::clone(&state.limiter),
        config.purge_interval,
    );

    let app = build_router(state, metrics_handle);
    let addr = SocketAddr::from(([0, 0, 0, 0], config.http_port));

    let result = run_http_server(app, addr).await;
    purge.abort();
    if let Err(e) = &result {
        tracing::error!(error = ?e, "HTTP server error");
    }

    tracing::info!("Shutdown complete");
    result
}

async fn run_http_server(app: Router, addr: SocketAddr) -> anyhow::Result<()> {
    tracing::info!("HTTP server listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;

    let service: IntoMakeServiceWithConnectInfo<Router, SocketAddr> =
        app.into_make_service_with_connect_info();

    axum::serve(listener, service)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}
