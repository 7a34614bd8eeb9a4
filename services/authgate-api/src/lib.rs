//! Authgate API
//!
//! HTTP front end for the authentication gateway.
//!
//! ## REST Endpoints
//!
//! - `POST /api/v1/auth/sign-in` - Start a sign-in
//! - `POST /api/v1/auth/challenge` - Answer a pending challenge
//! - `POST /api/v1/auth/sign-up` - Register a user
//! - `POST /api/v1/auth/refresh` - Rotate the current session
//! - `POST /api/v1/auth/revoke` - Revoke the current session
//! - `GET /api/v1/auth/session` - Describe the current session
//! - `POST /api/v1/auth/password/forgot` - Start a password reset
//! - `POST /api/v1/auth/password/change` - Change password for the current session
//!
//! ## Health Endpoints
//!
//! - `GET /health` - Liveness probe
//! - `GET /ready` - Readiness probe
//! - `GET /metrics` - Prometheus metrics

pub mod config;
pub mod error;
pub mod extractors;
pub mod handlers;
pub mod rate_limit;
pub mod state;

use std::sync::Arc;
use std::time::Duration;

use axum::routing::{get, post};
use axum::Router;
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use tokio::signal;
use tokio::task::JoinHandle;
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tracing::Level;

use crate::handlers::{health, ready};
use crate::rate_limit::IpRateLimiter;
use crate::state::{AppState, GatewayImpl};

pub fn build_router(state: AppState, metrics_handle: Option<PrometheusHandle>) -> Router {
    let request_timeout = state.request_timeout();

    // API v1 auth routes
    let api_v1 = Router::new()
        // Credential flows
        .route("/auth/sign-in", post(handlers::sign_in))
        .route("/auth/challenge", post(handlers::respond_to_challenge))
        .route("/auth/sign-up", post(handlers::sign_up))
        .route("/auth/password/forgot", post(handlers::forgot_password))
        // Session routes
        .route("/auth/refresh", post(handlers::refresh))
        .route("/auth/revoke", post(handlers::revoke))
        .route("/auth/session", get(handlers::current_session))
        .route("/auth/password/change", post(handlers::change_password));

    // Health routes (no timeout - must always respond quickly)
    let health_routes = Router::new()
        .route("/health", get(health))
        .route("/ready", get(ready));

    // Metrics route (no timeout)
    let metrics_route = if let Some(handle) = metrics_handle {
        Router::new().route("/metrics", get(move || async move { handle.render() }))
    } else {
        Router::new()
    };

    // Build middleware stack (order matters - outermost first)
    let middleware = ServiceBuilder::new()
        // Request ID propagation (outermost)
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
        .layer(PropagateRequestIdLayer::x_request_id())
        // Tracing with request details
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        // CORS
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        // Request timeout (innermost - closest to handler)
        .layer(TimeoutLayer::new(request_timeout));

    Router::new()
        .nest("/api/v1", api_v1)
        .layer(middleware)
        .merge(health_routes) // Health routes without timeout
        .merge(metrics_route) // Metrics route without timeout
        .with_state(state)
}

pub fn setup_metrics() -> anyhow::Result<PrometheusHandle> {
    // Most operations wait on one provider round trip
    let auth_latency_buckets = &[0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0];

    let builder = PrometheusBuilder::new().set_buckets_for_metric(
        Matcher::Full("authgate_operation_duration_seconds".to_string()),
        auth_latency_buckets,
    )?;

    let handle = builder.install_recorder()?;

    // Register metrics with descriptions
    metrics::describe_counter!(
        "authgate_flows_total",
        "Credential flows reaching a terminal stage by kind and result"
    );
    metrics::describe_counter!(
        "authgate_key_fetches_total",
        "Signing key set fetches from the identity provider"
    );
    metrics::describe_counter!(
        "authgate_purged_total",
        "Expired flows and sessions removed by the purge task"
    );
    metrics::describe_histogram!(
        "authgate_operation_duration_seconds",
        "Gateway operation latency in seconds by operation and result"
    );

    Ok(handle)
}

/// Periodically drop expired flows, old revoked sessions and idle rate limiters.
pub fn spawn_purge_task(
    gateway: Arc<GatewayImpl>,
    limiter: Arc<IpRateLimiter>,
    every: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick completes immediately
        ticker.tick().await;

        loop {
            ticker.tick().await;
            match gateway.purge_expired().await {
                Ok(report) => {
                    metrics::counter!("authgate_purged_total", "item" => "flow")
                        .increment(report.flows as u64);
                    metrics::counter!("authgate_purged_total", "item" => "session")
                        .increment(report.sessions as u64);
                    if report.flows > 0 || report.sessions > 0 {
                        tracing::debug!(
                            flows = report.flows,
                            sessions = report.sessions,
                            "Purged expired state"
                        );
                    }
                }
                Err(e) => tracing::warn!(error = %e, "Purge failed"),
            }
            limiter.retain_recent().await;
        }
    })
}

pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    tracing::info!("Shutdown signal received, starting graceful shutdown");
}
