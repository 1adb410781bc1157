//! Dashboard: Axum web server exposing status queries, the withdrawal
//! endpoint and the manual pulse trigger.
//!
//! CORS is open to any origin.

pub mod routes;

use anyhow::{Context, Result};
use axum::{
    http::{header, Method},
    routing::{get, post},
    Router,
};
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

pub use routes::{AppState, DashboardState};

/// Bind `port` and serve until `shutdown` fires.
pub async fn serve(state: AppState, port: u16, shutdown: CancellationToken) -> Result<()> {
    let app = build_router(state);
    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind dashboard port {port}"))?;
    info!(port, "Dashboard server listening on http://localhost:{port}");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
        .context("Dashboard server error")
}

/// Build the Axum router with all routes and middleware.
pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE]);

    Router::new()
        .route("/", get(routes::root))
        .route("/health", get(routes::health))
        .route("/status", get(routes::get_status))
        .route("/earnings", get(routes::get_earnings))
        .route("/balance", get(routes::get_balance))
        .route("/api/apex/strategies/live", get(routes::get_live_strategies))
        // One handler, several names.
        .route("/withdraw", post(routes::withdraw))
        .route("/send-eth", post(routes::withdraw))
        .route("/coinbase-withdraw", post(routes::withdraw))
        .route("/transfer", post(routes::withdraw))
        .route("/execute", post(routes::execute))
        .layer(cors)
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
