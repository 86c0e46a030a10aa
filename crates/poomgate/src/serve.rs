//! MCP gateway over streamable HTTP.

use anyhow::{Context, Result};
use axum::{extract::State, routing::get, Json, Router};
use rmcp::transport::streamable_http_server::{
    session::local::LocalSessionManager, StreamableHttpService,
};
use std::time::Instant;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::dispatch::Gateway;
use crate::handler::PoomHandler;

/// Server state for health endpoint
#[derive(Clone)]
pub struct HealthState {
    pub gateway: Gateway,
    pub start_time: Instant,
}

/// Health check endpoint
pub async fn handle_health(State(state): State<HealthState>) -> Json<serde_json::Value> {
    let uptime = state.start_time.elapsed();

    Json(serde_json::json!({
        "status": "healthy",
        "uptime_secs": uptime.as_secs(),
        "version": env!("CARGO_PKG_VERSION"),
        "upstream_bases": state.gateway.upstream_bases(),
        "manifest_cache": state.gateway.cache_stats(),
        "manifest_ttl_secs": state.gateway.manifest_ttl().as_secs(),
    }))
}

/// Routes for `/mcp` and `/health`.
pub fn router(gateway: Gateway) -> Router {
    let mcp_gateway = gateway.clone();
    let mcp_service = StreamableHttpService::new(
        move || Ok(PoomHandler::new(mcp_gateway.clone())),
        LocalSessionManager::default().into(),
        Default::default(),
    );

    let health_router = Router::new()
        .route("/health", get(handle_health))
        .with_state(HealthState {
            gateway,
            start_time: Instant::now(),
        });

    Router::new()
        .nest_service("/mcp", mcp_service)
        .merge(health_router)
        .layer(TraceLayer::new_for_http())
}

/// Run the MCP gateway server until SIGINT/SIGTERM.
pub async fn run(gateway: Gateway, port: u16) -> Result<()> {
    info!(
        port,
        upstream = ?gateway.upstream_bases(),
        "poomgate MCP gateway starting"
    );

    let app = router(gateway);

    let addr = format!("0.0.0.0:{}", port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    info!("MCP (Streamable): POST http://{}/mcp", addr);
    info!("Health: GET http://{}/health", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received SIGINT, shutting down...");
        }
        _ = terminate() => {
            info!("Received SIGTERM, shutting down...");
        }
    }
}

#[cfg(unix)]
async fn terminate() {
    use tokio::signal::unix::{signal, SignalKind};
    match signal(SignalKind::terminate()) {
        Ok(mut sigterm) => {
            sigterm.recv().await;
        }
        Err(e) => {
            tracing::warn!(error = %e, "SIGTERM handler unavailable");
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(not(unix))]
async fn terminate() {
    std::future::pending::<()>().await;
}
