//! Inbound HTTP surface: `GET /usage` and a liveness check.

use crate::config::AppConfig;
use crate::error::AppError;
use crate::service::UsageService;
use axum::{
    extract::State,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde_json::json;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

#[derive(Clone)]
pub struct AppState {
    pub service: Arc<UsageService>,
    pub expose_error_details: bool,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/usage", get(get_usage))
        .route("/health", get(health))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn get_usage(State(state): State<AppState>) -> Response {
    match state.service.current_period_usage().await {
        Ok(result) => Json(result).into_response(),
        Err(e) => {
            error!(operation = "get_usage", error = %e, "error fetching usage data");
            e.to_response(state.expose_error_details)
        }
    }
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

pub async fn serve(cfg: &AppConfig, state: AppState) -> Result<(), AppError> {
    let addr = cfg.bind_addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| AppError::Server(format!("failed to bind {addr}: {e}")))?;

    info!(%addr, base_url = %cfg.base_url, "usage server listening");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| AppError::Server(e.to_string()))
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "failed to listen for shutdown signal");
        return;
    }
    info!("shutdown signal received");
}
