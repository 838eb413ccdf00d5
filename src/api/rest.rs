// =============================================================================
// REST API Endpoints — Axum 0.7
// =============================================================================
//
// The control surface is deliberately thin: a public health check, an
// authenticated active-timeframe command, and the WebSocket upgrade mounted
// alongside them. Everything else about the engine's state is observed
// through the event bus, not polled through REST.
//
// CORS is configured permissively for development; tighten `allowed_origins`
// in production.
// =============================================================================

use std::sync::Arc;

use axum::{
    extract::{Json, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};

use crate::api::auth::AuthBearer;
use crate::app_state::AppState;
use crate::types::Timeframe;

// =============================================================================
// Router construction
// =============================================================================

/// Build the full REST API router with CORS middleware and shared state.
pub fn router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // ── Public ──────────────────────────────────────────────────
        .route("/api/v1/health", get(health))
        // ── Authenticated control surface ───────────────────────────
        .route("/api/v1/control/active-timeframe", post(set_active_timeframe))
        // ── WebSocket (handled in the ws module, mounted here) ──────
        .route("/api/v1/ws", get(crate::api::ws::ws_handler))
        // ── Middleware & State ───────────────────────────────────────
        .layer(cors)
        .with_state(state)
}

// =============================================================================
// Health (public)
// =============================================================================

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    state_version: u64,
    active_timeframe: String,
    uptime_seconds: u64,
    ticks_received: u64,
    server_time: i64,
}

async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let counters = state.broker_counters();
    let resp = HealthResponse {
        status: "ok",
        state_version: state.state_version.load(std::sync::atomic::Ordering::Relaxed),
        active_timeframe: state.orchestrator.active_timeframe().to_string(),
        uptime_seconds: state.uptime_seconds(),
        ticks_received: counters.ticks_received.load(std::sync::atomic::Ordering::Relaxed),
        server_time: chrono::Utc::now().timestamp_millis(),
    };
    Json(resp)
}

// =============================================================================
// Control surface: set_active_timeframe (authenticated)
// =============================================================================

#[derive(Deserialize)]
struct SetActiveTimeframeRequest {
    timeframe: String,
}

#[derive(Serialize)]
struct SetActiveTimeframeResponse {
    active_timeframe: String,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

async fn set_active_timeframe(
    _auth: AuthBearer,
    State(state): State<Arc<AppState>>,
    Json(req): Json<SetActiveTimeframeRequest>,
) -> impl IntoResponse {
    let Some(tf) = Timeframe::parse(&req.timeframe) else {
        warn!(requested = %req.timeframe, "rejected unknown timeframe in control request");
        return (
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse { error: format!("unknown timeframe: {}", req.timeframe) }),
        )
            .into_response();
    };

    let available = state.config.read().available_timeframes.clone();
    if !available.contains(&tf) {
        warn!(requested = %tf, "rejected timeframe not in configured set");
        return (
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse { error: format!("timeframe {tf} is not configured") }),
        )
            .into_response();
    }

    state.set_active_timeframe(tf);
    info!(timeframe = %tf, "active timeframe changed via control surface");
    state.bump_version();

    Json(SetActiveTimeframeResponse { active_timeframe: tf.to_string() }).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime_config::EngineConfig;

    #[tokio::test]
    async fn health_reports_ok_status() {
        let state = Arc::new(AppState::new(EngineConfig::default()));
        let response = health(State(state)).await.into_response();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
