//! HTTP server setup.

use std::time::Duration;

use axum::Router;
use axum::http::StatusCode;
use axum::routing::{get, post};
use tower_http::timeout::TimeoutLayer;

use crate::handlers;
use crate::turn::TurnCoordinator;

// ============================================================================
// Application State
// ============================================================================

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub coordinator: TurnCoordinator,
    pub keep_alive_interval_seconds: u64,
}

// ============================================================================
// Server Setup
// ============================================================================

pub fn build_app(state: AppState, request_timeout_seconds: u64) -> Router {
    // SSE streaming route - no request timeout (per-chunk timeout applies inside)
    let streaming_routes = Router::new()
        .route("/chat/stream", post(handlers::v1::chat_stream))
        .with_state(state.clone());

    // Regular API routes - with request timeout
    let api_routes = Router::new()
        .route("/chat", post(handlers::v1::chat))
        .route("/sessions", get(handlers::v1::list_sessions))
        .route(
            "/sessions/{session_id}/turns",
            get(handlers::v1::get_turns),
        )
        .route(
            "/sessions/{session_id}",
            axum::routing::delete(handlers::v1::delete_session),
        )
        .with_state(state.clone())
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            Duration::from_secs(request_timeout_seconds),
        ));

    let api_v1 = Router::new().merge(streaming_routes).merge(api_routes);

    let health_routes = Router::new()
        .route("/livez", get(handlers::livez))
        .route("/readyz", get(handlers::readyz))
        .route("/version", get(handlers::version))
        .with_state(state);

    Router::new().merge(health_routes).nest("/api/v1", api_v1)
}
