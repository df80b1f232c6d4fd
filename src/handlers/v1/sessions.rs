//! Session introspection HTTP handlers.

use axum::Json;
use axum::extract::{Path as PathExtract, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde::Deserialize;
use tracing::info;

use crate::api::{GetTurnsResponse, ListSessionsResponse, SessionSummary, TurnResponse};
use crate::handlers::problem_details;
use crate::server::AppState;

// ============================================================================
// Query Types
// ============================================================================

#[derive(Deserialize)]
pub struct GetTurnsQuery {
    /// Cap on returned turns; keeps the most recent ones.
    limit: Option<u32>,
}

// ============================================================================
// Handlers
// ============================================================================

/// GET /api/v1/sessions
pub async fn list_sessions(State(state): State<AppState>) -> Json<ListSessionsResponse> {
    let sessions: Vec<SessionSummary> = state
        .coordinator
        .store()
        .list()
        .into_iter()
        .map(|s| SessionSummary {
            session_id: s.id,
            turns: s.turns.len(),
            created_at: s.created_at.to_rfc3339(),
            last_active_at: s.last_active_at.to_rfc3339(),
            busy: s.busy,
        })
        .collect();

    Json(ListSessionsResponse { sessions })
}

/// GET /api/v1/sessions/{session_id}/turns
pub async fn get_turns(
    State(state): State<AppState>,
    PathExtract(session_id): PathExtract<String>,
    Query(query): Query<GetTurnsQuery>,
) -> impl IntoResponse {
    let Some(snapshot) = state.coordinator.store().snapshot(&session_id) else {
        return problem_details::not_found("session not found").into_response();
    };

    // `limit` keeps the tail of the history, oldest turns dropped first.
    let skip = match query.limit {
        Some(limit) => snapshot.turns.len().saturating_sub(limit as usize),
        None => 0,
    };
    let turns: Vec<_> = snapshot
        .turns
        .into_iter()
        .skip(skip)
        .map(|t| TurnResponse {
            role: t.role.to_string(),
            text: t.text,
            timestamp: t.timestamp.to_rfc3339(),
        })
        .collect();

    (StatusCode::OK, Json(GetTurnsResponse { turns })).into_response()
}

/// DELETE /api/v1/sessions/{session_id}
pub async fn delete_session(
    State(state): State<AppState>,
    PathExtract(session_id): PathExtract<String>,
) -> impl IntoResponse {
    if !state.coordinator.store().remove(&session_id) {
        return problem_details::not_found("session not found").into_response();
    }

    info!(session_id = %session_id, "Session reset");
    StatusCode::NO_CONTENT.into_response()
}
