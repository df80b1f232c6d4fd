//! Chat HTTP handlers.

use std::time::Duration;

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::sse::{KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::api::{ChatRequest, ChatResponse};
use crate::handlers::problem_details;
use crate::relay::TurnStream;
use crate::server::AppState;
use crate::turn::TurnError;

/// POST /api/v1/chat
pub async fn chat(
    State(state): State<AppState>,
    Json(req): Json<ChatRequest>,
) -> impl IntoResponse {
    match state.coordinator.run(&req.session_id, &req.user_text).await {
        Ok(turn) => (
            StatusCode::OK,
            Json(ChatResponse {
                session_id: turn.session_id,
                message_id: turn.message_id,
                reply: turn.reply,
                model: turn.model,
                latency_ms: turn.latency_ms,
            }),
        )
            .into_response(),
        Err(e) => turn_error_response(&e),
    }
}

/// POST /api/v1/chat/stream
pub async fn chat_stream(
    State(state): State<AppState>,
    Json(req): Json<ChatRequest>,
) -> Response {
    let turn = match state
        .coordinator
        .begin_stream(&req.session_id, &req.user_text)
        .await
    {
        Ok(turn) => turn,
        Err(e) => return turn_error_response(&e),
    };

    let cancel_token = CancellationToken::new();
    let stream = TurnStream::new(turn, cancel_token);

    Sse::new(stream)
        .keep_alive(
            KeepAlive::new()
                .interval(Duration::from_secs(state.keep_alive_interval_seconds))
                .text("keep-alive"),
        )
        .into_response()
}

/// Map a turn error to its problem details response.
fn turn_error_response(error: &TurnError) -> Response {
    match error {
        TurnError::InvalidInput(_) => problem_details::bad_request(error.to_string()),
        TurnError::ConcurrentTurnRejected { .. } => problem_details::conflict(error.to_string()),
        TurnError::GenerationTimeout(_) => problem_details::gateway_timeout(error.to_string()),
        TurnError::Provider(_) => {
            warn!(error = %error, "Generation failed");
            problem_details::bad_gateway(error.to_string())
        }
        TurnError::StreamCorrupted { .. } => {
            warn!(error = %error, "Generation failed");
            problem_details::internal_error(error.to_string())
        }
        TurnError::SessionReset => problem_details::conflict(error.to_string()),
    }
    .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::ProviderError;

    #[test]
    fn maps_invalid_input_to_400() {
        let response =
            turn_error_response(&TurnError::InvalidInput("user_text must not be empty".into()));
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn maps_concurrent_turn_to_409() {
        let response = turn_error_response(&TurnError::ConcurrentTurnRejected {
            session_id: "demo".to_string(),
        });
        assert_eq!(response.status(), StatusCode::CONFLICT);
    }

    #[test]
    fn maps_timeout_to_504() {
        let response =
            turn_error_response(&TurnError::GenerationTimeout(Duration::from_secs(60)));
        assert_eq!(response.status(), StatusCode::GATEWAY_TIMEOUT);
    }

    #[test]
    fn maps_provider_error_to_502() {
        let response = turn_error_response(&TurnError::Provider(ProviderError::Api {
            status: 500,
            message: "backend down".to_string(),
        }));
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    }

    #[test]
    fn maps_stream_corruption_to_500() {
        let response = turn_error_response(&TurnError::StreamCorrupted { expected: 1, got: 3 });
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
