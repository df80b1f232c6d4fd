//! Shared API types used by the server handlers.
//!
//! These types define the wire contract; changes here are visible to every
//! client, so keep them additive.

use serde::{Deserialize, Serialize};

// ============================================================================
// ID Prefixes
// ============================================================================

/// ID prefix for messages.
pub const MESSAGE_ID_PREFIX: &str = "msg_";

// ============================================================================
// SSE Event Names
// ============================================================================

/// SSE event type names used in streaming responses.
pub mod sse {
    pub const START: &str = "start";
    pub const TOKEN: &str = "token";
    pub const DONE: &str = "done";
    pub const ERROR: &str = "error";
    pub const CANCELLED: &str = "cancelled";
}

// ============================================================================
// Chat Types
// ============================================================================

/// Request body for `/api/v1/chat` and `/api/v1/chat/stream`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRequest {
    pub session_id: String,
    pub user_text: String,
}

/// Response for a non-streaming chat turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatResponse {
    pub session_id: String,
    pub message_id: String,
    pub reply: String,
    pub model: String,
    pub latency_ms: u64,
}

// ============================================================================
// Session Types
// ============================================================================

/// Summary of a session in list responses.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSummary {
    pub session_id: String,
    pub turns: usize,
    pub created_at: String,
    pub last_active_at: String,
    /// True while a generation is in flight for this session.
    pub busy: bool,
}

/// Response for listing sessions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListSessionsResponse {
    pub sessions: Vec<SessionSummary>,
}

/// A single turn in history responses.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnResponse {
    pub role: String,
    pub text: String,
    pub timestamp: String,
}

/// Response for getting a session's turn history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetTurnsResponse {
    pub turns: Vec<TurnResponse>,
}
