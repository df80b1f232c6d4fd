//! Turn error types.

use std::time::Duration;

use thiserror::Error;

use crate::provider::ProviderError;

/// Errors that can occur while running a turn.
#[derive(Debug, Error)]
pub enum TurnError {
    /// Request failed validation before touching the session.
    #[error("{0}")]
    InvalidInput(String),

    /// Another turn is already in progress for this session.
    #[error("a turn is already in progress for session '{session_id}'")]
    ConcurrentTurnRejected { session_id: String },

    /// The generation backend failed.
    #[error(transparent)]
    Provider(#[from] ProviderError),

    /// Generation did not produce output within the deadline.
    #[error("generation timed out after {0:?}")]
    GenerationTimeout(Duration),

    /// The chunk stream violated its ordering contract.
    #[error("generation stream corrupted: expected seq {expected}, got {got}")]
    StreamCorrupted { expected: u64, got: u64 },

    /// The session was reset or evicted while the turn was in progress.
    #[error("session was reset while the turn was in progress")]
    SessionReset,
}
