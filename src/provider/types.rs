//! Generation request and chunk types.

use std::pin::Pin;

use futures::Stream;

use super::ProviderError;
use crate::session::Turn;

/// Input to a generation: the session's prior turns plus the new user text.
/// Built fresh per call, never persisted.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub session_id: String,
    pub context: Vec<Turn>,
    pub user_text: String,
}

/// Complete result of a non-streaming generation.
#[derive(Debug, Clone)]
pub struct GenerationResult {
    pub text: String,
    pub model: String,
}

/// One ordered piece of a streaming generation.
///
/// `seq` is strictly increasing within a stream. The chunk with
/// `is_final: true` is the last one; its text may be empty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationChunk {
    pub seq: u64,
    pub text: String,
    pub is_final: bool,
}

/// A pinned stream of generation chunks.
pub type ChunkStream = Pin<Box<dyn Stream<Item = Result<GenerationChunk, ProviderError>> + Send>>;
