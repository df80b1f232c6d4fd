//! Generation provider abstraction and the Ollama implementation.

mod error;
mod ndjson;
mod ollama;
mod types;

use async_trait::async_trait;
use futures::stream;

pub use error::ProviderError;
pub use ndjson::NdjsonLineStream;
pub use ollama::{ApiMode, OllamaProvider, RetryPolicy};
pub use types::{ChunkStream, GenerationChunk, GenerationRequest, GenerationResult};

// ============================================================================
// GenerationProvider Trait
// ============================================================================

/// Trait for text generation backends.
#[async_trait]
pub trait GenerationProvider: Send + Sync {
    /// The model name this provider generates with.
    fn model(&self) -> &str;

    /// Run a full generation and return the complete reply.
    async fn generate(&self, request: GenerationRequest) -> Result<GenerationResult, ProviderError>;

    /// Run a generation as a stream of ordered chunks.
    ///
    /// Default implementation calls the non-streaming API and emits the full
    /// reply as a single final chunk, so backends without native streaming
    /// still work behind the streaming endpoint. Override for real
    /// token-by-token streaming.
    async fn generate_stream(&self, request: GenerationRequest) -> Result<ChunkStream, ProviderError> {
        let result = self.generate(request).await?;
        Ok(Box::pin(stream::iter(vec![Ok(GenerationChunk {
            seq: 0,
            text: result.text,
            is_final: true,
        })])))
    }

    /// Check whether the backend is reachable, for readiness reporting.
    ///
    /// Default implementation reports ready; providers with a remote
    /// backend should override this with a real check.
    async fn check_ready(&self) -> Result<(), ProviderError> {
        Ok(())
    }
}
