//! Turn coordinator.
//!
//! Drives one turn end to end: validate input, take the session's
//! generation lease, call the provider, commit the user and assistant
//! turns, release the lease. A turn that fails at any point commits
//! nothing; the session's history only ever grows by a complete
//! user/assistant pair.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, info};
use ulid::Ulid;

use super::TurnError;
use crate::api::MESSAGE_ID_PREFIX;
use crate::provider::{ChunkStream, GenerationChunk, GenerationProvider, GenerationRequest};
use crate::session::{GenerationLease, SessionStore, StoreError, Turn};

// ============================================================================
// Limits
// ============================================================================

/// Validation and deadline limits applied to every turn.
#[derive(Debug, Clone)]
pub struct TurnLimits {
    /// Maximum length of a client-supplied session id, in characters.
    pub max_session_id_chars: usize,
    /// Maximum length of user text after trimming, in characters.
    pub max_input_chars: usize,
    /// Most recent turns sent to the provider as context; `None` sends all.
    pub max_context_turns: Option<usize>,
    /// Deadline for a whole non-streaming generation, and for each chunk
    /// gap in a streaming one.
    pub generation_timeout: Duration,
}

impl Default for TurnLimits {
    fn default() -> Self {
        Self {
            max_session_id_chars: 128,
            max_input_chars: 2000,
            max_context_turns: Some(20),
            generation_timeout: Duration::from_secs(60),
        }
    }
}

// ============================================================================
// Results
// ============================================================================

/// Outcome of a completed non-streaming turn.
#[derive(Debug, Clone)]
pub struct CompletedTurn {
    pub session_id: String,
    pub message_id: String,
    pub reply: String,
    pub model: String,
    pub latency_ms: u64,
}

/// A streaming turn that has acquired its lease and opened the provider
/// stream, but not yet produced output. The relay consumes it.
pub struct StreamingTurn {
    pub(crate) lease: GenerationLease,
    pub(crate) user_text: String,
    pub(crate) chunks: ChunkStream,
    pub(crate) model: String,
    pub(crate) generation_timeout: Duration,
}

impl StreamingTurn {
    /// The id of the session this turn runs in.
    pub fn session_id(&self) -> &str {
        self.lease.session_id()
    }
}

// ============================================================================
// Coordinator
// ============================================================================

/// Runs turns against a session store and a generation provider.
#[derive(Clone)]
pub struct TurnCoordinator {
    store: SessionStore,
    provider: Arc<dyn GenerationProvider>,
    limits: TurnLimits,
}

impl TurnCoordinator {
    #[must_use]
    pub fn new(store: SessionStore, provider: Arc<dyn GenerationProvider>, limits: TurnLimits) -> Self {
        Self {
            store,
            provider,
            limits,
        }
    }

    /// Validate a request and return the trimmed user text.
    fn validate(&self, session_id: &str, user_text: &str) -> Result<String, TurnError> {
        if session_id.is_empty() {
            return Err(TurnError::InvalidInput("session_id must not be empty".into()));
        }
        if session_id.chars().count() > self.limits.max_session_id_chars {
            return Err(TurnError::InvalidInput(format!(
                "session_id must be at most {} characters",
                self.limits.max_session_id_chars
            )));
        }

        let trimmed = user_text.trim();
        if trimmed.is_empty() {
            return Err(TurnError::InvalidInput("user_text must not be empty".into()));
        }
        if trimmed.chars().count() > self.limits.max_input_chars {
            return Err(TurnError::InvalidInput(format!(
                "user_text must be at most {} characters",
                self.limits.max_input_chars
            )));
        }

        Ok(trimmed.to_string())
    }

    fn acquire(&self, session_id: &str) -> Result<GenerationLease, TurnError> {
        self.store.acquire_for_generation(session_id).map_err(|e| match e {
            StoreError::SessionBusy => TurnError::ConcurrentTurnRejected {
                session_id: session_id.to_string(),
            },
            StoreError::StaleLease => TurnError::SessionReset,
        })
    }

    /// Run a full turn and return the complete reply.
    ///
    /// The lease is held for the whole call and released on every exit
    /// path. On timeout or provider failure the session is left exactly as
    /// it was.
    pub async fn run(&self, session_id: &str, user_text: &str) -> Result<CompletedTurn, TurnError> {
        let user_text = self.validate(session_id, user_text)?;
        let lease = self.acquire(session_id)?;

        let request = GenerationRequest {
            session_id: session_id.to_string(),
            context: lease.context(self.limits.max_context_turns),
            user_text: user_text.clone(),
        };

        let started = Instant::now();
        let result = tokio::time::timeout(self.limits.generation_timeout, self.provider.generate(request))
            .await
            .map_err(|_| TurnError::GenerationTimeout(self.limits.generation_timeout))??;
        let latency_ms = started.elapsed().as_millis() as u64;

        commit(&lease, &user_text, &result.text)?;

        let message_id = format!("{}{}", MESSAGE_ID_PREFIX, Ulid::new());
        info!(
            session_id = %session_id,
            message_id = %message_id,
            latency_ms,
            "Turn completed"
        );

        Ok(CompletedTurn {
            session_id: session_id.to_string(),
            message_id,
            reply: result.text,
            model: result.model,
            latency_ms,
        })
    }

    /// Validate, take the lease, and open the provider stream.
    ///
    /// Commit and release happen in the consumer; dropping the returned
    /// turn releases the lease without committing anything.
    pub async fn begin_stream(
        &self,
        session_id: &str,
        user_text: &str,
    ) -> Result<StreamingTurn, TurnError> {
        let user_text = self.validate(session_id, user_text)?;
        let lease = self.acquire(session_id)?;

        let request = GenerationRequest {
            session_id: session_id.to_string(),
            context: lease.context(self.limits.max_context_turns),
            user_text: user_text.clone(),
        };

        let chunks = tokio::time::timeout(
            self.limits.generation_timeout,
            self.provider.generate_stream(request),
        )
        .await
        .map_err(|_| TurnError::GenerationTimeout(self.limits.generation_timeout))??;

        debug!(session_id = %session_id, "Streaming turn started");

        Ok(StreamingTurn {
            lease,
            user_text,
            chunks,
            model: self.provider.model().to_string(),
            generation_timeout: self.limits.generation_timeout,
        })
    }

    /// The store this coordinator runs against.
    pub fn store(&self) -> &SessionStore {
        &self.store
    }

    /// The provider this coordinator generates with.
    pub fn provider(&self) -> &dyn GenerationProvider {
        self.provider.as_ref()
    }
}

/// Commit a completed user/assistant pair under the lease.
pub(crate) fn commit(lease: &GenerationLease, user_text: &str, reply: &str) -> Result<(), TurnError> {
    let map_stale = |e| match e {
        StoreError::StaleLease => TurnError::SessionReset,
        StoreError::SessionBusy => TurnError::ConcurrentTurnRejected {
            session_id: lease.session_id().to_string(),
        },
    };
    lease.append_turn(Turn::user(user_text)).map_err(map_stale)?;
    lease.append_turn(Turn::assistant(reply)).map_err(map_stale)?;
    Ok(())
}

// ============================================================================
// Chunk Sequencer
// ============================================================================

/// Verifies that stream chunks arrive with contiguous sequence numbers
/// starting at zero. A gap or regression means the stream is corrupted
/// and the turn must be abandoned.
#[derive(Debug, Default)]
pub struct ChunkSequencer {
    next: u64,
}

impl ChunkSequencer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn check(&mut self, chunk: &GenerationChunk) -> Result<(), TurnError> {
        if chunk.seq != self.next {
            return Err(TurnError::StreamCorrupted {
                expected: self.next,
                got: chunk.seq,
            });
        }
        self.next += 1;
        Ok(())
    }
}
