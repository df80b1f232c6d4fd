//! Common test utilities.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::Router;

use parlor::provider::{
    ChunkStream, GenerationChunk, GenerationProvider, GenerationRequest, GenerationResult,
    ProviderError,
};
use parlor::server::{build_app, AppState};
use parlor::session::SessionStore;
use parlor::turn::{TurnCoordinator, TurnLimits};

/// One scripted provider outcome, consumed per request.
pub enum Outcome {
    /// Non-streaming reply (streaming requests emit it as one final chunk).
    Reply(String),
    /// Streaming chunks, including any mid-stream errors.
    Chunks(Vec<Result<GenerationChunk, ProviderError>>),
    /// Fail the request before any output.
    Fail(u16, String),
}

/// A provider that replays queued outcomes in order.
pub struct ScriptedProvider {
    outcomes: Mutex<VecDeque<Outcome>>,
    ready: bool,
}

impl ScriptedProvider {
    pub fn new(outcomes: Vec<Outcome>) -> Arc<Self> {
        Arc::new(Self {
            outcomes: Mutex::new(outcomes.into()),
            ready: true,
        })
    }

    /// A provider whose backend reports unreachable.
    pub fn unready() -> Arc<Self> {
        Arc::new(Self {
            outcomes: Mutex::new(VecDeque::new()),
            ready: false,
        })
    }

    fn pop(&self) -> Outcome {
        self.outcomes
            .lock()
            .unwrap()
            .pop_front()
            .expect("scripted provider ran out of outcomes")
    }
}

#[async_trait]
impl GenerationProvider for ScriptedProvider {
    fn model(&self) -> &str {
        "test-model"
    }

    async fn generate(
        &self,
        _request: GenerationRequest,
    ) -> Result<GenerationResult, ProviderError> {
        match self.pop() {
            Outcome::Reply(text) => Ok(GenerationResult {
                text,
                model: "test-model".to_string(),
            }),
            Outcome::Fail(status, message) => Err(ProviderError::Api { status, message }),
            Outcome::Chunks(_) => panic!("chunk outcome used on the non-streaming path"),
        }
    }

    async fn generate_stream(
        &self,
        _request: GenerationRequest,
    ) -> Result<ChunkStream, ProviderError> {
        match self.pop() {
            Outcome::Reply(text) => Ok(Box::pin(futures::stream::iter(vec![Ok(
                GenerationChunk {
                    seq: 0,
                    text,
                    is_final: true,
                },
            )]))),
            Outcome::Chunks(chunks) => Ok(Box::pin(futures::stream::iter(chunks))),
            Outcome::Fail(status, message) => Err(ProviderError::Api { status, message }),
        }
    }

    async fn check_ready(&self) -> Result<(), ProviderError> {
        if self.ready {
            Ok(())
        } else {
            Err(ProviderError::Api {
                status: 503,
                message: "backend offline".to_string(),
            })
        }
    }
}

/// A chunk for scripting streaming outcomes.
pub fn chunk(seq: u64, text: &str, is_final: bool) -> Result<GenerationChunk, ProviderError> {
    Ok(GenerationChunk {
        seq,
        text: text.to_string(),
        is_final,
    })
}

/// Create test state around the given provider.
pub fn test_state(provider: Arc<dyn GenerationProvider>) -> (AppState, SessionStore) {
    let store = SessionStore::new();
    let coordinator = TurnCoordinator::new(store.clone(), provider, TurnLimits::default());
    (
        AppState {
            coordinator,
            keep_alive_interval_seconds: 15,
        },
        store,
    )
}

/// Create a test app around the given provider.
pub fn test_app(provider: Arc<dyn GenerationProvider>) -> Router {
    let (state, _) = test_state(provider);
    build_app(state, 300)
}

/// Create a test app plus a handle to its session store.
pub fn test_app_with_store(provider: Arc<dyn GenerationProvider>) -> (Router, SessionStore) {
    let (state, store) = test_state(provider);
    (build_app(state, 300), store)
}
