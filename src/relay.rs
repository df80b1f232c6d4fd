//! SSE relay for streaming turns.
//!
//! Wraps a [`StreamingTurn`] as an axum SSE body: emits a `start` event,
//! a `token` event per chunk, and commits the accumulated reply before
//! the `done` event. Any failure emits an `error` event instead and
//! commits nothing. Dropping the stream mid-flight (client disconnect)
//! cancels the generation and releases the lease without committing.

use std::convert::Infallible;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

use axum::response::sse::Event;
use serde::Serialize;
use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use ulid::Ulid;

use crate::api::{sse as sse_events, MESSAGE_ID_PREFIX};
use crate::provider::{GenerationChunk, ProviderError};
use crate::session::GenerationLease;
use crate::turn::{ChunkSequencer, StreamingTurn, TurnError};

// ============================================================================
// Public API
// ============================================================================

/// A stream wrapper that relays generation chunks as SSE events and
/// commits the turn when the final chunk arrives.
///
/// Features:
/// - Per-chunk idle timeout via `tokio_stream::StreamExt::timeout()`
/// - Sequence checking: out-of-order chunks abort the turn
/// - Emits `start` before streaming, `done` with the message ID after the
///   reply is committed
/// - Drop safety: the lease is released on every path, committed or not
pub struct TurnStream {
    inner: FlattenedChunkStream,
    lease: Option<GenerationLease>,
    session_id: String,
    user_text: String,
    message_id: String,
    model: String,
    accumulated: String,
    sequencer: ChunkSequencer,
    started_at: Instant,
    started: bool,
    /// The final chunk carried text that went out as a token; commit and
    /// emit `done` on the next poll.
    done_pending: bool,
    finished: bool,
    cancel_token: CancellationToken,
}

impl TurnStream {
    /// Wrap a streaming turn for SSE delivery.
    #[must_use]
    pub fn new(turn: StreamingTurn, cancel_token: CancellationToken) -> Self {
        let StreamingTurn {
            lease,
            user_text,
            chunks,
            model,
            generation_timeout,
        } = turn;

        let session_id = lease.session_id().to_string();
        let message_id = format!("{}{}", MESSAGE_ID_PREFIX, Ulid::new());

        // Wrap the chunk stream with a per-chunk timeout and cancellation,
        // flattening the nested Results.
        let cancel = cancel_token.clone();
        let timed = chunks.timeout(generation_timeout);
        let flattened = tokio_stream::StreamExt::map(timed, move |result| {
            if cancel.is_cancelled() {
                return Err(StreamError::Cancelled);
            }
            match result {
                Ok(Ok(chunk)) => Ok(chunk),
                Ok(Err(e)) => Err(StreamError::Provider(e)),
                Err(_elapsed) => Err(StreamError::Timeout(generation_timeout)),
            }
        });

        Self {
            inner: Box::pin(flattened),
            lease: Some(lease),
            session_id,
            user_text,
            message_id,
            model,
            accumulated: String::new(),
            sequencer: ChunkSequencer::new(),
            started_at: Instant::now(),
            started: false,
            done_pending: false,
            finished: false,
            cancel_token,
        }
    }

    fn token_event(text: String) -> Event {
        Event::default()
            .event(sse_events::TOKEN)
            .json_data(TokenData { content: text })
            .unwrap_or_else(|_| Event::default().event(sse_events::TOKEN).data("{}"))
    }

    fn finish_with_error(&mut self, message: String) -> Event {
        self.finished = true;
        // Drop the lease without committing; the session stays as it was.
        self.lease.take();
        Event::default()
            .event(sse_events::ERROR)
            .json_data(ErrorData { message })
            .unwrap_or_else(|_| Event::default().event(sse_events::ERROR).data("{}"))
    }

    /// Commit the accumulated reply and build the `done` event.
    fn finish_committed(&mut self) -> Event {
        self.finished = true;

        let Some(lease) = self.lease.take() else {
            return self.finish_with_error("lease already released".to_string());
        };

        if let Err(e) = crate::turn::commit(&lease, &self.user_text, &self.accumulated) {
            return self.finish_with_error(e.to_string());
        }

        info!(
            session_id = %self.session_id,
            message_id = %self.message_id,
            reply_len = self.accumulated.len(),
            "Streaming turn committed"
        );

        Event::default()
            .event(sse_events::DONE)
            .json_data(DoneData {
                message_id: self.message_id.clone(),
                model: self.model.clone(),
                latency_ms: self.started_at.elapsed().as_millis() as u64,
            })
            .unwrap_or_else(|_| Event::default().event(sse_events::DONE).data("{}"))
    }
}

impl futures::Stream for TurnStream {
    type Item = Result<Event, Infallible>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.finished {
            return Poll::Ready(None);
        }

        if self.done_pending {
            return Poll::Ready(Some(Ok(self.finish_committed())));
        }

        // Emit start event on first poll
        if !self.started {
            self.started = true;
            let event = Event::default()
                .event(sse_events::START)
                .json_data(StartData {
                    session_id: self.session_id.clone(),
                    model: self.model.clone(),
                })
                .unwrap_or_else(|_| Event::default().event(sse_events::START).data("{}"));
            return Poll::Ready(Some(Ok(event)));
        }

        loop {
            match futures::Stream::poll_next(self.inner.as_mut(), cx) {
                Poll::Ready(Some(Ok(chunk))) => {
                    if let Err(e) = self.sequencer.check(&chunk) {
                        return Poll::Ready(Some(Ok(self.finish_with_error(e.to_string()))));
                    }

                    let GenerationChunk { text, is_final, .. } = chunk;
                    self.accumulated.push_str(&text);

                    if is_final {
                        if text.is_empty() {
                            return Poll::Ready(Some(Ok(self.finish_committed())));
                        }
                        // The final chunk's text is still output; deliver it
                        // as a token and finish on the next poll.
                        self.done_pending = true;
                        return Poll::Ready(Some(Ok(Self::token_event(text))));
                    }

                    if text.is_empty() {
                        continue;
                    }

                    return Poll::Ready(Some(Ok(Self::token_event(text))));
                }

                Poll::Ready(Some(Err(StreamError::Timeout(timeout)))) => {
                    let message = TurnError::GenerationTimeout(timeout).to_string();
                    return Poll::Ready(Some(Ok(self.finish_with_error(message))));
                }

                Poll::Ready(Some(Err(StreamError::Provider(e)))) => {
                    return Poll::Ready(Some(Ok(self.finish_with_error(e.to_string()))));
                }

                Poll::Ready(Some(Err(StreamError::Cancelled))) => {
                    self.finished = true;
                    self.lease.take();
                    let event = Event::default().event(sse_events::CANCELLED).data("{}");
                    return Poll::Ready(Some(Ok(event)));
                }

                Poll::Ready(None) => {
                    // The provider must end with a final chunk; a bare EOF is
                    // a truncated generation and commits nothing.
                    let message = "stream ended before completion".to_string();
                    return Poll::Ready(Some(Ok(self.finish_with_error(message))));
                }

                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

impl Drop for TurnStream {
    fn drop(&mut self) {
        // Client disconnected mid-stream: cancel the generation. The lease
        // drops with us, so the session is free for the next turn.
        if !self.finished {
            info!(
                session_id = %self.session_id,
                message_id = %self.message_id,
                accumulated_len = self.accumulated.len(),
                "SSE stream dropped before completion, cancelling generation"
            );
            self.cancel_token.cancel();
        } else {
            debug!(session_id = %self.session_id, "SSE stream closed");
        }
    }
}

// ============================================================================
// Internal Types
// ============================================================================

/// Unified error type for streaming, flattening nested Results.
enum StreamError {
    Provider(ProviderError),
    Timeout(Duration),
    Cancelled,
}

type FlattenedChunkStream =
    Pin<Box<dyn futures::Stream<Item = Result<GenerationChunk, StreamError>> + Send>>;

#[derive(Serialize)]
struct StartData {
    session_id: String,
    model: String,
}

#[derive(Serialize)]
struct TokenData {
    content: String,
}

#[derive(Serialize)]
struct DoneData {
    message_id: String,
    model: String,
    latency_ms: u64,
}

#[derive(Serialize)]
struct ErrorData {
    message: String,
}
