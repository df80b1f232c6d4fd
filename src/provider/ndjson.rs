//! Newline-delimited JSON line parser.
//!
//! Ollama streams its responses as NDJSON: one JSON object per line.
//! This adapter buffers raw bytes and splits on `\n` (and `\r\n`) before
//! decoding, so a multi-byte character split across network reads is
//! reassembled intact; callers decode each line according to their own
//! response format.

use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::{Bytes, BytesMut};
use futures::Stream;

/// A stream adapter that yields complete lines from a byte stream.
///
/// Blank lines are skipped. A trailing line without a newline is
/// emitted when the underlying stream ends. Invalid UTF-8 within a
/// line is replaced rather than dropped.
pub struct NdjsonLineStream<S> {
    inner: S,
    buffer: BytesMut,
    done: bool,
}

impl<S> NdjsonLineStream<S> {
    #[must_use]
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            buffer: BytesMut::new(),
            done: false,
        }
    }

    fn take_line(&mut self, newline_at: usize) -> BytesMut {
        let mut line = self.buffer.split_to(newline_at + 1);
        line.truncate(newline_at);
        if line.last() == Some(&b'\r') {
            line.truncate(line.len() - 1);
        }
        line
    }
}

impl<S, E> Stream for NdjsonLineStream<S>
where
    S: Stream<Item = Result<Bytes, E>> + Unpin,
{
    type Item = Result<String, E>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.done {
            return Poll::Ready(None);
        }

        loop {
            // Try to extract a complete line from the buffer
            if let Some(newline_at) = self.buffer.iter().position(|&b| b == b'\n') {
                let line = self.take_line(newline_at);

                if line.is_empty() {
                    continue;
                }

                return Poll::Ready(Some(Ok(String::from_utf8_lossy(&line).into_owned())));
            }

            // Need more data from the underlying stream
            match Pin::new(&mut self.inner).poll_next(cx) {
                Poll::Ready(Some(Ok(bytes))) => {
                    self.buffer.extend_from_slice(&bytes);
                    // Continue loop to try parsing
                }
                Poll::Ready(Some(Err(e))) => {
                    return Poll::Ready(Some(Err(e)));
                }
                Poll::Ready(None) => {
                    self.done = true;
                    // Emit any remaining buffer content
                    if !self.buffer.is_empty() {
                        let line = std::mem::take(&mut self.buffer);
                        return Poll::Ready(Some(Ok(
                            String::from_utf8_lossy(&line).into_owned()
                        )));
                    }
                    return Poll::Ready(None);
                }
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}
