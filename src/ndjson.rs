//! NDJSON chat-stream framing.
//!
//! Ollama streams chat completions as newline-delimited JSON objects, and
//! the network is free to split or merge those lines across packets. This
//! wrapper accumulates incoming bytes until a complete line is available,
//! decodes it, and yields the completion-text delta it carries. The sequence
//! ends at the chunk flagged `done`; anything arriving after it is not
//! delivered.

use bytes::{Bytes, BytesMut};
use futures_util::Stream;
use std::pin::Pin;
use std::task::{Context, Poll};

use crate::ollama::ChatChunk;

/// A stream wrapper that re-frames raw bytes into completion-text chunks.
///
/// Consumers pull lazily; dropping the stream cancels production upstream.
pub struct NdjsonTextStream<S> {
    inner: S,
    buffer: BytesMut,
    done: bool,
    eof: bool,
}

impl<S> NdjsonTextStream<S> {
    /// Wrap a raw byte stream with NDJSON framing.
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            buffer: BytesMut::new(),
            done: false,
            eof: false,
        }
    }
}

enum LineStep {
    /// Nothing to deliver from this line.
    Skip,
    /// A completion-text delta.
    Text(Bytes),
    /// A malformed or error-bearing line; the stream ends here.
    Fail(std::io::Error),
}

fn decode_line(line: &[u8], done: &mut bool) -> LineStep {
    if line.iter().all(u8::is_ascii_whitespace) {
        return LineStep::Skip;
    }

    let chunk: ChatChunk = match serde_json::from_slice(line) {
        Ok(chunk) => chunk,
        Err(err) => {
            *done = true;
            return LineStep::Fail(std::io::Error::other(format!(
                "malformed stream chunk: {err}"
            )));
        }
    };

    if let Some(error) = chunk.error {
        *done = true;
        return LineStep::Fail(std::io::Error::other(error));
    }

    if chunk.done {
        *done = true;
    }

    match chunk
        .message
        .and_then(|message| message.content)
        .filter(|content| !content.is_empty())
    {
        Some(content) => LineStep::Text(Bytes::from(content)),
        None => LineStep::Skip,
    }
}

impl<S> Stream for NdjsonTextStream<S>
where
    S: Stream<Item = Result<Bytes, std::io::Error>> + Unpin,
{
    type Item = Result<Bytes, std::io::Error>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = &mut *self;

        loop {
            if this.done {
                return Poll::Ready(None);
            }

            // Drain complete lines from the buffer before polling for more.
            if let Some(pos) = this.buffer.iter().position(|byte| *byte == b'\n') {
                let line = this.buffer.split_to(pos + 1);
                match decode_line(&line[..pos], &mut this.done) {
                    LineStep::Skip => continue,
                    LineStep::Text(text) => return Poll::Ready(Some(Ok(text))),
                    LineStep::Fail(err) => return Poll::Ready(Some(Err(err))),
                }
            }

            if this.eof {
                // Stream ended without a trailing newline; decode what's left.
                if this.buffer.is_empty() {
                    return Poll::Ready(None);
                }
                let line = this.buffer.split();
                let step = decode_line(&line, &mut this.done);
                this.done = true;
                return match step {
                    LineStep::Skip => Poll::Ready(None),
                    LineStep::Text(text) => Poll::Ready(Some(Ok(text))),
                    LineStep::Fail(err) => Poll::Ready(Some(Err(err))),
                };
            }

            match Pin::new(&mut this.inner).poll_next(cx) {
                Poll::Ready(Some(Ok(chunk))) => {
                    this.buffer.extend_from_slice(&chunk);
                    // Loop back to check for complete lines.
                }
                Poll::Ready(Some(Err(err))) => {
                    this.done = true;
                    return Poll::Ready(Some(Err(err)));
                }
                Poll::Ready(None) => {
                    this.eof = true;
                }
                Poll::Pending => {
                    return Poll::Pending;
                }
            }
        }
    }
}
