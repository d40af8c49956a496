//! Framed-text protocol decoder for the chat stream.
//!
//! The service answers `POST /api/chat/stream` with a sequence of text lines.
//! Meaningful lines carry a `data:` prefix followed by a JSON record with a
//! `type` discriminator; blank lines and anything else are padding. Lines may
//! arrive split at arbitrary byte offsets, so the decoder buffers raw bytes
//! and only decodes once a full line terminator has been seen.
//!
//! A record that fails to parse is dropped rather than failing the stream:
//! a transient encoding glitch must never take the whole exchange down.
//! Drops are counted and logged at debug level so sustained protocol drift
//! stays detectable.

use std::collections::VecDeque;
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures::Stream;
use serde::Deserialize;

/// Prefix marking a data line in the stream.
pub const DATA_PREFIX: &str = "data:";

/// One discrete protocol event parsed from the streaming response.
///
/// Per session the valid sequence is: at most one `Start`, any number of
/// `Chunk`, exactly one terminal `Done` or `Error`. Enforcing that shape is
/// the session's job; the decoder only yields frames in arrival order.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Frame {
    /// The server accepted the request and is about to respond.
    Start,
    /// A progress update carrying the accumulated answer so far.
    ///
    /// `accumulated` is the running total, not a delta; it never shrinks.
    Chunk {
        #[serde(default)]
        accumulated: String,
        #[serde(default)]
        gem_name: Option<String>,
        #[serde(default)]
        is_orchestrator: bool,
    },
    /// Terminal frame with the finalized answer.
    Done {
        #[serde(default)]
        answer: String,
        #[serde(default)]
        gem_name: Option<String>,
        #[serde(default)]
        is_orchestrator: bool,
        #[serde(default)]
        error: Option<String>,
    },
    /// Terminal frame signalling the server gave up on the exchange.
    Error { error: String },
}

impl Frame {
    /// Whether this frame ends the session.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done { .. } | Self::Error { .. })
    }
}

// ============================================================================
// Decoder
// ============================================================================

/// Incremental line-framed decoder.
///
/// Feed it raw network reads; it yields zero or more complete frames per
/// call and retains any unterminated tail for the next read.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    pending: Vec<u8>,
    dropped: u64,
}

impl FrameDecoder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode all complete lines contained in the buffer after appending
    /// `chunk`, returning the frames they carried in arrival order.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<Frame> {
        self.pending.extend_from_slice(chunk);

        let mut frames = Vec::new();
        while let Some(newline) = self.pending.iter().position(|&b| b == b'\n') {
            let mut line: Vec<u8> = self.pending.drain(..=newline).collect();
            line.pop(); // the '\n'
            if line.last() == Some(&b'\r') {
                line.pop();
            }

            if let Some(frame) = self.decode_line(&line) {
                frames.push(frame);
            }
        }

        frames
    }

    /// Flush the retained tail at end of stream.
    ///
    /// A final data line without a trailing terminator is still decoded.
    pub fn finish(&mut self) -> Vec<Frame> {
        if self.pending.is_empty() {
            return Vec::new();
        }

        let line = std::mem::take(&mut self.pending);
        self.decode_line(&line).into_iter().collect()
    }

    /// Number of data lines dropped because their record failed to parse.
    pub fn dropped_lines(&self) -> u64 {
        self.dropped
    }

    fn decode_line(&mut self, line: &[u8]) -> Option<Frame> {
        let text = String::from_utf8_lossy(line);
        let text = text.trim();

        // Blank lines and lines without the data marker are padding.
        let payload = text.strip_prefix(DATA_PREFIX)?;
        let payload = payload.strip_prefix(' ').unwrap_or(payload);

        match serde_json::from_str::<Frame>(payload) {
            Ok(frame) => Some(frame),
            Err(e) => {
                self.dropped += 1;
                tracing::debug!(
                    payload = %payload,
                    error = %e,
                    dropped = self.dropped,
                    "dropping malformed frame record"
                );
                None
            }
        }
    }
}

// ============================================================================
// Stream adapter
// ============================================================================

/// Stream adapter decoding frames from a byte stream.
///
/// Yields frames strictly in arrival order, including several frames
/// buffered within one network read.
pub struct FrameStream<S> {
    inner: S,
    decoder: FrameDecoder,
    ready: VecDeque<Frame>,
    done: bool,
}

impl<S> FrameStream<S> {
    #[must_use]
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            decoder: FrameDecoder::new(),
            ready: VecDeque::new(),
            done: false,
        }
    }
}

impl<S, E> Stream for FrameStream<S>
where
    S: Stream<Item = Result<Bytes, E>> + Unpin,
{
    type Item = Result<Frame, E>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();

        loop {
            if let Some(frame) = this.ready.pop_front() {
                return Poll::Ready(Some(Ok(frame)));
            }

            if this.done {
                return Poll::Ready(None);
            }

            match Pin::new(&mut this.inner).poll_next(cx) {
                Poll::Ready(Some(Ok(bytes))) => {
                    this.ready.extend(this.decoder.feed(&bytes));
                }
                Poll::Ready(Some(Err(e))) => return Poll::Ready(Some(Err(e))),
                Poll::Ready(None) => {
                    this.done = true;
                    this.ready.extend(this.decoder.finish());
                }
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}
