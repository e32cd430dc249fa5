//! Incremental decoding of streaming responses.
//!
//! Ollama streams newline-delimited JSON; OpenAI-compatible servers stream
//! server-sent events whose `data:` lines carry the JSON chunks. Every
//! non-empty increment is appended to a buffer and the buffer as a whole is
//! yielded, so a consumer can redraw the full answer on each item. A
//! `done: true` chunk or a `data: [DONE]` line ends the stream even if the
//! server keeps sending.

use std::collections::VecDeque;
use std::pin::Pin;
use std::task::{Context, Poll};

use futures_util::stream::{self, BoxStream, Stream, StreamExt};
use serde_json::Value;
use tracing::debug;

use crate::audit::PendingCall;
use crate::backend::Envelope;
use crate::error::LlmError;

const SSE_DATA: &str = "data:";
const SSE_DONE: &str = "[DONE]";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    Accumulating,
    Done,
}

/// Accumulates answer text out of streaming chunks, one line at a time.
#[derive(Debug)]
pub struct StreamAccumulator {
    buffer: String,
    state: StreamState,
    server_sent_events: bool,
}

/// Increment text of one chunk: chat, plain-text, generate, then OpenAI delta shape.
fn chunk_content(chunk: &Value) -> Option<&str> {
    chunk
        .get("message")
        .and_then(|m| m.get("content"))
        .and_then(Value::as_str)
        .or_else(|| chunk.get("text").and_then(Value::as_str))
        .or_else(|| chunk.get("response").and_then(Value::as_str))
        .or_else(|| chunk.pointer("/choices/0/delta/content").and_then(Value::as_str))
}

impl StreamAccumulator {
    /// Accumulator for newline-delimited JSON.
    pub fn new() -> Self {
        Self { buffer: String::new(), state: StreamState::Accumulating, server_sent_events: false }
    }

    /// Accumulator for server-sent events: only `data:` lines carry chunks.
    pub fn server_sent_events() -> Self {
        Self { server_sent_events: true, ..Self::new() }
    }

    pub fn for_envelope(envelope: Envelope) -> Self {
        match envelope {
            Envelope::OpenAi => Self::server_sent_events(),
            Envelope::Chat | Envelope::Generate => Self::new(),
        }
    }

    /// Feed one line (without its terminator). Returns the whole buffer when
    /// the line added text.
    ///
    /// Empty lines are skipped; any other line that is not JSON is appended
    /// verbatim. Once a `done` chunk has been seen every further line is
    /// ignored.
    pub fn feed_line(&mut self, line: &[u8]) -> Option<String> {
        if self.state == StreamState::Done || line.is_empty() {
            return None;
        }

        let line = String::from_utf8_lossy(line);
        let text = if self.server_sent_events {
            // event:, id: and comment lines carry no text
            let payload = line.strip_prefix(SSE_DATA)?;
            let payload = payload.strip_prefix(' ').unwrap_or(payload);
            if payload.trim() == SSE_DONE {
                self.state = StreamState::Done;
                return None;
            }
            payload
        } else {
            line.as_ref()
        };
        if text.is_empty() {
            return None;
        }

        match serde_json::from_str::<Value>(text) {
            Ok(chunk) => {
                let emitted = match chunk_content(&chunk) {
                    Some(content) if !content.is_empty() => {
                        self.buffer.push_str(content);
                        Some(self.buffer.clone())
                    }
                    _ => None,
                };
                if chunk.get("done").and_then(Value::as_bool).unwrap_or(false) {
                    self.state = StreamState::Done;
                }
                emitted
            }
            Err(_) => {
                self.buffer.push_str(text);
                Some(self.buffer.clone())
            }
        }
    }

    pub fn state(&self) -> StreamState {
        self.state
    }

    pub fn is_done(&self) -> bool {
        self.state == StreamState::Done
    }

    pub fn text(&self) -> &str {
        &self.buffer
    }

    pub fn into_text(self) -> String {
        self.buffer
    }
}

impl Default for StreamAccumulator {
    fn default() -> Self {
        Self::new()
    }
}

/// Reassembles lines from arbitrarily split byte chunks.
///
/// Splitting happens on raw bytes, so a multi-byte character cut across two
/// chunks is decoded intact once its line is complete.
#[derive(Debug, Default)]
pub struct LineSplitter {
    pending: Vec<u8>,
}

fn strip_cr(mut line: Vec<u8>) -> Vec<u8> {
    if line.last() == Some(&b'\r') {
        line.pop();
    }
    line
}

impl LineSplitter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Complete lines found after appending `chunk`, terminators removed.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<Vec<u8>> {
        self.pending.extend_from_slice(chunk);
        let mut lines = Vec::new();
        while let Some(pos) = self.pending.iter().position(|b| *b == b'\n') {
            let mut line: Vec<u8> = self.pending.drain(..=pos).collect();
            line.pop();
            lines.push(strip_cr(line));
        }
        lines
    }

    /// The unterminated tail, if any, at end of input.
    pub fn finish(&mut self) -> Option<Vec<u8>> {
        if self.pending.is_empty() {
            None
        } else {
            Some(strip_cr(std::mem::take(&mut self.pending)))
        }
    }
}

// ── ChatStream ────────────────────────────────────────────────────────────────

type ChunkSource = BoxStream<'static, Result<Vec<u8>, LlmError>>;

struct Pump {
    /// `None` once the source is exhausted, failed or no longer needed.
    chunks: Option<ChunkSource>,
    splitter: LineSplitter,
    accumulator: StreamAccumulator,
    ready: VecDeque<String>,
    /// Audited when the source is released.
    call: Option<PendingCall>,
}

impl Pump {
    fn feed(&mut self, line: &[u8]) {
        if let Some(text) = self.accumulator.feed_line(line) {
            self.ready.push_back(text);
        }
    }

    /// Drop the source now rather than when the consumer drops the stream.
    fn release(&mut self) {
        if self.chunks.take().is_some() {
            debug!(chars = self.accumulator.text().chars().count(), "Stream released");
            if let Some(call) = self.call.take() {
                call.finish(self.accumulator.text()).emit();
            }
        }
    }

    async fn next_item(&mut self) -> Option<Result<String, LlmError>> {
        loop {
            if let Some(text) = self.ready.pop_front() {
                return Some(Ok(text));
            }
            if self.accumulator.is_done() {
                self.release();
                return None;
            }
            let chunks = self.chunks.as_mut()?;
            match chunks.next().await {
                Some(Ok(bytes)) => {
                    for line in self.splitter.push(&bytes) {
                        self.feed(&line);
                    }
                }
                Some(Err(e)) => {
                    self.release();
                    return Some(Err(e));
                }
                None => {
                    if let Some(line) = self.splitter.finish() {
                        self.feed(&line);
                    }
                    self.release();
                    if self.ready.is_empty() {
                        return None;
                    }
                }
            }
        }
    }
}

impl Drop for Pump {
    fn drop(&mut self) {
        self.release();
    }
}

/// The growing answer of one streaming call.
///
/// Each item is the full text so far. The underlying response is released
/// exactly once: when the stream ends, fails, or is dropped early.
pub struct ChatStream {
    inner: BoxStream<'static, Result<String, LlmError>>,
}

impl ChatStream {
    /// Build from any source of newline-delimited JSON chunks.
    pub fn from_chunks<S>(chunks: S) -> Self
    where
        S: Stream<Item = Result<Vec<u8>, LlmError>> + Send + 'static,
    {
        Self::build(chunks, StreamAccumulator::new(), None)
    }

    fn build<S>(chunks: S, accumulator: StreamAccumulator, call: Option<PendingCall>) -> Self
    where
        S: Stream<Item = Result<Vec<u8>, LlmError>> + Send + 'static,
    {
        let pump = Pump {
            chunks: Some(chunks.boxed()),
            splitter: LineSplitter::new(),
            accumulator,
            ready: VecDeque::new(),
            call,
        };
        let inner = stream::unfold(pump, |mut pump| async move {
            let item = pump.next_item().await?;
            Some((item, pump))
        })
        .boxed();
        Self { inner }
    }

    /// Read `response` in the framing of `envelope`. `call` is audited once
    /// the response is released.
    pub fn from_response(response: reqwest::Response, envelope: Envelope, call: PendingCall) -> Self {
        let chunks = stream::unfold(Some(response), |state| async move {
            let mut response = state?;
            match response.chunk().await {
                Ok(Some(bytes)) => Some((Ok(bytes.to_vec()), Some(response))),
                Ok(None) => None,
                Err(e) => Some((Err(LlmError::Transport(e)), None)),
            }
        });
        Self::build(chunks, StreamAccumulator::for_envelope(envelope), Some(call))
    }

    /// Drain the stream and return the final answer.
    pub async fn collect_text(mut self) -> Result<String, LlmError> {
        let mut last = String::new();
        while let Some(item) = self.next().await {
            last = item?;
        }
        Ok(last)
    }
}

impl Stream for ChatStream {
    type Item = Result<String, LlmError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner.poll_next_unpin(cx)
    }
}

impl std::fmt::Debug for ChatStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatStream").finish_non_exhaustive()
    }
}
