//! SSE streaming response parser for the Messages API.
//!
//! Reads a `reqwest::Response` as a byte stream, splits on SSE boundaries
//! (`event: …\ndata: …\n\n`), parses each event as JSON, and accumulates
//! content-block deltas until each block is complete.

use futures::stream::{self, Stream, StreamExt};
use serde::Deserialize;
use tokio_util::sync::CancellationToken;

use super::errors::InferenceError;
use super::types::{ContentBlock, StreamEvent, Usage};

// ─── SSE line parser ─────────────────────────────────────────────────────────

/// Parse a raw SSE body into `StreamEvent`s.
///
/// This is the main entry point for streaming. It:
/// 1. Splits the HTTP body into SSE events
/// 2. Parses each `data:` payload as an `SseEvent`
/// 3. Accumulates text and tool-input deltas per content block index
/// 4. Emits a `StreamEvent` whenever a block, usage report, or stop completes
///
/// When `cancel` fires while waiting for more bytes, the stream yields
/// `InferenceError::Aborted` once and ends. Events already buffered are
/// delivered first, so a completion that raced the abort still wins.
pub fn parse_sse_stream(
    response: reqwest::Response,
    cancel: CancellationToken,
) -> impl Stream<Item = Result<StreamEvent, InferenceError>> + Send {
    parse_sse_bytes(response.bytes_stream(), cancel)
}

/// Parse any chunked byte stream as SSE.
///
/// Chunks are buffered as raw bytes and only complete events are decoded, so
/// a multi-byte character split across network chunks survives intact.
pub fn parse_sse_bytes<S, B, E>(
    chunks: S,
    cancel: CancellationToken,
) -> impl Stream<Item = Result<StreamEvent, InferenceError>> + Send
where
    S: Stream<Item = Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send,
    E: std::fmt::Display + Send,
{
    let byte_stream = Box::pin(chunks);
    let state = StreamState::new();

    stream::unfold(
        (byte_stream, state, Vec::<u8>::new(), cancel),
        |(mut byte_stream, mut state, mut buffer, cancel)| async move {
            loop {
                if state.finished {
                    return None;
                }

                // Check if we have a complete SSE event in the buffer
                if let Some(event_end) = find_event_end(&buffer) {
                    let event = String::from_utf8_lossy(&buffer[..event_end]).into_owned();
                    buffer.drain(..event_end + 2);

                    match state.process_event(&event) {
                        Ok(Some(ev)) => {
                            return Some((Ok(ev), (byte_stream, state, buffer, cancel)))
                        }
                        Ok(None) => continue, // ping, comment, or partial block
                        Err(e) => {
                            state.finished = true;
                            return Some((Err(e), (byte_stream, state, buffer, cancel)));
                        }
                    }
                }

                // Need more data from the stream
                let next = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => {
                        state.finished = true;
                        return Some((
                            Err(InferenceError::Aborted),
                            (byte_stream, state, buffer, cancel),
                        ));
                    }
                    next = byte_stream.next() => next,
                };

                match next {
                    Some(Ok(bytes)) => {
                        // CRLF framing: JSON payloads never carry a raw `\r`.
                        buffer.extend(bytes.as_ref().iter().filter(|b| **b != b'\r'));
                    }
                    Some(Err(e)) => {
                        state.finished = true;
                        return Some((
                            Err(InferenceError::StreamError {
                                reason: format!("stream read error: {e}"),
                            }),
                            (byte_stream, state, buffer, cancel),
                        ));
                    }
                    None => {
                        // Stream ended; flush a trailing event without a blank line
                        state.finished = true;
                        let tail = String::from_utf8_lossy(&std::mem::take(&mut buffer))
                            .trim()
                            .to_string();
                        if tail.is_empty() {
                            return None;
                        }
                        return match state.process_event(&tail) {
                            Ok(Some(ev)) => Some((Ok(ev), (byte_stream, state, buffer, cancel))),
                            Ok(None) => None,
                            Err(e) => Some((Err(e), (byte_stream, state, buffer, cancel))),
                        };
                    }
                }
            }
        },
    )
}

fn find_event_end(buffer: &[u8]) -> Option<usize> {
    buffer.windows(2).position(|w| w == b"\n\n")
}

// ─── Wire events ─────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum SseEvent {
    MessageStart {
        message: MessageStartBody,
    },
    ContentBlockStart {
        index: usize,
        content_block: serde_json::Value,
    },
    ContentBlockDelta {
        index: usize,
        delta: BlockDelta,
    },
    ContentBlockStop {
        index: usize,
    },
    MessageDelta {
        #[serde(default)]
        usage: Option<Usage>,
    },
    MessageStop,
    Error {
        error: ApiErrorBody,
    },
    #[serde(other)]
    Ignored,
}

#[derive(Debug, Deserialize)]
struct MessageStartBody {
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum BlockDelta {
    TextDelta {
        text: String,
    },
    InputJsonDelta {
        partial_json: String,
    },
    #[serde(other)]
    Ignored,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    #[serde(rename = "type")]
    error_type: String,
    #[serde(default)]
    message: String,
}

// ─── Stream State ────────────────────────────────────────────────────────────

/// A content block still receiving deltas.
enum PendingBlock {
    Text(String),
    ToolUse {
        id: String,
        name: String,
        input: Option<serde_json::Value>,
        json_buffer: String,
    },
    /// Tool results arrive whole in `content_block_start`.
    Complete(ContentBlock),
    /// Block types the core does not model (thinking, citations, …).
    Skipped,
}

/// Mutable state for accumulating content-block deltas across SSE events.
struct StreamState {
    pending: Vec<(usize, PendingBlock)>,
    finished: bool,
}

impl StreamState {
    fn new() -> Self {
        Self {
            pending: Vec::new(),
            finished: false,
        }
    }

    /// Process a single SSE event string (may contain multiple `data:` lines).
    fn process_event(&mut self, event: &str) -> Result<Option<StreamEvent>, InferenceError> {
        let mut data_content = String::new();

        for line in event.lines() {
            if let Some(data) = line.strip_prefix("data: ").or_else(|| line.strip_prefix("data:")) {
                data_content.push_str(data.trim());
            }
            // `event:` lines duplicate the JSON `type`; comments are keep-alives.
        }

        if data_content.is_empty() {
            return Ok(None);
        }

        let parsed: SseEvent =
            serde_json::from_str(&data_content).map_err(|e| InferenceError::StreamError {
                reason: format!("failed to parse SSE event: {e} (data: {data_content})"),
            })?;

        self.apply(parsed)
    }

    fn apply(&mut self, event: SseEvent) -> Result<Option<StreamEvent>, InferenceError> {
        match event {
            SseEvent::MessageStart { message } => Ok(message.usage.map(StreamEvent::Usage)),
            SseEvent::ContentBlockStart {
                index,
                content_block,
            } => {
                let block = start_block(&content_block);
                self.pending.retain(|(i, _)| *i != index);
                self.pending.push((index, block));
                Ok(None)
            }
            SseEvent::ContentBlockDelta { index, delta } => {
                if let Some((_, block)) = self.pending.iter_mut().find(|(i, _)| *i == index) {
                    match (block, delta) {
                        (PendingBlock::Text(text), BlockDelta::TextDelta { text: more }) => {
                            text.push_str(&more);
                        }
                        (
                            PendingBlock::ToolUse { json_buffer, .. },
                            BlockDelta::InputJsonDelta { partial_json },
                        ) => json_buffer.push_str(&partial_json),
                        _ => {}
                    }
                }
                Ok(None)
            }
            SseEvent::ContentBlockStop { index } => {
                let Some(pos) = self.pending.iter().position(|(i, _)| *i == index) else {
                    return Ok(None);
                };
                let (_, block) = self.pending.remove(pos);
                finish_block(block).map(|b| b.map(StreamEvent::BlockComplete))
            }
            SseEvent::MessageDelta { usage } => Ok(usage.map(StreamEvent::Usage)),
            SseEvent::MessageStop => {
                self.finished = true;
                Ok(Some(StreamEvent::MessageStop))
            }
            SseEvent::Error { error } => Err(InferenceError::ApiError {
                error_type: error.error_type,
                message: error.message,
            }),
            SseEvent::Ignored => Ok(None),
        }
    }
}

/// Build the pending state for a `content_block_start` payload.
fn start_block(raw: &serde_json::Value) -> PendingBlock {
    let kind = raw.get("type").and_then(|t| t.as_str()).unwrap_or_default();
    let str_field = |key: &str| {
        raw.get(key)
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string()
    };

    match kind {
        "text" => PendingBlock::Text(str_field("text")),
        "tool_use" | "mcp_tool_use" | "server_tool_use" => PendingBlock::ToolUse {
            id: str_field("id"),
            name: str_field("name"),
            // Start events carry `{}` and the real input arrives as deltas.
            input: raw
                .get("input")
                .filter(|v| v.as_object().is_some_and(|o| !o.is_empty()))
                .cloned(),
            json_buffer: String::new(),
        },
        "tool_result" | "mcp_tool_result" => PendingBlock::Complete(ContentBlock::ToolResult {
            tool_use_id: str_field("tool_use_id"),
            content: raw.get("content").cloned().unwrap_or(serde_json::Value::Null),
            is_error: raw.get("is_error").and_then(|v| v.as_bool()).unwrap_or(false),
        }),
        _ => PendingBlock::Skipped,
    }
}

/// Turn a finished pending block into a content block.
fn finish_block(block: PendingBlock) -> Result<Option<ContentBlock>, InferenceError> {
    match block {
        PendingBlock::Text(text) => Ok(Some(ContentBlock::Text { text })),
        PendingBlock::ToolUse {
            id,
            name,
            input,
            json_buffer,
        } => {
            let input = if json_buffer.trim().is_empty() {
                input
            } else {
                Some(serde_json::from_str(&json_buffer).map_err(|e| {
                    InferenceError::StreamError {
                        reason: format!("invalid tool input JSON for '{name}': {e}"),
                    }
                })?)
            };
            Ok(Some(ContentBlock::ToolUse { id, name, input }))
        }
        PendingBlock::Complete(block) => Ok(Some(block)),
        PendingBlock::Skipped => Ok(None),
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
