//! Stream session controller.
//!
//! Drives exactly one streaming completion call. Inline MCP tool results are
//! classified as they arrive; once the error tally crosses a limit the
//! session asks the transport to abort and, instead of failing, returns the
//! partial message with a fixed explanation appended. Failures the session
//! did not cause itself are returned unchanged.

use std::sync::Arc;

use futures::StreamExt;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::abort_policy::{ErrorTally, SessionLimits, ToolOutcome};
use super::errors::AgentError;
use super::tool_errors::{classify_tool_error, ToolErrorCategory};
use super::types::CompletionResult;
use crate::inference::client::CompletionTransport;
use crate::inference::errors::InferenceError;
use crate::inference::retry::{retry_with_backoff, RetryPolicy};
use crate::inference::types::{CompletionRequest, ContentBlock, StreamEvent, Usage};

// ─── Callbacks & observability ───────────────────────────────────────────────

/// Fire-and-forget notification hook.
pub type ErrorCallback = Box<dyn Fn() + Send + Sync>;

/// Optional hooks fired synchronously for every matching tool error,
/// whether or not the error trips a limit.
#[derive(Default)]
pub struct SessionCallbacks {
    pub on_auth_error: Option<ErrorCallback>,
    pub on_address_error: Option<ErrorCallback>,
}

/// Usage report emitted after every completion, natural or synthesized.
#[derive(Debug, Clone, Copy)]
pub struct UsageRecord<'a> {
    pub session_id: Uuid,
    pub model: &'a str,
    pub usage: &'a Usage,
    pub aborted: Option<ToolErrorCategory>,
}

/// Destination for usage accounting.
pub trait UsageSink: Send + Sync {
    fn record(&self, record: &UsageRecord<'_>);
}

/// Writes usage as a structured `tracing` event.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingUsageSink;

impl UsageSink for TracingUsageSink {
    fn record(&self, record: &UsageRecord<'_>) {
        tracing::info!(
            session_id = %record.session_id,
            model = %record.model,
            input_tokens = record.usage.input_tokens,
            output_tokens = record.usage.output_tokens,
            cache_creation_input_tokens = ?record.usage.cache_creation_input_tokens,
            cache_read_input_tokens = ?record.usage.cache_read_input_tokens,
            aborted = ?record.aborted,
            "completion usage"
        );
    }
}

// ─── StreamSession ───────────────────────────────────────────────────────────

/// Runs streaming completions with inline tool-error monitoring.
///
/// Holds no per-call state: every `run` owns its own counters and
/// cancellation token.
pub struct StreamSession {
    transport: Arc<dyn CompletionTransport>,
    limits: SessionLimits,
    callbacks: SessionCallbacks,
    usage_sink: Arc<dyn UsageSink>,
}

impl StreamSession {
    pub fn new(transport: Arc<dyn CompletionTransport>) -> Self {
        Self {
            transport,
            limits: SessionLimits::default(),
            callbacks: SessionCallbacks::default(),
            usage_sink: Arc::new(TracingUsageSink),
        }
    }

    pub fn with_limits(mut self, limits: SessionLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn with_callbacks(mut self, callbacks: SessionCallbacks) -> Self {
        self.callbacks = callbacks;
        self
    }

    pub fn with_usage_sink(mut self, sink: Arc<dyn UsageSink>) -> Self {
        self.usage_sink = sink;
        self
    }

    /// Stream one completion to the end.
    ///
    /// Returns `Ok` for natural completions and for self-triggered aborts
    /// (with `aborted` set and the explanation appended). Returns `Err` only
    /// for failures the session did not request.
    pub async fn run(
        &self,
        request: &CompletionRequest,
    ) -> Result<CompletionResult, InferenceError> {
        let session_id = Uuid::new_v4();
        let cancel = CancellationToken::new();
        let mut events = self.transport.open_stream(request, cancel.clone()).await?;

        let mut content = Vec::new();
        let mut usage = Usage::default();
        let mut tally = ErrorTally::default();
        let mut completed = false;
        let mut failure = None;

        while let Some(event) = events.next().await {
            match event {
                Ok(StreamEvent::BlockComplete(block)) => {
                    if let Some(outcome) = self.observe(&block) {
                        let already_aborting = tally.abort_category().is_some();
                        tally = tally.step(outcome, &self.limits);
                        let newly_aborting = tally.abort_category().filter(|_| !already_aborting);
                        if let Some(category) = newly_aborting {
                            tracing::warn!(
                                %session_id,
                                %category,
                                tool_errors = tally.tool_errors,
                                auth_errors = tally.auth_errors,
                                "tool error limit reached, aborting stream"
                            );
                            cancel.cancel();
                        }
                    }
                    content.push(block);
                }
                Ok(StreamEvent::Usage(reported)) => usage.merge(&reported),
                Ok(StreamEvent::MessageStop) => {
                    completed = true;
                    break;
                }
                Err(e) => {
                    failure = Some(e);
                    break;
                }
            }
        }
        drop(events);

        let abort = tally.abort_category();

        if completed {
            if let Some(category) = abort {
                tracing::info!(
                    %session_id,
                    %category,
                    "stream completed before the abort took effect, keeping the natural result"
                );
            }
            return Ok(self.finish(session_id, request, content, usage, None));
        }

        match (abort, failure) {
            (Some(category), failure) => {
                match failure {
                    Some(err) if err.is_aborted() => {
                        tracing::debug!(%session_id, "stream closed after requested abort");
                    }
                    Some(err) => {
                        tracing::info!(
                            %session_id,
                            error = %err,
                            "stream failed after requested abort, reporting the abort"
                        );
                    }
                    None => {}
                }
                content.push(ContentBlock::text(category.user_message()));
                Ok(self.finish(session_id, request, content, usage, Some(category)))
            }
            (None, Some(err)) => {
                tracing::warn!(%session_id, error = %err, "stream failed");
                Err(err)
            }
            (None, None) => Err(InferenceError::StreamError {
                reason: "stream ended before message_stop".into(),
            }),
        }
    }

    /// [`run`](Self::run) with request-level retries for transient failures.
    pub async fn run_with_retry(
        &self,
        request: &CompletionRequest,
        policy: &RetryPolicy,
    ) -> Result<CompletionResult, AgentError> {
        let result = retry_with_backoff(policy, move |_attempt| self.run(request)).await?;
        Ok(result)
    }

    /// Classify a completed block; `None` for blocks that are not tool results.
    fn observe(&self, block: &ContentBlock) -> Option<ToolOutcome> {
        match block {
            ContentBlock::ToolResult {
                is_error: false, ..
            } => Some(ToolOutcome::Succeeded),
            ContentBlock::ToolResult {
                tool_use_id,
                content,
                is_error: true,
            } => {
                let category = classify_tool_error(content);
                tracing::debug!(%tool_use_id, %category, "inline tool error");
                let callback = match category {
                    ToolErrorCategory::Auth => self.callbacks.on_auth_error.as_ref(),
                    ToolErrorCategory::Address => self.callbacks.on_address_error.as_ref(),
                    ToolErrorCategory::Server | ToolErrorCategory::Validation => None,
                };
                if let Some(callback) = callback {
                    callback();
                }
                Some(ToolOutcome::Failed(category))
            }
            ContentBlock::Text { .. } | ContentBlock::ToolUse { .. } => None,
        }
    }

    fn finish(
        &self,
        session_id: Uuid,
        request: &CompletionRequest,
        content: Vec<ContentBlock>,
        usage: Usage,
        aborted: Option<ToolErrorCategory>,
    ) -> CompletionResult {
        self.usage_sink.record(&UsageRecord {
            session_id,
            model: &request.model,
            usage: &usage,
            aborted,
        });
        CompletionResult {
            content,
            usage,
            aborted,
        }
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
