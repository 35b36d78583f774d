//! Inference: streaming completion transport and request-level policy.
//!
//! This module handles all communication with the completion endpoint:
//! - The `CompletionTransport` seam and its SSE implementation
//! - SSE stream parsing into ordered `StreamEvent`s
//! - Request-level failure classification and retry/backoff
//! - Shared conversation and content-block types
//!
//! Inline tool-call failures are not handled here; the stream session in
//! `agent_core` watches those as events arrive.

pub mod client;
pub mod errors;
pub mod retry;
pub mod streaming;
pub mod types;

// Re-exports for convenience
pub use client::{CompletionTransport, EventStream, SseTransport};
pub use errors::InferenceError;
pub use retry::{ClassifiedFailure, FailureKind, RequestFailure, RetryPolicy};
pub use types::{
    ChatMessage, CompletionRequest, ContentBlock, McpServerDescriptor, MessageContent, Role,
    StreamEvent, Usage,
};
