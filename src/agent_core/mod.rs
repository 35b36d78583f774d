//! Agent Core: session control and history hygiene for the assistant.
//!
//! Submodules:
//! - `tool_errors`: Keyword classification of failed MCP tool results
//! - `abort_policy`: Pure fold from tool outcomes to an abort decision
//! - `stream_session`: Drives one streaming call, aborts on tool-error limits
//! - `sanitizer`: Removes unpaired tool blocks from conversation history
//! - `remote_clear`: Best-effort remote cart clear on vertical switches
//! - `types`: Shared types across the agent core
//! - `errors`: Agent-level error types

pub mod abort_policy;
pub mod errors;
pub mod remote_clear;
pub mod sanitizer;
pub mod stream_session;
pub mod tool_errors;
pub mod types;

// Re-exports for convenience
pub use abort_policy::{decide_abort, AbortDecision, SessionLimits, ToolOutcome};
pub use errors::AgentError;
pub use remote_clear::{clear_remote_cart, ClearOutcome, RemoteClearConfig, VerticalTransition};
pub use sanitizer::{sanitize_blocks, sanitize_messages, SanitizedHistory};
pub use stream_session::{SessionCallbacks, StreamSession, TracingUsageSink, UsageSink};
pub use tool_errors::{classify_tool_error, ToolErrorCategory};
pub use types::{CompletionResult, Credentials};
