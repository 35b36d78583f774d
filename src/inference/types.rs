//! Shared types for the streaming completion layer.
//!
//! These mirror the Messages API content-block model, used both for
//! conversation history handed to the core and for events coming back
//! off the stream.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ─── Conversation Types ──────────────────────────────────────────────────────

/// Message role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// One unit of conversation content.
///
/// Invariants (enforced by the sanitizer, not the type): a `ToolUse` carries
/// a non-empty `id`, and every `ToolResult` references a `ToolUse` id from
/// the same message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        input: Option<serde_json::Value>,
    },
    ToolResult {
        tool_use_id: String,
        /// Opaque result payload: a string, an array of text items, or an object.
        #[serde(default)]
        content: serde_json::Value,
        #[serde(default)]
        is_error: bool,
    },
}

impl ContentBlock {
    /// Convenience constructor for a text block.
    pub fn text(text: impl Into<String>) -> Self {
        ContentBlock::Text { text: text.into() }
    }
}

/// Message body: plain text or an ordered list of content blocks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Blocks(Vec<ContentBlock>),
}

/// A single message in the conversation history.
///
/// Owned by the history layer; the core only reads these and returns new
/// vectors when it needs to transform them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: MessageContent,
    pub timestamp: DateTime<Utc>,
}

impl ChatMessage {
    /// A plain-text user message stamped with the current time.
    pub fn user_text(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: MessageContent::Text(text.into()),
            timestamp: Utc::now(),
        }
    }

    /// An assistant message made of content blocks.
    pub fn assistant_blocks(blocks: Vec<ContentBlock>) -> Self {
        Self {
            role: Role::Assistant,
            content: MessageContent::Blocks(blocks),
            timestamp: Utc::now(),
        }
    }

    /// The content blocks of this message, if it is block-structured.
    pub fn blocks(&self) -> Option<&[ContentBlock]> {
        match &self.content {
            MessageContent::Blocks(blocks) => Some(blocks),
            MessageContent::Text(_) => None,
        }
    }
}

// ─── Request Types ───────────────────────────────────────────────────────────

/// Connection descriptor for a remote MCP tool server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct McpServerDescriptor {
    /// Connector kind; the Messages API only accepts `"url"` today.
    pub r#type: String,
    pub name: String,
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authorization_token: Option<String>,
}

/// Parameters for one streaming completion call.
///
/// Opaque to the core: it is passed through to the transport verbatim.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub system: Option<String>,
    pub mcp_servers: Vec<McpServerDescriptor>,
    pub max_tokens: u32,
}

// ─── Response Types ──────────────────────────────────────────────────────────

/// Token accounting for one completion.
///
/// The cache fields are only present when the transport reports them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    #[serde(default)]
    pub input_tokens: u64,
    #[serde(default)]
    pub output_tokens: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_creation_input_tokens: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_read_input_tokens: Option<u64>,
}

impl Usage {
    /// Fold a later usage report into this one.
    ///
    /// Streams report input counts up front and cumulative output counts at
    /// the end, so non-zero / present fields from `later` win.
    pub fn merge(&mut self, later: &Usage) {
        if later.input_tokens > 0 {
            self.input_tokens = later.input_tokens;
        }
        if later.output_tokens > 0 {
            self.output_tokens = later.output_tokens;
        }
        if later.cache_creation_input_tokens.is_some() {
            self.cache_creation_input_tokens = later.cache_creation_input_tokens;
        }
        if later.cache_read_input_tokens.is_some() {
            self.cache_read_input_tokens = later.cache_read_input_tokens;
        }
    }
}

/// One event delivered by a streaming transport, in arrival order.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    /// A content block finished streaming (text, tool use, or inline tool result).
    BlockComplete(ContentBlock),
    /// A usage report; may arrive more than once.
    Usage(Usage),
    /// The message completed naturally.
    MessageStop,
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tool_use_input_omitted_when_none() {
        let block = ContentBlock::ToolUse {
            id: "toolu_1".to_string(),
            name: "get_cart".to_string(),
            input: None,
        };
        let json = serde_json::to_string(&block).unwrap();
        assert!(json.contains("\"type\":\"tool_use\""));
        assert!(!json.contains("input"), "input should be omitted when None");
    }

    #[test]
    fn test_tool_result_defaults_when_fields_missing() {
        let block: ContentBlock =
            serde_json::from_str(r#"{"type":"tool_result","tool_use_id":"toolu_1"}"#).unwrap();
        match block {
            ContentBlock::ToolResult {
                tool_use_id,
                content,
                is_error,
            } => {
                assert_eq!(tool_use_id, "toolu_1");
                assert!(content.is_null());
                assert!(!is_error);
            }
            other => panic!("expected tool_result, got {other:?}"),
        }
    }

    #[test]
    fn test_message_content_untagged() {
        let text: MessageContent = serde_json::from_str(r#""hello""#).unwrap();
        assert_eq!(text, MessageContent::Text("hello".to_string()));

        let blocks: MessageContent =
            serde_json::from_str(r#"[{"type":"text","text":"hi"}]"#).unwrap();
        assert_eq!(blocks, MessageContent::Blocks(vec![ContentBlock::text("hi")]));
    }

    #[test]
    fn test_usage_merge_keeps_input_and_takes_output() {
        let mut usage = Usage {
            input_tokens: 120,
            output_tokens: 1,
            cache_creation_input_tokens: None,
            cache_read_input_tokens: Some(40),
        };
        usage.merge(&Usage {
            input_tokens: 0,
            output_tokens: 88,
            cache_creation_input_tokens: None,
            cache_read_input_tokens: None,
        });
        assert_eq!(usage.input_tokens, 120);
        assert_eq!(usage.output_tokens, 88);
        assert_eq!(usage.cache_read_input_tokens, Some(40));
        assert!(usage.cache_creation_input_tokens.is_none());
    }
}
