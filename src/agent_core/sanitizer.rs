//! History sanitizer for tool-use / tool-result pairing.
//!
//! The completion endpoint rejects a request outright when a tool result
//! points at a tool use it cannot find, or when a tool use has no id. This
//! filter removes the offending blocks from assistant messages before the
//! history is sent. It only drops blocks; surviving blocks are untouched.

use std::collections::HashSet;

use crate::inference::types::{ChatMessage, ContentBlock, MessageContent, Role};

/// Sanitized history plus how many blocks were removed.
#[derive(Debug, Clone, PartialEq)]
pub struct SanitizedHistory {
    pub messages: Vec<ChatMessage>,
    pub dropped_blocks_count: usize,
}

/// Filter one message's blocks, preserving order.
///
/// A `ToolUse` survives when its id is non-empty. A `ToolResult` survives
/// when its `tool_use_id` is non-empty and equals the id of some `ToolUse`
/// anywhere in the same message. Text always survives.
pub fn sanitize_blocks(blocks: &[ContentBlock]) -> (Vec<ContentBlock>, usize) {
    let tool_use_ids: HashSet<&str> = blocks
        .iter()
        .filter_map(|b| match b {
            ContentBlock::ToolUse { id, .. } if !id.is_empty() => Some(id.as_str()),
            _ => None,
        })
        .collect();

    let kept: Vec<ContentBlock> = blocks
        .iter()
        .filter(|b| match b {
            ContentBlock::Text { .. } => true,
            ContentBlock::ToolUse { id, .. } => !id.is_empty(),
            ContentBlock::ToolResult { tool_use_id, .. } => {
                !tool_use_id.is_empty() && tool_use_ids.contains(tool_use_id.as_str())
            }
        })
        .cloned()
        .collect();

    let dropped = blocks.len() - kept.len();
    (kept, dropped)
}

/// Sanitize a whole conversation.
///
/// Only assistant messages with block content are filtered; user messages
/// and plain-text assistant messages are passed through as-is.
pub fn sanitize_messages(messages: &[ChatMessage]) -> SanitizedHistory {
    let mut dropped_blocks_count = 0;

    let sanitized = messages
        .iter()
        .enumerate()
        .map(|(index, message)| match (&message.role, &message.content) {
            (Role::Assistant, MessageContent::Blocks(blocks)) => {
                let (kept, dropped) = sanitize_blocks(blocks);
                if dropped > 0 {
                    tracing::warn!(
                        message_index = index,
                        dropped,
                        "dropping unpaired tool blocks from assistant message"
                    );
                    dropped_blocks_count += dropped;
                }
                ChatMessage {
                    role: message.role,
                    content: MessageContent::Blocks(kept),
                    timestamp: message.timestamp,
                }
            }
            _ => message.clone(),
        })
        .collect();

    SanitizedHistory {
        messages: sanitized,
        dropped_blocks_count,
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn tool_use(id: &str) -> ContentBlock {
        ContentBlock::ToolUse {
            id: id.to_string(),
            name: "get_cart".to_string(),
            input: None,
        }
    }

    fn tool_result(id: &str) -> ContentBlock {
        ContentBlock::ToolResult {
            tool_use_id: id.to_string(),
            content: json!("ok"),
            is_error: false,
        }
    }

    #[test]
    fn test_drops_orphans_keeps_pair_and_text() {
        let blocks = vec![
            ContentBlock::text("Checking your cart"),
            tool_use("a"),
            tool_result("a"),
            tool_use(""),
            tool_result("missing"),
            ContentBlock::text("Done"),
        ];
        let (kept, dropped) = sanitize_blocks(&blocks);
        assert_eq!(dropped, 2);
        assert_eq!(
            kept,
            vec![
                ContentBlock::text("Checking your cart"),
                tool_use("a"),
                tool_result("a"),
                ContentBlock::text("Done"),
            ]
        );
    }

    #[test]
    fn test_result_before_use_still_matches() {
        let blocks = vec![tool_result("x"), tool_use("x")];
        let (kept, dropped) = sanitize_blocks(&blocks);
        assert_eq!(dropped, 0);
        assert_eq!(kept, blocks);
    }

    #[test]
    fn test_duplicate_ids_all_match() {
        let blocks = vec![tool_use("dup"), tool_result("dup"), tool_use("dup"), tool_result("dup")];
        let (kept, dropped) = sanitize_blocks(&blocks);
        assert_eq!(dropped, 0);
        assert_eq!(kept.len(), 4);
    }

    #[test]
    fn test_empty_result_id_dropped() {
        let (kept, dropped) = sanitize_blocks(&[tool_use(""), tool_result("")]);
        assert!(kept.is_empty());
        assert_eq!(dropped, 2);
    }

    #[test]
    fn test_user_and_text_messages_untouched() {
        let user = ChatMessage {
            role: Role::User,
            content: MessageContent::Blocks(vec![tool_result("orphan")]),
            timestamp: chrono::Utc::now(),
        };
        let assistant_text = ChatMessage {
            role: Role::Assistant,
            content: MessageContent::Text("plain".into()),
            timestamp: chrono::Utc::now(),
        };
        let history = sanitize_messages(&[user.clone(), assistant_text.clone()]);
        assert_eq!(history.dropped_blocks_count, 0);
        assert_eq!(history.messages, vec![user, assistant_text]);
    }

    #[test]
    fn test_counts_across_messages_and_is_idempotent() {
        let messages = vec![
            ChatMessage::user_text("add bananas"),
            ChatMessage::assistant_blocks(vec![tool_use("1"), tool_result("1"), tool_result("2")]),
            ChatMessage::assistant_blocks(vec![tool_use(""), ContentBlock::text("ok")]),
        ];
        let first = sanitize_messages(&messages);
        assert_eq!(first.dropped_blocks_count, 2);
        assert_eq!(first.messages.len(), 3);

        let second = sanitize_messages(&first.messages);
        assert_eq!(second.dropped_blocks_count, 0);
        assert_eq!(second.messages, first.messages);
    }
}
