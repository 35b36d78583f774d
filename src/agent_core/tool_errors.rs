//! Classification of failed MCP tool-call results.
//!
//! Tool servers report failures as free text inside the tool result, so the
//! category is recovered by keyword matching. The category picks both the
//! abort threshold in the stream session and the message shown to the user.

use std::fmt;

use serde::{Deserialize, Serialize};

// ─── Keyword tables ──────────────────────────────────────────────────────────

const ADDRESS_KEYWORDS: [&str; 4] = [
    "address with id",
    "address not found",
    "invalid address",
    "delivery address",
];

const AUTH_KEYWORDS: [&str; 8] = [
    "401",
    "403",
    "forbidden",
    "unauthorized",
    "expired",
    "access denied",
    "invalid token",
    "not authenticated",
];

const SERVER_KEYWORDS: [&str; 12] = [
    "500",
    "501",
    "502",
    "503",
    "504",
    "529",
    "overload",
    "overloaded_error",
    "internal server error",
    "service unavailable",
    "timeout",
    "gateway",
];

// ─── Category ────────────────────────────────────────────────────────────────

/// Category of a failed tool call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolErrorCategory {
    Auth,
    Server,
    Validation,
    Address,
}

impl ToolErrorCategory {
    /// Fixed user-facing message for this category.
    ///
    /// Appended verbatim as the synthetic text block when a session aborts.
    pub fn user_message(self) -> &'static str {
        match self {
            ToolErrorCategory::Auth => {
                "Your store session has expired. Please reconnect your account and try again."
            }
            ToolErrorCategory::Server => {
                "The store's service is temporarily unavailable. Please try again in a few minutes."
            }
            ToolErrorCategory::Validation => {
                "I stopped retrying because that request kept failing. Please try a different request."
            }
            ToolErrorCategory::Address => {
                "Your saved delivery location looks invalid. Please choose or re-add a delivery address and try again."
            }
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ToolErrorCategory::Auth => "auth",
            ToolErrorCategory::Server => "server",
            ToolErrorCategory::Validation => "validation",
            ToolErrorCategory::Address => "address",
        }
    }
}

impl fmt::Display for ToolErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ─── Classification ──────────────────────────────────────────────────────────

/// Classify the raw content of a failed tool result.
///
/// Priority is address, then auth, then server; anything else (including
/// content with no extractable text) is `Validation`.
pub fn classify_tool_error(content: &serde_json::Value) -> ToolErrorCategory {
    let text = extract_tool_result_text(content).to_lowercase();
    let matches_any = |keywords: &[&str]| keywords.iter().any(|k| text.contains(k));

    if matches_any(&ADDRESS_KEYWORDS) {
        ToolErrorCategory::Address
    } else if matches_any(&AUTH_KEYWORDS) {
        ToolErrorCategory::Auth
    } else if matches_any(&SERVER_KEYWORDS) {
        ToolErrorCategory::Server
    } else {
        ToolErrorCategory::Validation
    }
}

/// Flatten a tool-result payload to text.
///
/// Strings pass through; arrays join each item's text (`{"text": …}` items
/// contribute their text, bare strings themselves, other values their JSON);
/// objects are stringified. Null, booleans, and numbers yield empty text.
pub fn extract_tool_result_text(content: &serde_json::Value) -> String {
    match content {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Array(items) => items
            .iter()
            .map(|item| match item {
                serde_json::Value::String(s) => s.clone(),
                serde_json::Value::Object(map) => match map.get("text") {
                    Some(serde_json::Value::String(t)) => t.clone(),
                    _ => item.to_string(),
                },
                other => other.to_string(),
            })
            .collect::<Vec<_>>()
            .join("\n"),
        serde_json::Value::Object(_) => content.to_string(),
        _ => String::new(),
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
