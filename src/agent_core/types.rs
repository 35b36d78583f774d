//! Shared types across the agent core.

use serde::Serialize;

use super::errors::AgentError;
use super::tool_errors::ToolErrorCategory;
use crate::inference::types::{ContentBlock, Usage};

/// Outcome of one streaming session handed back to the UI layer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompletionResult {
    pub content: Vec<ContentBlock>,
    pub usage: Usage,
    /// Set when the session aborted on tool errors and the last content block
    /// is the synthetic explanation for this category.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aborted: Option<ToolErrorCategory>,
}

/// Credentials a session needs before it can be opened.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    /// Key for the completion endpoint.
    pub api_key: Option<String>,
    /// Bearer token forwarded to the MCP tool server.
    pub mcp_token: Option<String>,
}

impl Credentials {
    /// Both credentials as non-blank strings, or the name of the first one missing.
    pub fn require(&self) -> Result<(&str, &str), AgentError> {
        let api_key = non_blank(&self.api_key).ok_or(AgentError::MissingCredential {
            which: "api_key",
        })?;
        let mcp_token = non_blank(&self.mcp_token).ok_or(AgentError::MissingCredential {
            which: "mcp_token",
        })?;
        Ok((api_key, mcp_token))
    }
}

fn non_blank(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|s| !s.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_require_both_present() {
        let creds = Credentials {
            api_key: Some("sk".into()),
            mcp_token: Some("tok".into()),
        };
        assert_eq!(creds.require().unwrap(), ("sk", "tok"));
    }

    #[test]
    fn test_require_blank_token_is_missing() {
        let creds = Credentials {
            api_key: Some("sk".into()),
            mcp_token: Some("  ".into()),
        };
        let err = creds.require().unwrap_err();
        assert!(err.to_string().contains("mcp_token"));
    }

    #[test]
    fn test_aborted_omitted_when_none() {
        let result = CompletionResult {
            content: vec![],
            usage: Usage::default(),
            aborted: None,
        };
        let json = serde_json::to_string(&result).unwrap();
        assert!(!json.contains("aborted"));
    }
}
