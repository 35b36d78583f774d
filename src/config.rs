//! Configuration loader for `_config/cartstream.yaml`.
//!
//! Parses the YAML file into strongly-typed structs that drive the transport,
//! the stream session limits, retry behavior, and cart reconciliation.
//! Every section has defaults, so an empty file is a valid configuration.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::agent_core::abort_policy::SessionLimits;
use crate::agent_core::remote_clear::RemoteClearConfig;
use crate::cart::CartConfig;
use crate::inference::errors::InferenceError;
use crate::inference::retry::RetryPolicy;
use crate::inference::types::{ChatMessage, CompletionRequest, McpServerDescriptor};

// ─── Config Types ────────────────────────────────────────────────────────────

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AssistantConfig {
    pub transport: TransportConfig,
    /// Abort thresholds for inline tool errors.
    pub session_limits: SessionLimits,
    /// Request-level retry/backoff.
    pub retry: RetryPolicy,
    pub cart: CartConfig,
    pub remote_clear: RemoteClearConfig,
}

/// Settings for the streaming completion endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// API base URL, e.g. `"https://api.anthropic.com/v1"`.
    pub base_url: String,
    /// Model identifier sent with every request.
    pub model: String,
    /// Value for the `anthropic-version` header.
    pub api_version: String,
    /// Value for the `anthropic-beta` header enabling the MCP connector.
    pub mcp_beta: String,
    pub max_tokens: u32,
    pub connect_timeout_secs: u64,
    /// Total time budget for one streaming response.
    pub stream_timeout_secs: u64,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.anthropic.com/v1".into(),
            model: "claude-3-5-sonnet-latest".into(),
            api_version: "2023-06-01".into(),
            mcp_beta: "mcp-client-2025-04-04".into(),
            max_tokens: 4_096,
            connect_timeout_secs: 5,
            stream_timeout_secs: 180,
        }
    }
}

impl TransportConfig {
    /// Build a request with the configured model and token limit.
    pub fn completion_request(
        &self,
        messages: Vec<ChatMessage>,
        system: Option<String>,
        mcp_servers: Vec<McpServerDescriptor>,
    ) -> CompletionRequest {
        CompletionRequest {
            model: self.model.clone(),
            messages,
            system,
            mcp_servers,
            max_tokens: self.max_tokens,
        }
    }
}

// ─── Loading ─────────────────────────────────────────────────────────────────

/// Resolve the config path relative to the project root.
///
/// Checks `CARTSTREAM_CONFIG` first, then searches upward from `start` for
/// `_config/cartstream.yaml`.
pub fn find_config_path(start: &Path) -> Result<PathBuf, InferenceError> {
    if let Ok(explicit) = std::env::var("CARTSTREAM_CONFIG") {
        let candidate = PathBuf::from(expand_tilde(&explicit));
        if candidate.exists() {
            return Ok(candidate);
        }
    }

    let mut dir = start.to_path_buf();
    loop {
        let candidate = dir.join("_config/cartstream.yaml");
        if candidate.exists() {
            return Ok(candidate);
        }
        if !dir.pop() {
            break;
        }
    }

    Err(InferenceError::ConfigError {
        reason: "could not find _config/cartstream.yaml".into(),
    })
}

/// Load and parse the configuration file.
///
/// Performs environment-variable interpolation on `${VAR_NAME}` and
/// `${VAR_NAME:-default}` before parsing.
pub fn load_config(path: &Path) -> Result<AssistantConfig, InferenceError> {
    let raw = std::fs::read_to_string(path).map_err(|e| InferenceError::ConfigError {
        reason: format!("failed to read {}: {e}", path.display()),
    })?;

    parse_config(&raw)
}

/// Parse configuration text (after env interpolation).
pub fn parse_config(raw: &str) -> Result<AssistantConfig, InferenceError> {
    let interpolated = interpolate_env_vars(raw);
    if interpolated.trim().is_empty() {
        return Ok(AssistantConfig::default());
    }

    let config: AssistantConfig =
        serde_yaml::from_str(&interpolated).map_err(|e| InferenceError::ConfigError {
            reason: format!("failed to parse config: {e}"),
        })?;

    tracing::debug!(
        model = %config.transport.model,
        reconciling_verticals = ?config.cart.reconciling_verticals,
        "loaded cartstream config"
    );
    Ok(config)
}

// ─── Env-var interpolation ───────────────────────────────────────────────────

/// Replace `${VAR}` and `${VAR:-default}` in a string.
fn interpolate_env_vars(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && chars.peek() == Some(&'{') {
            chars.next(); // consume '{'
            let mut var_expr = String::new();
            for c in chars.by_ref() {
                if c == '}' {
                    break;
                }
                var_expr.push(c);
            }
            result.push_str(&resolve_var_expr(&var_expr));
        } else {
            result.push(ch);
        }
    }

    result
}

/// Resolve a variable expression like `VAR` or `VAR:-default`.
fn resolve_var_expr(expr: &str) -> String {
    if let Some(idx) = expr.find(":-") {
        let var_name = &expr[..idx];
        let default = &expr[idx + 2..];
        std::env::var(var_name).unwrap_or_else(|_| expand_tilde(default))
    } else {
        std::env::var(expr).unwrap_or_default()
    }
}

/// Expand a leading `~` to the user's home directory.
fn expand_tilde(path: &str) -> String {
    if let Some(rest) = path.strip_prefix('~') {
        if let Some(home) = dirs::home_dir() {
            return format!("{}{rest}", home.display());
        }
    }
    path.to_string()
}

// ─── Tests ───────────────────────────────────────────────────────────────────
