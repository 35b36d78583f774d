//! Streaming completion transport.
//!
//! `CompletionTransport` is the seam the session controller talks to: open
//! one streaming call, get back an ordered stream of `StreamEvent`s, and
//! honor a cooperative cancellation token. `SseTransport` is the production
//! implementation over the Messages API with the MCP connector enabled.

use std::time::Duration;

use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use reqwest::Client as HttpClient;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use super::errors::InferenceError;
use super::streaming::parse_sse_stream;
use super::types::{CompletionRequest, McpServerDescriptor, MessageContent, Role, StreamEvent};
use crate::config::TransportConfig;

/// Ordered events from one streaming call.
pub type EventStream = BoxStream<'static, Result<StreamEvent, InferenceError>>;

// ─── Transport seam ──────────────────────────────────────────────────────────

/// Opens streaming completion calls.
///
/// Implementations must deliver events in arrival order and react to
/// `cancel` by either ending the stream with `InferenceError::Aborted` or
/// finishing normally if the message was already complete.
#[async_trait]
pub trait CompletionTransport: Send + Sync {
    async fn open_stream(
        &self,
        request: &CompletionRequest,
        cancel: CancellationToken,
    ) -> Result<EventStream, InferenceError>;
}

// ─── Wire body ───────────────────────────────────────────────────────────────

/// Request body for `POST {base_url}/messages`.
#[derive(Debug, Serialize)]
struct MessagesRequestBody<'a> {
    model: &'a str,
    max_tokens: u32,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<&'a str>,
    messages: Vec<WireMessage<'a>>,
    #[serde(skip_serializing_if = "no_servers")]
    mcp_servers: &'a [McpServerDescriptor],
}

fn no_servers(servers: &&[McpServerDescriptor]) -> bool {
    servers.is_empty()
}

/// History messages without the local timestamp.
#[derive(Debug, Serialize)]
struct WireMessage<'a> {
    role: Role,
    content: &'a MessageContent,
}

impl<'a> MessagesRequestBody<'a> {
    fn from_request(request: &'a CompletionRequest) -> Self {
        Self {
            model: &request.model,
            max_tokens: request.max_tokens,
            stream: true,
            system: request.system.as_deref(),
            messages: request
                .messages
                .iter()
                .map(|m| WireMessage {
                    role: m.role,
                    content: &m.content,
                })
                .collect(),
            mcp_servers: &request.mcp_servers,
        }
    }
}

// ─── SseTransport ────────────────────────────────────────────────────────────

/// HTTP + SSE transport for the Messages API.
pub struct SseTransport {
    http: HttpClient,
    base_url: String,
    api_key: String,
    api_version: String,
    mcp_beta: String,
    stream_timeout_secs: u64,
}

impl SseTransport {
    /// Build a transport from config. Does NOT check connectivity.
    pub fn new(
        config: &TransportConfig,
        api_key: impl Into<String>,
    ) -> Result<Self, InferenceError> {
        let http = HttpClient::builder()
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .timeout(Duration::from_secs(config.stream_timeout_secs))
            .build()
            .map_err(|e| InferenceError::ConnectionFailed {
                endpoint: config.base_url.clone(),
                reason: format!("failed to build streaming HTTP client: {e}"),
            })?;

        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            api_version: config.api_version.clone(),
            mcp_beta: config.mcp_beta.clone(),
            stream_timeout_secs: config.stream_timeout_secs,
        })
    }
}

#[async_trait]
impl CompletionTransport for SseTransport {
    async fn open_stream(
        &self,
        request: &CompletionRequest,
        cancel: CancellationToken,
    ) -> Result<EventStream, InferenceError> {
        let url = format!("{}/messages", self.base_url);
        let body = MessagesRequestBody::from_request(request);

        // Log the request metadata (not the full body)
        tracing::info!(
            url = %url,
            model = %body.model,
            message_count = body.messages.len(),
            mcp_server_count = body.mcp_servers.len(),
            max_tokens = body.max_tokens,
            "=== LLM REQUEST ==="
        );

        let send = self
            .http
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", &self.api_version)
            .header("anthropic-beta", &self.mcp_beta)
            .header("Accept", "text/event-stream")
            .json(&body)
            .send();

        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(InferenceError::Aborted),
            result = send => result.map_err(|e| {
                if e.is_timeout() {
                    InferenceError::Timeout {
                        duration_secs: self.stream_timeout_secs,
                    }
                } else {
                    InferenceError::ConnectionFailed {
                        endpoint: url.clone(),
                        reason: e.to_string(),
                    }
                }
            })?,
        };

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            return Err(InferenceError::HttpError {
                status: status.as_u16(),
                body: body_text,
            });
        }

        Ok(parse_sse_stream(response, cancel).boxed())
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
