//! Best-effort remote cart clear on vertical transitions.
//!
//! When the user moves between the two verticals that share one remote
//! store cart, the cart left behind is cleared by asking the model to run
//! the store's clear tool. Nothing here ever fails the caller: missing
//! credentials skip the clear, and any failure is logged and swallowed.

use serde::{Deserialize, Serialize};

use super::stream_session::StreamSession;
use super::types::Credentials;
use crate::inference::types::{ChatMessage, CompletionRequest};

/// Fixed instruction sent for the clear. No product discovery.
pub const CLEAR_CART_INSTRUCTION: &str =
    "Clear my cart completely. Do not search for, suggest, or add any products.";

/// Which vertical pair triggers a remote clear.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteClearConfig {
    /// Clearing happens on a switch between these two verticals, either direction.
    pub verticals: [String; 2],
}

impl Default for RemoteClearConfig {
    fn default() -> Self {
        Self {
            verticals: ["foodorder".into(), "dining".into()],
        }
    }
}

impl RemoteClearConfig {
    fn applies_to(&self, transition: &VerticalTransition<'_>) -> bool {
        let [a, b] = &self.verticals;
        let from = transition.from.trim();
        let to = transition.to.trim();
        (from.eq_ignore_ascii_case(a) && to.eq_ignore_ascii_case(b))
            || (from.eq_ignore_ascii_case(b) && to.eq_ignore_ascii_case(a))
    }
}

/// A switch from one vertical to another.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VerticalTransition<'a> {
    pub from: &'a str,
    pub to: &'a str,
}

/// What the clear attempt did. Informational only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClearOutcome {
    /// Transition not covered, or credentials missing.
    Skipped,
    Cleared,
    /// The attempt failed; the failure was logged.
    Failed,
}

/// Clear the remote cart if `transition` calls for it.
///
/// `template` supplies model, system prompt, and tool-server descriptors;
/// its messages are replaced by the single clear instruction and every
/// server gets the caller's MCP token.
///
/// The API key in `credentials` is only checked for presence. The request
/// is authenticated by the session's transport with its own configured key.
pub async fn clear_remote_cart(
    session: &StreamSession,
    config: &RemoteClearConfig,
    transition: VerticalTransition<'_>,
    credentials: &Credentials,
    template: &CompletionRequest,
) -> ClearOutcome {
    if !config.applies_to(&transition) {
        return ClearOutcome::Skipped;
    }

    let mcp_token = match credentials.require() {
        Ok((_api_key, token)) => token,
        Err(e) => {
            tracing::debug!(
                from = transition.from,
                to = transition.to,
                reason = %e,
                "skipping remote cart clear"
            );
            return ClearOutcome::Skipped;
        }
    };

    let mut request = template.clone();
    request.messages = vec![ChatMessage::user_text(CLEAR_CART_INSTRUCTION)];
    for server in &mut request.mcp_servers {
        server.authorization_token = Some(mcp_token.to_string());
    }

    match session.run(&request).await {
        Ok(result) => match result.aborted {
            None => {
                tracing::info!(
                    from = transition.from,
                    to = transition.to,
                    "remote cart cleared"
                );
                ClearOutcome::Cleared
            }
            Some(category) => {
                tracing::warn!(
                    from = transition.from,
                    to = transition.to,
                    %category,
                    "remote cart clear stopped on tool errors"
                );
                ClearOutcome::Failed
            }
        },
        Err(e) => {
            tracing::warn!(
                from = transition.from,
                to = transition.to,
                error = %e,
                "remote cart clear failed"
            );
            ClearOutcome::Failed
        }
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent_core::stream_session::tests::{
        completed_events, request, Script, ScriptedTransport,
    };
    use crate::inference::errors::InferenceError;
    use crate::inference::types::{McpServerDescriptor, MessageContent};
    use std::sync::atomic::Ordering;
    use std::sync::Arc;

    fn creds() -> Credentials {
        Credentials {
            api_key: Some("sk-test".into()),
            mcp_token: Some("mcp-token".into()),
        }
    }

    fn template() -> CompletionRequest {
        let mut req = request();
        req.mcp_servers.push(McpServerDescriptor {
            r#type: "url".into(),
            name: "store".into(),
            url: "https://mcp.example.com/mcp".into(),
            authorization_token: None,
        });
        req
    }

    const SWITCH: VerticalTransition<'static> = VerticalTransition {
        from: "foodorder",
        to: "dining",
    };

    #[tokio::test]
    async fn test_clears_on_configured_transition() {
        let transport = Arc::new(ScriptedTransport::new(
            vec![Script::Events(completed_events("Your cart is now empty."))],
            true,
        ));
        let session = StreamSession::new(transport.clone());
        let outcome = clear_remote_cart(
            &session,
            &RemoteClearConfig::default(),
            SWITCH,
            &creds(),
            &template(),
        )
        .await;
        assert_eq!(outcome, ClearOutcome::Cleared);

        let sent = transport.last_request.lock().unwrap().clone().unwrap();
        assert_eq!(sent.messages.len(), 1);
        assert_eq!(
            sent.messages[0].content,
            MessageContent::Text(CLEAR_CART_INSTRUCTION.into())
        );
        assert_eq!(
            sent.mcp_servers[0].authorization_token.as_deref(),
            Some("mcp-token")
        );
    }

    #[tokio::test]
    async fn test_reverse_direction_also_clears() {
        let transport = Arc::new(ScriptedTransport::new(
            vec![Script::Events(completed_events("Cleared."))],
            true,
        ));
        let session = StreamSession::new(transport);
        let reverse = VerticalTransition {
            from: "Dining",
            to: "foodorder",
        };
        let outcome = clear_remote_cart(
            &session,
            &RemoteClearConfig::default(),
            reverse,
            &creds(),
            &template(),
        )
        .await;
        assert_eq!(outcome, ClearOutcome::Cleared);
    }

    #[tokio::test]
    async fn test_other_transition_is_noop() {
        let transport = Arc::new(ScriptedTransport::new(vec![], true));
        let session = StreamSession::new(transport.clone());
        let other = VerticalTransition {
            from: "nutrition",
            to: "style",
        };
        let outcome = clear_remote_cart(
            &session,
            &RemoteClearConfig::default(),
            other,
            &creds(),
            &template(),
        )
        .await;
        assert_eq!(outcome, ClearOutcome::Skipped);
        assert_eq!(transport.opened.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_missing_credentials_is_noop() {
        let transport = Arc::new(ScriptedTransport::new(vec![], true));
        let session = StreamSession::new(transport.clone());
        let no_token = Credentials {
            api_key: Some("sk".into()),
            mcp_token: None,
        };
        let outcome = clear_remote_cart(
            &session,
            &RemoteClearConfig::default(),
            SWITCH,
            &no_token,
            &template(),
        )
        .await;
        assert_eq!(outcome, ClearOutcome::Skipped);
        assert_eq!(transport.opened.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_api_key_gates_the_clear_but_is_not_sent() {
        let transport = Arc::new(ScriptedTransport::new(
            vec![Script::Events(completed_events("Cleared."))],
            true,
        ));
        let session = StreamSession::new(transport.clone());
        let no_key = Credentials {
            api_key: Some("   ".into()),
            ..creds()
        };
        let skipped = clear_remote_cart(
            &session,
            &RemoteClearConfig::default(),
            SWITCH,
            &no_key,
            &template(),
        )
        .await;
        assert_eq!(skipped, ClearOutcome::Skipped);
        assert_eq!(transport.opened.load(Ordering::SeqCst), 0);

        let outcome = clear_remote_cart(
            &session,
            &RemoteClearConfig::default(),
            SWITCH,
            &creds(),
            &template(),
        )
        .await;
        assert_eq!(outcome, ClearOutcome::Cleared);
        let sent = transport.last_request.lock().unwrap().clone().unwrap();
        assert!(!format!("{sent:?}").contains("sk-test"));
    }

    #[tokio::test]
    async fn test_failure_is_swallowed() {
        let transport = Arc::new(ScriptedTransport::new(
            vec![Script::OpenFails(InferenceError::ConnectionFailed {
                endpoint: "http://localhost".into(),
                reason: "refused".into(),
            })],
            true,
        ));
        let session = StreamSession::new(transport);
        let outcome = clear_remote_cart(
            &session,
            &RemoteClearConfig::default(),
            SWITCH,
            &creds(),
            &template(),
        )
        .await;
        assert_eq!(outcome, ClearOutcome::Failed);
    }
}
