//! Agent Core error types.

use thiserror::Error;

use crate::inference::retry::ClassifiedFailure;

/// Errors that can occur during agent core operations.
#[derive(Debug, Error)]
pub enum AgentError {
    /// A credential required to open a session is absent or blank.
    #[error("missing credential: {which}")]
    MissingCredential { which: &'static str },

    /// The completion request failed after retries (or was not retryable).
    #[error(transparent)]
    RequestFailed(#[from] ClassifiedFailure),
}
