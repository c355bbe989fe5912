//! Error types for gateway sessions.

use ibkr_bridge_core::IdError;
use thiserror::Error;

/// Failures on the outbound side of a session (connecting, submitting).
///
/// Inbound problems never surface here: the callback path degrades to
/// [`WaitOutcome`](ibkr_bridge_core::WaitOutcome) variants instead.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// Could not establish the connection.
    #[error("connection error: {0}")]
    Connect(String),

    /// The gateway never announced a valid id after connecting.
    #[error("gateway handshake timed out after {timeout_secs}s")]
    HandshakeTimeout {
        /// Seconds waited.
        timeout_secs: u64,
    },

    /// The session is not connected.
    #[error("not connected to gateway")]
    NotConnected,

    /// No request id could be allocated for the request.
    #[error("request id allocation failed: {0}")]
    RequestId(#[from] IdError),

    /// The request could not be handed to the gateway.
    #[error("failed to submit {kind} request: {reason}")]
    Submit {
        /// Request kind (e.g. "contract_details").
        kind: &'static str,
        /// Why submission failed.
        reason: String,
    },
}

impl GatewayError {
    /// Creates a submit error.
    pub fn submit(kind: &'static str, reason: impl Into<String>) -> Self {
        Self::Submit {
            kind,
            reason: reason.into(),
        }
    }

    /// Returns true if reconnecting and retrying may succeed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Connect(_) | Self::HandshakeTimeout { .. } | Self::NotConnected
        )
    }
}
