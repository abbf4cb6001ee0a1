//! Relay error types.

use duplex_core::BridgeError;
use thiserror::Error;

/// Failures while opening or running a relay connection.
#[derive(Debug, Error)]
pub enum RelayError {
    /// The underlying transport could not be opened or failed.
    #[error("relay transport failed: {reason}")]
    Transport {
        /// What went wrong.
        reason: String,
    },

    /// The server did not complete the Engine.IO/Socket.IO handshake.
    #[error("relay handshake failed: {reason}")]
    Handshake {
        /// What went wrong.
        reason: String,
    },

    /// The server answered the namespace connect with an error packet.
    #[error("relay rejected the connection: {reason}")]
    Rejected {
        /// Server-provided detail.
        reason: String,
    },

    /// Transport plus handshake took longer than the connect timeout.
    #[error("relay connection timed out after {timeout_ms}ms")]
    Timeout {
        /// Configured timeout.
        timeout_ms: u64,
    },

    /// The transport closed.
    #[error("relay transport closed")]
    Closed,

    /// A frame could not be decoded.
    #[error("malformed relay packet: {reason}")]
    Protocol {
        /// What was wrong with it.
        reason: String,
    },

    /// A packet payload was not valid JSON.
    #[error("invalid relay payload: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<RelayError> for BridgeError {
    fn from(err: RelayError) -> Self {
        Self::RelayConnect {
            reason: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn converts_to_retryable_bridge_error() {
        let err: BridgeError = RelayError::Timeout { timeout_ms: 20_000 }.into();
        assert!(err.is_retryable());
        assert!(err.to_string().contains("20000ms"));
    }
}
