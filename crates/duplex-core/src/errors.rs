//! Error taxonomy for the session bridge.
//!
//! Only [`BridgeError::MediaAcquisition`], [`BridgeError::Negotiation`],
//! [`BridgeError::SessionBusy`] and [`BridgeError::Superseded`] ever reach a
//! caller (from `start`). The rest describe conditions that are logged where
//! they happen and degrade the bridge instead of failing it.

use thiserror::Error;

/// Errors produced by the peer session, the relay, or the bridge between them.
#[derive(Debug, Error)]
pub enum BridgeError {
    /// The local audio capture source could not be obtained.
    #[error("media acquisition failed: {reason}")]
    MediaAcquisition {
        /// What went wrong.
        reason: String,
    },

    /// Credential fetch, offer/answer exchange, or answer application failed.
    #[error("negotiation failed: {reason}")]
    Negotiation {
        /// What went wrong.
        reason: String,
        /// HTTP status from the signaling endpoint, when there was one.
        status: Option<u16>,
    },

    /// The control channel is missing or not open.
    #[error("control channel unavailable: {reason}")]
    ChannelUnavailable {
        /// Why the channel could not be used.
        reason: String,
    },

    /// The relay connection is not connected.
    #[error("relay unavailable: {reason}")]
    RelayUnavailable {
        /// Why the relay could not be used.
        reason: String,
    },

    /// A relay connection attempt failed.
    #[error("relay connect failed: {reason}")]
    RelayConnect {
        /// What went wrong.
        reason: String,
    },

    /// `start` was called while a session was already negotiating or active.
    #[error("a peer session is already {state}")]
    SessionBusy {
        /// Current session state.
        state: String,
    },

    /// `stop` ran while this session was still negotiating.
    #[error("session {session_id} was stopped before negotiation completed")]
    Superseded {
        /// The discarded session.
        session_id: String,
    },

    /// Event (de)serialization failed.
    #[error("serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl BridgeError {
    /// Shorthand for a negotiation failure without an HTTP status.
    pub fn negotiation(reason: impl Into<String>) -> Self {
        Self::Negotiation {
            reason: reason.into(),
            status: None,
        }
    }

    /// Stable machine-readable code for logs and diagnostics.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::MediaAcquisition { .. } => "MEDIA_ACQUISITION",
            Self::Negotiation { .. } => "NEGOTIATION",
            Self::ChannelUnavailable { .. } => "CHANNEL_UNAVAILABLE",
            Self::RelayUnavailable { .. } => "RELAY_UNAVAILABLE",
            Self::RelayConnect { .. } => "RELAY_CONNECT",
            Self::SessionBusy { .. } => "SESSION_BUSY",
            Self::Superseded { .. } => "SUPERSEDED",
            Self::Serialization(_) => "SERIALIZATION",
        }
    }

    /// Whether this error ends the current `start` attempt.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::MediaAcquisition { .. }
                | Self::Negotiation { .. }
                | Self::SessionBusy { .. }
                | Self::Superseded { .. }
        )
    }

    /// Whether the relay's reconnect policy applies.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::RelayConnect { .. })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
