//! Settings types.
//!
//! Every struct deserializes with `#[serde(default)]`, so a settings file only
//! needs the keys it changes. JSON keys are camelCase.

use duplex_core::retry::ReconnectConfig;
use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// Root settings object.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DuplexSettings {
    /// Settings schema version.
    pub version: String,
    /// Backend relay connection.
    pub relay: RelaySettings,
    /// Peer session.
    pub peer: PeerSettings,
    /// Credential and negotiation endpoints.
    pub signaling: SignalingSettings,
    /// Log output.
    pub logging: LoggingSettings,
}

impl Default for DuplexSettings {
    fn default() -> Self {
        Self {
            version: "1".into(),
            relay: RelaySettings::default(),
            peer: PeerSettings::default(),
            signaling: SignalingSettings::default(),
            logging: LoggingSettings::default(),
        }
    }
}

/// Backend relay connection settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RelaySettings {
    /// Relay server address (`http(s)://` or `ws(s)://`).
    pub url: String,
    /// Bounded fixed-delay reconnect policy.
    pub reconnect: ReconnectConfig,
    /// Time allowed for the transport plus handshake, in ms.
    pub connect_timeout_ms: u64,
    /// Capacity of the outbound frame queue handed to the socket task.
    pub outbound_buffer: usize,
}

impl Default for RelaySettings {
    fn default() -> Self {
        Self {
            url: "http://127.0.0.1:5000".into(),
            reconnect: ReconnectConfig::default(),
            connect_timeout_ms: 20_000,
            outbound_buffer: 256,
        }
    }
}

/// Peer session settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PeerSettings {
    /// Label of the control data channel.
    pub control_channel_label: String,
    /// STUN/TURN URLs; empty means host candidates only.
    pub ice_servers: Vec<String>,
}

impl Default for PeerSettings {
    fn default() -> Self {
        Self {
            control_channel_label: "oai-events".into(),
            ice_servers: Vec::new(),
        }
    }
}

/// Credential and negotiation endpoint settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SignalingSettings {
    /// Endpoint returning `{ "client_secret": { "value": ... } }`.
    pub credential_url: String,
    /// Negotiation endpoint; the model is appended as a query parameter.
    pub base_url: String,
    /// Realtime model identifier.
    pub model: String,
    /// Per-request timeout in ms.
    pub request_timeout_ms: u64,
}

impl Default for SignalingSettings {
    fn default() -> Self {
        Self {
            credential_url: "http://localhost:3000/token".into(),
            base_url: "https://api.openai.com/v1/realtime".into(),
            model: "gpt-4o-realtime-preview-2024-12-17".into(),
            request_timeout_ms: 10_000,
        }
    }
}

/// Log output settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Default filter directive when `RUST_LOG` is unset.
    pub level: String,
    /// Emit JSON lines instead of compact text.
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".into(),
            json: false,
        }
    }
}

impl DuplexSettings {
    /// Reject values no component can work with.
    pub fn validate(&self) -> Result<()> {
        require_scheme("relay.url", &self.relay.url, &["http://", "https://", "ws://", "wss://"])?;
        require_scheme(
            "signaling.credentialUrl",
            &self.signaling.credential_url,
            &["http://", "https://"],
        )?;
        require_scheme("signaling.baseUrl", &self.signaling.base_url, &["http://", "https://"])?;
        if self.relay.reconnect.delay_ms == 0 {
            return Err(invalid("relay.reconnect.delayMs", "must be at least 1"));
        }
        if self.relay.outbound_buffer == 0 {
            return Err(invalid("relay.outboundBuffer", "must be at least 1"));
        }
        if self.signaling.model.trim().is_empty() {
            return Err(invalid("signaling.model", "must not be empty"));
        }
        if self.peer.control_channel_label.is_empty() {
            return Err(invalid("peer.controlChannelLabel", "must not be empty"));
        }
        Ok(())
    }
}

fn require_scheme(key: &str, value: &str, schemes: &[&str]) -> Result<()> {
    if schemes.iter().any(|s| value.starts_with(s)) {
        Ok(())
    } else {
        Err(invalid(key, &format!("expected one of {}", schemes.join(", "))))
    }
}

fn invalid(key: &str, reason: &str) -> SettingsError {
    SettingsError::InvalidValue {
        key: key.to_owned(),
        reason: reason.to_owned(),
    }
}
