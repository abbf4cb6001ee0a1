//! Engine.IO v4 / Socket.IO v5 text packet codec.
//!
//! Only the text subset used by the relay is supported: the Engine.IO
//! open/close/ping/pong/noop frames and the Socket.IO connect, disconnect,
//! event and connect-error packets on the default namespace. Binary packets
//! are rejected; acks and upgrade probes decode to [`Packet::Noop`].

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::error::RelayError;

/// Engine.IO open packet payload.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenPayload {
    /// Engine.IO session id.
    pub sid: String,
    /// Transport upgrades offered by the server.
    #[serde(default)]
    pub upgrades: Vec<String>,
    /// Server ping interval in ms.
    pub ping_interval: u64,
    /// Grace period after a missed ping in ms.
    pub ping_timeout: u64,
    /// Largest accepted frame in bytes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_payload: Option<u64>,
}

impl OpenPayload {
    /// How long the connection may go without a server ping before it is
    /// considered dead.
    #[must_use]
    pub fn liveness_window(&self) -> Duration {
        Duration::from_millis(self.ping_interval.saturating_add(self.ping_timeout))
    }
}

/// A decoded relay frame.
#[derive(Clone, Debug, PartialEq)]
pub enum Packet {
    /// `0{...}` handshake.
    Open(OpenPayload),
    /// `1` transport close.
    Close,
    /// `2` server heartbeat.
    Ping,
    /// `3` heartbeat reply.
    Pong,
    /// `6`, and anything we deliberately ignore.
    Noop,
    /// `40` / `40{"sid":...}` namespace connect (request or ack).
    Connect(Option<Value>),
    /// `41` namespace disconnect.
    Disconnect,
    /// `42["name",data]` event.
    Event {
        /// Event name.
        name: String,
        /// First argument; `null` if none, an array if several.
        data: Value,
    },
    /// `44{...}` namespace connect refused.
    ConnectError(Value),
}

impl Packet {
    /// Build an event packet.
    pub fn event(name: impl Into<String>, data: Value) -> Self {
        Self::Event {
            name: name.into(),
            data,
        }
    }

    /// Encode as a text frame.
    #[must_use]
    pub fn encode(&self) -> String {
        match self {
            Self::Open(open) => format!("0{}", json!(open)),
            Self::Close => "1".into(),
            Self::Ping => "2".into(),
            Self::Pong => "3".into(),
            Self::Noop => "6".into(),
            Self::Connect(None) => "40".into(),
            Self::Connect(Some(data)) => format!("40{data}"),
            Self::Disconnect => "41".into(),
            Self::Event { name, data } => format!("42{}", json!([name, data])),
            Self::ConnectError(data) => format!("44{data}"),
        }
    }

    /// Decode a text frame.
    pub fn decode(frame: &str) -> Result<Self, RelayError> {
        let Some(&kind) = frame.as_bytes().first() else {
            return Err(protocol("empty frame"));
        };
        // `kind` is ASCII whenever it matches below, so slicing at 1 is safe.
        match kind {
            b'0' => Ok(Self::Open(serde_json::from_str(&frame[1..])?)),
            b'1' => Ok(Self::Close),
            b'2' => Ok(Self::Ping),
            b'3' => Ok(Self::Pong),
            b'4' => decode_message(&frame[1..]),
            b'5' | b'6' => Ok(Self::Noop),
            _ => Err(protocol(format!("unknown packet type in {}", snippet(frame)))),
        }
    }
}

fn decode_message(body: &str) -> Result<Packet, RelayError> {
    let Some(&kind) = body.as_bytes().first() else {
        return Err(protocol("message packet without a type"));
    };
    let payload = strip_ack_id(strip_namespace(&body[1..]));

    match kind {
        b'0' => {
            if payload.is_empty() {
                Ok(Packet::Connect(None))
            } else {
                Ok(Packet::Connect(Some(serde_json::from_str(payload)?)))
            }
        }
        b'1' => Ok(Packet::Disconnect),
        b'2' => decode_event(payload),
        b'3' => Ok(Packet::Noop),
        b'4' => {
            if payload.is_empty() {
                Ok(Packet::ConnectError(Value::Null))
            } else {
                Ok(Packet::ConnectError(serde_json::from_str(payload)?))
            }
        }
        b'5' | b'6' => Err(protocol("binary packets are not supported")),
        _ => Err(protocol(format!("unknown message type in 4{}", snippet(body)))),
    }
}

fn decode_event(payload: &str) -> Result<Packet, RelayError> {
    let args: Vec<Value> = serde_json::from_str(payload)?;
    let mut args = args.into_iter();
    let name = match args.next() {
        Some(Value::String(name)) => name,
        _ => return Err(protocol("event packet without a name")),
    };
    let mut rest: Vec<Value> = args.collect();
    let data = match rest.len() {
        0 => Value::Null,
        1 => rest.pop().unwrap_or(Value::Null),
        _ => Value::Array(rest),
    };
    Ok(Packet::Event { name, data })
}

/// `/chat,["x"]` → `["x"]`. Only the default namespace is ever joined.
fn strip_namespace(payload: &str) -> &str {
    if payload.starts_with('/') {
        payload.split_once(',').map_or("", |(_, rest)| rest)
    } else {
        payload
    }
}

fn strip_ack_id(payload: &str) -> &str {
    payload.trim_start_matches(|c: char| c.is_ascii_digit())
}

fn protocol(reason: impl Into<String>) -> RelayError {
    RelayError::Protocol {
        reason: reason.into(),
    }
}

fn snippet(frame: &str) -> String {
    frame.chars().take(32).collect()
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn decodes_open_handshake() {
        let frame = r#"0{"sid":"abc","upgrades":[],"pingInterval":25000,"pingTimeout":20000,"maxPayload":1000000}"#;
        let Packet::Open(open) = Packet::decode(frame).unwrap() else {
            panic!("expected open");
        };
        assert_eq!(open.sid, "abc");
        assert_eq!(open.max_payload, Some(1_000_000));
        assert_eq!(open.liveness_window(), Duration::from_secs(45));
    }

    #[test]
    fn decodes_heartbeat_frames() {
        assert_eq!(Packet::decode("2").unwrap(), Packet::Ping);
        assert_eq!(Packet::decode("2probe").unwrap(), Packet::Ping);
        assert_eq!(Packet::decode("3").unwrap(), Packet::Pong);
        assert_eq!(Packet::decode("1").unwrap(), Packet::Close);
        assert_eq!(Packet::decode("6").unwrap(), Packet::Noop);
    }

    #[test]
    fn decodes_connect_ack_and_plain_connect() {
        assert_eq!(Packet::decode("40").unwrap(), Packet::Connect(None));
        assert_eq!(
            Packet::decode(r#"40{"sid":"xyz"}"#).unwrap(),
            Packet::Connect(Some(json!({"sid": "xyz"})))
        );
    }

    #[test]
    fn decodes_event_with_single_argument() {
        let packet = Packet::decode(r#"42["server_response",{"data":"hi"}]"#).unwrap();
        assert_eq!(
            packet,
            Packet::event("server_response", json!({"data": "hi"}))
        );
    }

    #[test]
    fn event_argument_shapes() {
        assert_eq!(
            Packet::decode(r#"42["ping_me"]"#).unwrap(),
            Packet::event("ping_me", Value::Null)
        );
        assert_eq!(
            Packet::decode(r#"42["pair",1,2]"#).unwrap(),
            Packet::event("pair", json!([1, 2]))
        );
    }

    #[test]
    fn namespace_and_ack_id_are_skipped() {
        assert_eq!(
            Packet::decode(r#"42/,17["message",{"data":"x"}]"#).unwrap(),
            Packet::event("message", json!({"data": "x"}))
        );
        assert_eq!(
            Packet::decode(r#"4212["message","x"]"#).unwrap(),
            Packet::event("message", json!("x"))
        );
    }

    #[test]
    fn connect_error_payload() {
        assert_eq!(
            Packet::decode(r#"44{"message":"unauthorized"}"#).unwrap(),
            Packet::ConnectError(json!({"message": "unauthorized"}))
        );
    }

    #[test]
    fn rejects_malformed_frames() {
        assert_matches!(Packet::decode(""), Err(RelayError::Protocol { .. }));
        assert_matches!(Packet::decode("9"), Err(RelayError::Protocol { .. }));
        assert_matches!(Packet::decode("4"), Err(RelayError::Protocol { .. }));
        assert_matches!(Packet::decode("42[1,2]"), Err(RelayError::Protocol { .. }));
        assert_matches!(Packet::decode("42not json"), Err(RelayError::Json(_)));
        assert_matches!(Packet::decode("45"), Err(RelayError::Protocol { .. }));
        assert_matches!(Packet::decode("é"), Err(RelayError::Protocol { .. }));
    }

    #[test]
    fn encodes_client_frames() {
        assert_eq!(Packet::Connect(None).encode(), "40");
        assert_eq!(Packet::Disconnect.encode(), "41");
        assert_eq!(Packet::Pong.encode(), "3");
        assert_eq!(
            Packet::event("open_ai_webrtc", json!({"type": "response.create"})).encode(),
            r#"42["open_ai_webrtc",{"type":"response.create"}]"#
        );
    }

    #[test]
    fn encoded_open_decodes_back() {
        let open = OpenPayload {
            sid: "s1".into(),
            upgrades: vec![],
            ping_interval: 100,
            ping_timeout: 50,
            max_payload: None,
        };
        assert_eq!(
            Packet::decode(&Packet::Open(open.clone()).encode()).unwrap(),
            Packet::Open(open)
        );
    }
}
