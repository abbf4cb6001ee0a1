//! Conversions between backend payloads, control events and relay events.
//!
//! Everything here is pure: no I/O, no shared state.

use duplex_core::ControlEvent;
use duplex_core::events::{
    ClientEvent, ContentPart, ConversationItem, Role, SessionPatch, TranscriptionConfig,
};
use duplex_relay::names::OPEN_AI_WEBRTC;
use serde::Deserialize;
use serde_json::Value;

/// Transcription model requested alongside every instruction update.
pub const TRANSCRIPTION_MODEL: &str = "whisper-1";

/// Prepended to backend context before it is injected as an assistant item.
pub const CONTEXT_PREFIX: &str =
    "Use the following context from the backend for the rest of this conversation:\n";

/// Payload of the relay's `context_and_instructions` event.
#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackendUpdate {
    /// Replacement session instructions.
    #[serde(default, alias = "updated_instructions")]
    pub updated_instructions: Option<String>,
    /// Context to inject; a string, or any JSON rendered compactly.
    #[serde(default)]
    pub context: Option<Value>,
}

impl BackendUpdate {
    /// Decode a relay payload.
    pub fn from_value(value: &Value) -> Result<Self, serde_json::Error> {
        Self::deserialize(value)
    }

    /// Instructions, if present and non-blank.
    pub fn instructions(&self) -> Option<&str> {
        self.updated_instructions
            .as_deref()
            .filter(|s| !s.trim().is_empty())
    }

    /// Context as text, if present and non-blank.
    pub fn context_text(&self) -> Option<String> {
        match self.context.as_ref()? {
            Value::Null => None,
            Value::String(s) if s.trim().is_empty() => None,
            Value::String(s) => Some(s.clone()),
            other => Some(other.to_string()),
        }
    }

    /// Whether the update carries nothing to apply.
    pub fn is_empty(&self) -> bool {
        self.instructions().is_none() && self.context_text().is_none()
    }
}

/// A named payload for the relay.
#[derive(Clone, Debug, PartialEq)]
pub struct RelayEvent {
    /// Relay event name.
    pub name: &'static str,
    /// Event payload.
    pub payload: Value,
}

/// A typed user message followed by a request for a response.
pub fn to_outbound_messages(text: &str) -> [ClientEvent; 2] {
    [
        ClientEvent::ConversationItemCreate {
            item: ConversationItem::message(
                Role::User,
                ContentPart::InputText {
                    text: text.to_owned(),
                },
            ),
        },
        ClientEvent::ResponseCreate,
    ]
}

/// `session.update` replacing the session instructions.
pub fn from_backend_instructions(instructions: &str) -> ClientEvent {
    ClientEvent::SessionUpdate {
        session: SessionPatch {
            instructions: Some(instructions.to_owned()),
            input_audio_transcription: Some(TranscriptionConfig {
                model: TRANSCRIPTION_MODEL.to_owned(),
            }),
        },
    }
}

/// Assistant `conversation.item.create` carrying backend context.
pub fn from_backend_context(context: &str) -> ClientEvent {
    ClientEvent::ConversationItemCreate {
        item: ConversationItem::message(
            Role::Assistant,
            ContentPart::Text {
                text: format!("{CONTEXT_PREFIX}{context}"),
            },
        ),
    }
}

/// Events for one backend update: instructions first, then context.
pub fn translate_backend_update(update: &BackendUpdate) -> Vec<ClientEvent> {
    let mut events = Vec::with_capacity(2);
    if let Some(instructions) = update.instructions() {
        events.push(from_backend_instructions(instructions));
    }
    if let Some(context) = update.context_text() {
        events.push(from_backend_context(&context));
    }
    events
}

/// Wrap a control-channel payload for forwarding to the relay.
pub fn to_relay_event(payload: Value) -> RelayEvent {
    RelayEvent {
        name: OPEN_AI_WEBRTC,
        payload,
    }
}

/// Decode a raw inbound control frame.
///
/// Returns the payload to forward (the parsed JSON, or the raw text as a JSON
/// string when it does not parse) and the frame as a [`ControlEvent`] when it
/// is one.
pub fn decode_inbound_frame(frame: &str) -> (Value, Option<ControlEvent>) {
    match serde_json::from_str::<Value>(frame) {
        Ok(value) => {
            let event = ControlEvent::from_value(value.clone()).ok();
            (value, event)
        }
        Err(_) => (Value::String(frame.to_owned()), None),
    }
}
