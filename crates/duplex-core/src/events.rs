//! Control-channel event model.
//!
//! Two views of the same JSON frames:
//!
//! - [`ControlEvent`] is the lossless wire shape: a `type` discriminator, an
//!   optional `event_id`, and every other field kept verbatim. Inbound frames
//!   and the event log use it.
//! - [`ClientEvent`] is the typed sum of the events the bridge itself builds.
//!   It converts into a [`ControlEvent`] before it goes on the wire.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::ids::EventId;

/// `conversation.item.create` discriminator.
pub const CONVERSATION_ITEM_CREATE: &str = "conversation.item.create";
/// `response.create` discriminator.
pub const RESPONSE_CREATE: &str = "response.create";
/// `session.update` discriminator.
pub const SESSION_UPDATE: &str = "session.update";
/// Inbound signal emitted when the remote side finishes an output item.
pub const RESPONSE_OUTPUT_ITEM_DONE: &str = "response.output_item.done";

// ─────────────────────────────────────────────────────────────────────────────
// Wire frame
// ─────────────────────────────────────────────────────────────────────────────

/// A JSON control frame with a `type` discriminator.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ControlEvent {
    /// Event discriminator (`type` on the wire).
    #[serde(rename = "type")]
    pub event_type: String,
    /// Unique event identifier; assigned on send when missing.
    #[serde(
        default,
        deserialize_with = "lenient_event_id",
        skip_serializing_if = "Option::is_none"
    )]
    pub event_id: Option<EventId>,
    /// All remaining fields, untouched.
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl ControlEvent {
    /// Create an event with only a discriminator.
    #[must_use]
    pub fn new(event_type: impl Into<String>) -> Self {
        Self {
            event_type: event_type.into(),
            event_id: None,
            fields: Map::new(),
        }
    }

    /// Interpret a JSON value as a control event.
    ///
    /// Fails when the value is not an object or has no string `type`.
    pub fn from_value(value: Value) -> Result<Self, serde_json::Error> {
        serde_json::from_value(value)
    }

    /// Serialize back to a JSON value.
    pub fn to_value(&self) -> Result<Value, serde_json::Error> {
        serde_json::to_value(self)
    }

    /// Whether this event has the given discriminator.
    #[must_use]
    pub fn is(&self, event_type: &str) -> bool {
        self.event_type == event_type
    }

    /// Look up a payload field by name.
    #[must_use]
    pub fn field(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    /// Add or replace a payload field.
    #[must_use]
    pub fn with_field(mut self, key: impl Into<String>, value: Value) -> Self {
        let _ = self.fields.insert(key.into(), value);
        self
    }

    /// Return the event id, generating one first if it is missing or blank.
    ///
    /// An existing non-blank id is never replaced.
    pub fn ensure_event_id(&mut self) -> &EventId {
        if self.event_id.as_ref().is_none_or(EventId::is_blank) {
            self.event_id = Some(EventId::new());
        }
        self.event_id.get_or_insert_with(EventId::new)
    }
}

/// Accept any JSON scalar or structure as an event id. Strings are kept as-is,
/// other values use their compact JSON text, `null` means absent.
fn lenient_event_id<'de, D>(deserializer: D) -> Result<Option<EventId>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::Null => None,
        Value::String(s) => Some(EventId::from(s)),
        other => Some(EventId::from(other.to_string())),
    })
}

impl TryFrom<ClientEvent> for ControlEvent {
    type Error = serde_json::Error;

    fn try_from(event: ClientEvent) -> Result<Self, Self::Error> {
        serde_json::to_value(event).and_then(Self::from_value)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Typed outbound events
// ─────────────────────────────────────────────────────────────────────────────

/// Events the bridge originates on the control channel.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClientEvent {
    /// Insert an item into the conversation.
    #[serde(rename = "conversation.item.create")]
    ConversationItemCreate {
        /// The item to insert.
        item: ConversationItem,
    },
    /// Ask the remote side to produce a response.
    #[serde(rename = "response.create")]
    ResponseCreate,
    /// Patch the remote session configuration.
    #[serde(rename = "session.update")]
    SessionUpdate {
        /// Fields to change.
        session: SessionPatch,
    },
}

impl ClientEvent {
    /// The wire discriminator for this variant.
    #[must_use]
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::ConversationItemCreate { .. } => CONVERSATION_ITEM_CREATE,
            Self::ResponseCreate => RESPONSE_CREATE,
            Self::SessionUpdate { .. } => SESSION_UPDATE,
        }
    }
}

/// Speaker of a conversation item.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// The local user.
    User,
    /// The remote assistant.
    Assistant,
    /// System-level instructions.
    System,
}

/// Conversation item kind. Only plain messages are produced.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemKind {
    /// A chat message.
    Message,
}

/// A conversation item carried by `conversation.item.create`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ConversationItem {
    /// Item kind (`type` on the wire).
    #[serde(rename = "type")]
    pub kind: ItemKind,
    /// Who is speaking.
    pub role: Role,
    /// Message parts.
    pub content: Vec<ContentPart>,
}

impl ConversationItem {
    /// A single-part message from `role`.
    #[must_use]
    pub fn message(role: Role, part: ContentPart) -> Self {
        Self {
            kind: ItemKind::Message,
            role,
            content: vec![part],
        }
    }
}

/// One part of a message body.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    /// Text typed by the user.
    InputText {
        /// The text.
        text: String,
    },
    /// Text attributed to the assistant.
    Text {
        /// The text.
        text: String,
    },
}

impl ContentPart {
    /// Text of the part regardless of kind.
    #[must_use]
    pub fn text(&self) -> &str {
        match self {
            Self::InputText { text } | Self::Text { text } => text,
        }
    }
}

/// Partial session configuration for `session.update`.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionPatch {
    /// Replacement system instructions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
    /// Input audio transcription settings.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_audio_transcription: Option<TranscriptionConfig>,
}

/// Transcription model selection.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranscriptionConfig {
    /// Transcription model id.
    pub model: String,
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    #[test]
    fn inbound_frame_keeps_unknown_fields() {
        let raw = json!({
            "type": "response.output_item.done",
            "event_id": "evt_9",
            "response_id": "resp_1",
            "item": {"id": "item_1", "status": "completed"}
        });
        let event = ControlEvent::from_value(raw.clone()).unwrap();
        assert!(event.is(RESPONSE_OUTPUT_ITEM_DONE));
        assert_eq!(event.event_id.as_ref().unwrap().as_str(), "evt_9");
        assert_eq!(event.field("response_id"), Some(&json!("resp_1")));
        assert_eq!(event.to_value().unwrap(), raw);
    }

    #[test]
    fn frame_without_type_is_rejected() {
        assert!(ControlEvent::from_value(json!({"event_id": "x"})).is_err());
        assert!(ControlEvent::from_value(json!(["not", "an", "object"])).is_err());
        assert!(ControlEvent::from_value(json!({"type": 5})).is_err());
    }

    #[test]
    fn non_string_event_id_is_kept_as_text() {
        let event = ControlEvent::from_value(json!({"type": "b", "event_id": 42})).unwrap();
        assert!(event.is("b"));
        assert_eq!(event.event_id.as_ref().unwrap().as_str(), "42");

        let event = ControlEvent::from_value(json!({"type": "b", "event_id": null})).unwrap();
        assert!(event.event_id.is_none());

        let event =
            ControlEvent::from_value(json!({"type": "b", "event_id": {"n": 1}})).unwrap();
        assert_eq!(event.event_id.unwrap().as_str(), r#"{"n":1}"#);
    }

    #[test]
    fn missing_event_id_is_not_serialized() {
        let event = ControlEvent::new(RESPONSE_CREATE);
        assert_eq!(event.to_value().unwrap(), json!({"type": "response.create"}));
    }

    #[test]
    fn ensure_event_id_generates_when_missing() {
        let mut event = ControlEvent::new(RESPONSE_CREATE);
        let id = event.ensure_event_id().clone();
        assert!(!id.is_blank());
        assert_eq!(event.event_id, Some(id));
    }

    #[test]
    fn ensure_event_id_is_stable_across_calls() {
        let mut event = ControlEvent::new(RESPONSE_CREATE);
        let first = event.ensure_event_id().clone();
        let second = event.ensure_event_id().clone();
        assert_eq!(first, second);
    }

    #[test]
    fn ensure_event_id_replaces_blank() {
        let mut event = ControlEvent::from_value(json!({"type": "response.create", "event_id": ""}))
            .unwrap();
        let id = event.ensure_event_id().clone();
        assert!(!id.is_blank());
    }

    #[test]
    fn response_create_wire_shape() {
        let event = ControlEvent::try_from(ClientEvent::ResponseCreate).unwrap();
        assert_eq!(event.event_type, RESPONSE_CREATE);
        assert!(event.fields.is_empty());
    }

    #[test]
    fn user_message_wire_shape() {
        let event = ClientEvent::ConversationItemCreate {
            item: ConversationItem::message(
                Role::User,
                ContentPart::InputText {
                    text: "hi".into(),
                },
            ),
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(
            value,
            json!({
                "type": "conversation.item.create",
                "item": {
                    "type": "message",
                    "role": "user",
                    "content": [{"type": "input_text", "text": "hi"}]
                }
            })
        );
    }

    #[test]
    fn session_patch_omits_unset_fields() {
        let event = ClientEvent::SessionUpdate {
            session: SessionPatch {
                instructions: Some("be brief".into()),
                input_audio_transcription: None,
            },
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(
            value,
            json!({"type": "session.update", "session": {"instructions": "be brief"}})
        );
    }

    #[test]
    fn event_type_matches_serialized_tag() {
        let events = [
            ClientEvent::ResponseCreate,
            ClientEvent::SessionUpdate {
                session: SessionPatch::default(),
            },
        ];
        for event in events {
            let tag = event.event_type();
            let value = serde_json::to_value(&event).unwrap();
            assert_eq!(value["type"], tag);
        }
    }

    #[test]
    fn content_part_text_accessor() {
        let part = ContentPart::Text { text: "ctx".into() };
        assert_eq!(part.text(), "ctx");
    }

    proptest! {
        #[test]
        fn ensure_event_id_never_overwrites(existing in "[a-zA-Z0-9_-]{1,32}") {
            let mut event = ControlEvent::new(SESSION_UPDATE);
            event.event_id = Some(EventId::from(existing.as_str()));
            let id = event.ensure_event_id().clone();
            prop_assert_eq!(id.as_str(), existing.as_str());
        }

        #[test]
        fn generated_ids_unique_within_batch(count in 2usize..64) {
            let mut seen = std::collections::HashSet::new();
            for _ in 0..count {
                let mut event = ControlEvent::new(RESPONSE_CREATE);
                prop_assert!(seen.insert(event.ensure_event_id().clone()));
            }
        }
    }
}
