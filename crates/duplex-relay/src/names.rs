//! Relay event names.

/// Connection established (local lifecycle event).
pub const CONNECT: &str = "connect";
/// Connection lost or closed; payload is the reason string.
pub const DISCONNECT: &str = "disconnect";
/// A connection attempt failed; payload is `{"message": ...}`.
pub const CONNECT_ERROR: &str = "connect_error";
/// A reconnect attempt is starting; payload is the attempt number.
pub const RECONNECT_ATTEMPT: &str = "reconnect_attempt";

/// Backend instruction/context update (inbound).
pub const CONTEXT_AND_INSTRUCTIONS: &str = "context_and_instructions";
/// Mirrored control-channel frame (outbound).
pub const OPEN_AI_WEBRTC: &str = "open_ai_webrtc";
/// Peer session ended (outbound).
pub const SESSION_CLOSED: &str = "session_closed";
/// Informational server message (inbound).
pub const MESSAGE: &str = "message";
/// Informational server response (inbound).
pub const SERVER_RESPONSE: &str = "server_response";

/// Whether `name` is a local lifecycle event that may not be emitted.
pub fn is_lifecycle(name: &str) -> bool {
    matches!(name, CONNECT | DISCONNECT | CONNECT_ERROR | RECONNECT_ATTEMPT)
}
