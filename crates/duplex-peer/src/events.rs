//! Events surfaced by a peer session.

use duplex_core::SessionId;
use tokio::sync::mpsc;
use tracing::debug;

/// Something happened on a peer session's transports.
///
/// Every event names the session it belongs to so receivers can ignore
/// events from a session that has since been stopped.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PeerEvent {
    /// The control channel transitioned to open.
    ChannelOpen {
        /// Owning session.
        session_id: SessionId,
    },
    /// One inbound control-channel frame, unparsed.
    ControlMessage {
        /// Owning session.
        session_id: SessionId,
        /// Raw frame text.
        frame: String,
    },
    /// The remote side added a media track.
    RemoteTrack {
        /// Owning session.
        session_id: SessionId,
        /// Remote track id.
        track_id: String,
        /// Media kind (`audio` / `video`).
        kind: String,
    },
    /// The control channel closed.
    ChannelClosed {
        /// Owning session.
        session_id: SessionId,
    },
    /// The peer connection failed.
    ConnectionFailed {
        /// Owning session.
        session_id: SessionId,
        /// Transport-provided detail.
        reason: String,
    },
}

impl PeerEvent {
    /// Session this event belongs to.
    pub fn session_id(&self) -> &SessionId {
        match self {
            Self::ChannelOpen { session_id }
            | Self::ControlMessage { session_id, .. }
            | Self::RemoteTrack { session_id, .. }
            | Self::ChannelClosed { session_id }
            | Self::ConnectionFailed { session_id, .. } => session_id,
        }
    }
}

/// Session-scoped publisher handed to transport callbacks.
#[derive(Clone, Debug)]
pub struct PeerEventSink {
    session_id: SessionId,
    tx: mpsc::UnboundedSender<PeerEvent>,
}

impl PeerEventSink {
    /// Publisher for `session_id` writing into `tx`.
    pub fn new(session_id: SessionId, tx: mpsc::UnboundedSender<PeerEvent>) -> Self {
        Self { session_id, tx }
    }

    /// Session this sink publishes for.
    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    /// Publish [`PeerEvent::ChannelOpen`].
    pub fn channel_open(&self) {
        self.publish(PeerEvent::ChannelOpen {
            session_id: self.session_id.clone(),
        });
    }

    /// Publish [`PeerEvent::ControlMessage`].
    pub fn control_message(&self, frame: String) {
        self.publish(PeerEvent::ControlMessage {
            session_id: self.session_id.clone(),
            frame,
        });
    }

    /// Publish [`PeerEvent::RemoteTrack`].
    pub fn remote_track(&self, track_id: String, kind: String) {
        self.publish(PeerEvent::RemoteTrack {
            session_id: self.session_id.clone(),
            track_id,
            kind,
        });
    }

    /// Publish [`PeerEvent::ChannelClosed`].
    pub fn channel_closed(&self) {
        self.publish(PeerEvent::ChannelClosed {
            session_id: self.session_id.clone(),
        });
    }

    /// Publish [`PeerEvent::ConnectionFailed`].
    pub fn connection_failed(&self, reason: impl Into<String>) {
        self.publish(PeerEvent::ConnectionFailed {
            session_id: self.session_id.clone(),
            reason: reason.into(),
        });
    }

    fn publish(&self, event: PeerEvent) {
        if self.tx.send(event).is_err() {
            debug!(session_id = %self.session_id, "peer event receiver dropped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sink_tags_events_with_session() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let id = SessionId::from("s1");
        let sink = PeerEventSink::new(id.clone(), tx);

        sink.channel_open();
        sink.control_message("{}".into());

        let first = rx.try_recv().unwrap();
        let second = rx.try_recv().unwrap();
        assert_eq!(first, PeerEvent::ChannelOpen { session_id: id.clone() });
        assert_eq!(second.session_id(), &id);
    }

    #[test]
    fn publishing_after_receiver_drop_is_silent() {
        let (tx, rx) = mpsc::unbounded_channel();
        drop(rx);
        let sink = PeerEventSink::new(SessionId::new(), tx);
        sink.channel_closed();
    }
}
