//! The session bridge.
//!
//! [`SessionBridge`] owns the [`PeerSessionManager`] and shares the
//! [`RelayConnection`]. Peer transport events and backend updates both land
//! on unbounded channels that a single dispatcher task ([`SessionBridge::run`])
//! drains, so everything the bridge does in response to either transport is
//! serialized.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Utc};
use duplex_core::events::ClientEvent;
use duplex_core::{BridgeError, ControlEvent, SessionId};
use duplex_peer::{
    AudioSource, PeerBackend, PeerConfig, PeerEvent, PeerSessionManager, PeerState, Signaling,
};
use duplex_relay::RelayConnection;
use duplex_relay::names::{
    CONNECT, CONTEXT_AND_INSTRUCTIONS, DISCONNECT, MESSAGE, SERVER_RESPONSE, SESSION_CLOSED,
};
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::event_log::EventLog;
use crate::translator::{self, BackendUpdate};

/// Receiving ends of the bridge's event bus, consumed by [`SessionBridge::run`].
#[derive(Debug)]
pub struct BridgeEvents {
    peer: mpsc::UnboundedReceiver<PeerEvent>,
    backend: mpsc::UnboundedReceiver<BackendUpdate>,
}

/// Payload of the `session_closed` relay event.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SessionClosed<'a> {
    session_id: &'a SessionId,
    closed_at: DateTime<Utc>,
}

/// Coordinates one peer session at a time with the backend relay.
pub struct SessionBridge {
    peer: Arc<PeerSessionManager>,
    relay: Arc<RelayConnection>,
    log: Mutex<EventLog>,
    relay_requested: AtomicBool,
}

impl SessionBridge {
    /// Build the bridge and its peer manager, and register the relay handlers.
    ///
    /// Nothing is connected yet; spawn [`run`](Self::run) with the returned
    /// [`BridgeEvents`] and call [`start`](Self::start).
    pub fn new(
        config: PeerConfig,
        backend: Arc<dyn PeerBackend>,
        audio: Arc<dyn AudioSource>,
        signaling: Arc<dyn Signaling>,
        relay: Arc<RelayConnection>,
    ) -> (Arc<Self>, BridgeEvents) {
        let (peer_tx, peer_rx) = mpsc::unbounded_channel();
        let (backend_tx, backend_rx) = mpsc::unbounded_channel();

        let peer = Arc::new(PeerSessionManager::new(
            config, backend, audio, signaling, peer_tx,
        ));
        register_relay_handlers(&relay, backend_tx);

        let bridge = Arc::new(Self {
            peer,
            relay,
            log: Mutex::new(EventLog::new()),
            relay_requested: AtomicBool::new(false),
        });
        let events = BridgeEvents {
            peer: peer_rx,
            backend: backend_rx,
        };
        (bridge, events)
    }

    /// The peer session manager.
    pub fn peer(&self) -> &Arc<PeerSessionManager> {
        &self.peer
    }

    /// The relay connection.
    pub fn relay(&self) -> &Arc<RelayConnection> {
        &self.relay
    }

    /// Peer session state.
    pub fn session_state(&self) -> PeerState {
        self.peer.state()
    }

    /// Whether the current session's control channel is open.
    pub fn is_active(&self) -> bool {
        self.peer.is_active()
    }

    /// Control events of the current session, newest first.
    pub fn events(&self) -> Vec<ControlEvent> {
        self.log.lock().snapshot()
    }

    // ── lifecycle ───────────────────────────────────────────────────────────

    /// Connect the relay (first call only) and start a peer session.
    pub async fn start(&self) -> Result<SessionId, BridgeError> {
        if !self.relay_requested.swap(true, Ordering::SeqCst) {
            let _ = self.relay.connect();
        }
        self.peer.start().await
    }

    /// Start a fresh relay connect cycle, for use once automatic retries
    /// are spent. Returns `false` if the relay is already connected or
    /// connecting.
    pub fn reconnect_relay(&self) -> bool {
        self.relay_requested.store(true, Ordering::SeqCst);
        let started = self.relay.connect();
        if started {
            info!(url = %self.relay.url(), "relay reconnect requested");
        } else {
            info!(state = %self.relay.state(), "relay reconnect skipped");
        }
        started
    }

    /// Tell the backend the session ended, then tear the session down.
    /// The relay stays connected.
    pub async fn stop(&self) {
        if let Some(session_id) = self.peer.session_id() {
            self.announce_closed(&session_id);
        }
        self.peer.stop().await;
    }

    /// [`stop`](Self::stop), then disconnect the relay.
    pub async fn shutdown(&self) {
        self.stop().await;
        self.relay.disconnect();
        info!("session bridge shut down");
    }

    fn announce_closed(&self, session_id: &SessionId) {
        let notice = SessionClosed {
            session_id,
            closed_at: Utc::now(),
        };
        match serde_json::to_value(&notice) {
            Ok(payload) => {
                let _ = self.relay.emit(SESSION_CLOSED, payload);
            }
            Err(err) => warn!(error = %err, "failed to encode session_closed"),
        }
    }

    // ── outbound ────────────────────────────────────────────────────────────

    /// Send a raw control event on the peer session and record it.
    pub async fn send_client_event(&self, event: ControlEvent) -> Option<ControlEvent> {
        let sent = self.peer.send(event).await?;
        self.log.lock().prepend(sent.clone());
        Some(sent)
    }

    /// Send a typed event.
    pub async fn send(&self, event: ClientEvent) -> Option<ControlEvent> {
        match ControlEvent::try_from(event) {
            Ok(event) => self.send_client_event(event).await,
            Err(err) => {
                let err = BridgeError::from(err);
                warn!(code = err.code(), error = %err, "failed to build control event");
                None
            }
        }
    }

    /// Send `text` as a user message and ask for a response. Returns whether
    /// both events went out.
    pub async fn send_text_message(&self, text: &str) -> bool {
        let mut delivered = true;
        for event in translator::to_outbound_messages(text) {
            delivered &= self.send(event).await.is_some();
        }
        delivered
    }

    // ── dispatcher ──────────────────────────────────────────────────────────

    /// Drain peer events and backend updates until `cancel` fires.
    pub async fn run(self: Arc<Self>, mut events: BridgeEvents, cancel: CancellationToken) {
        debug!("bridge dispatcher started");
        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                Some(event) = events.peer.recv() => self.handle_peer_event(event).await,
                Some(update) = events.backend.recv() => self.handle_backend_update(update).await,
                else => break,
            }
        }
        debug!("bridge dispatcher stopped");
    }

    async fn handle_peer_event(&self, event: PeerEvent) {
        if !self.peer.is_current(event.session_id()) {
            debug!(session_id = %event.session_id(), "ignoring event from a previous peer session");
            return;
        }

        match event {
            PeerEvent::ChannelOpen { session_id } => {
                if self.peer.mark_channel_open(&session_id) {
                    self.log.lock().clear();
                }
            }
            PeerEvent::ControlMessage { session_id, frame } => {
                self.relay_inbound(&session_id, &frame);
            }
            PeerEvent::RemoteTrack {
                session_id,
                track_id,
                kind,
            } => {
                info!(session_id = %session_id, track_id = %track_id, kind = %kind, "remote track received");
            }
            PeerEvent::ChannelClosed { session_id } => {
                warn!(session_id = %session_id, "control channel closed, ending session");
                self.end_session(&session_id).await;
            }
            PeerEvent::ConnectionFailed { session_id, reason } => {
                warn!(session_id = %session_id, reason = %reason, "peer connection failed, ending session");
                self.end_session(&session_id).await;
            }
        }
    }

    /// Record an inbound frame and mirror it to the relay.
    fn relay_inbound(&self, session_id: &SessionId, frame: &str) {
        let (payload, event) = translator::decode_inbound_frame(frame);
        match event {
            Some(event) => {
                debug!(session_id = %session_id, event_type = %event.event_type, "control event received");
                self.log.lock().prepend(event);
            }
            None => debug!(session_id = %session_id, "non-event control frame, forwarding only"),
        }

        let relay_event = translator::to_relay_event(payload);
        let _ = self.relay.emit(relay_event.name, relay_event.payload);
    }

    async fn end_session(&self, session_id: &SessionId) {
        self.announce_closed(session_id);
        self.peer.abandon(session_id).await;
    }

    async fn handle_backend_update(&self, update: BackendUpdate) {
        for event in translator::translate_backend_update(&update) {
            let event_type = event.event_type();
            if self.send(event).await.is_none() {
                debug!(event_type, "backend update not applied");
            }
        }
    }
}

impl std::fmt::Debug for SessionBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionBridge")
            .field("session_state", &self.peer.state())
            .field("relay", &self.relay)
            .finish_non_exhaustive()
    }
}

/// Wire relay events into the bridge.
fn register_relay_handlers(relay: &RelayConnection, backend_tx: mpsc::UnboundedSender<BackendUpdate>) {
    relay.on(CONTEXT_AND_INSTRUCTIONS, move |payload| {
        match BackendUpdate::from_value(payload) {
            Ok(update) if update.is_empty() => debug!("empty backend update ignored"),
            Ok(update) => {
                let _ = backend_tx.send(update);
            }
            Err(err) => warn!(error = %err, "malformed backend update dropped"),
        }
    });

    for name in [MESSAGE, SERVER_RESPONSE] {
        relay.on(name, move |payload| {
            info!(event = name, data = %message_text(payload), "relay message");
        });
    }

    relay.on(CONNECT, |_| info!("connected to backend relay"));
    relay.on(DISCONNECT, |reason| {
        info!(reason = %message_text(reason), "disconnected from backend relay");
    });
}

/// `data.data` if present, otherwise the payload itself.
fn message_text(payload: &Value) -> String {
    let inner = payload.get("data").unwrap_or(payload);
    match inner {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
