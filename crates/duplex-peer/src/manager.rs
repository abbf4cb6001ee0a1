//! Peer session lifecycle.
//!
//! ```text
//! idle ──start──▶ negotiating ──channel open──▶ active
//!   ▲                 │  │                        │
//!   └──── failure ────┘  └──────── stop ──────────┴──▶ closed ──start──▶ …
//! ```
//!
//! At most one session exists at a time. `stop` never waits for an in-flight
//! negotiation: the negotiation re-checks after every await that its session
//! is still current and tears its own handles down when it is not.

use std::fmt;
use std::sync::Arc;

use duplex_core::{BridgeError, ControlEvent, SessionId};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, info, instrument, warn};

use crate::events::{PeerEvent, PeerEventSink};
use crate::signaling::Signaling;
use crate::transport::{AudioSource, ControlChannel, LocalTrack, PeerBackend, PeerLink};

/// Peer session settings.
#[derive(Clone, Debug)]
pub struct PeerConfig {
    /// Label of the control data channel.
    pub control_channel_label: String,
}

impl Default for PeerConfig {
    fn default() -> Self {
        Self {
            control_channel_label: "oai-events".into(),
        }
    }
}

/// Lifecycle state of the current (or last) session.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PeerState {
    /// No session has been started, or the last start failed.
    Idle,
    /// Negotiation submitted or in flight; channel not yet open.
    Negotiating,
    /// Control channel open.
    Active,
    /// Stopped or failed; a new `start` is allowed.
    Closed,
}

impl PeerState {
    /// Lowercase name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Negotiating => "negotiating",
            Self::Active => "active",
            Self::Closed => "closed",
        }
    }
}

impl fmt::Display for PeerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Transport handles for one session, torn down together.
struct SessionHandles {
    session_id: SessionId,
    track: Option<Arc<dyn LocalTrack>>,
    peer: Option<Arc<dyn PeerLink>>,
    channel: Option<Arc<dyn ControlChannel>>,
}

impl SessionHandles {
    fn new(session_id: SessionId) -> Self {
        Self {
            session_id,
            track: None,
            peer: None,
            channel: None,
        }
    }

    /// Channel, then senders and capture track, then peer. Every step runs
    /// regardless of earlier failures.
    async fn teardown(self) {
        let session_id = &self.session_id;

        if let Some(channel) = &self.channel {
            if channel.is_open() {
                if let Err(err) = channel.close().await {
                    warn!(session_id = %session_id, error = %err, "failed to close control channel");
                }
            }
        }

        if let Some(peer) = &self.peer {
            if let Err(err) = peer.stop_senders().await {
                warn!(session_id = %session_id, error = %err, "failed to stop media senders");
            }
        }

        if let Some(track) = &self.track {
            track.stop();
        }

        if let Some(peer) = &self.peer {
            if let Err(err) = peer.close().await {
                warn!(session_id = %session_id, error = %err, "failed to close peer connection");
            }
        }

        debug!(session_id = %session_id, "session handles released");
    }
}

struct Inner {
    state: PeerState,
    current: Option<SessionId>,
    handles: Option<SessionHandles>,
}

/// Owns the peer connection, the outbound track and the control channel.
pub struct PeerSessionManager {
    config: PeerConfig,
    backend: Arc<dyn PeerBackend>,
    audio: Arc<dyn AudioSource>,
    signaling: Arc<dyn Signaling>,
    events: mpsc::UnboundedSender<PeerEvent>,
    inner: Mutex<Inner>,
}

impl PeerSessionManager {
    /// Create an idle manager. Transport events are published on `events`.
    pub fn new(
        config: PeerConfig,
        backend: Arc<dyn PeerBackend>,
        audio: Arc<dyn AudioSource>,
        signaling: Arc<dyn Signaling>,
        events: mpsc::UnboundedSender<PeerEvent>,
    ) -> Self {
        Self {
            config,
            backend,
            audio,
            signaling,
            events,
            inner: Mutex::new(Inner {
                state: PeerState::Idle,
                current: None,
                handles: None,
            }),
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> PeerState {
        self.inner.lock().state
    }

    /// Id of the current session, if one is negotiating or active.
    pub fn session_id(&self) -> Option<SessionId> {
        self.inner.lock().current.clone()
    }

    /// Whether `session_id` is the current session.
    pub fn is_current(&self, session_id: &SessionId) -> bool {
        self.inner.lock().current.as_ref() == Some(session_id)
    }

    /// Whether the control channel of the current session is open.
    pub fn is_active(&self) -> bool {
        self.state() == PeerState::Active
    }

    // ── start ───────────────────────────────────────────────────────

    /// Establish a new session and submit negotiation.
    ///
    /// Returns once the answer has been applied; the session becomes active
    /// when its channel opens.
    #[instrument(skip_all)]
    pub async fn start(&self) -> Result<SessionId, BridgeError> {
        let session_id = self.begin()?;
        info!(session_id = %session_id, "starting peer session");

        let mut handles = SessionHandles::new(session_id.clone());
        if let Err(err) = self.negotiate(&mut handles).await {
            warn!(session_id = %session_id, code = err.code(), error = %err, "peer session start failed");
            handles.teardown().await;
            self.abort(&session_id);
            return Err(err);
        }

        let superseded = {
            let mut inner = self.inner.lock();
            if inner.current.as_ref() == Some(&session_id) {
                inner.handles = Some(handles);
                None
            } else {
                Some(handles)
            }
        };

        if let Some(stale) = superseded {
            info!(session_id = %session_id, "discarding negotiation for stopped session");
            stale.teardown().await;
            return Err(superseded_error(&session_id));
        }

        info!(session_id = %session_id, "negotiation submitted");
        Ok(session_id)
    }

    fn begin(&self) -> Result<SessionId, BridgeError> {
        let mut inner = self.inner.lock();
        match inner.state {
            PeerState::Negotiating | PeerState::Active => Err(BridgeError::SessionBusy {
                state: inner.state.to_string(),
            }),
            PeerState::Idle | PeerState::Closed => {
                let session_id = SessionId::new();
                inner.state = PeerState::Negotiating;
                inner.current = Some(session_id.clone());
                Ok(session_id)
            }
        }
    }

    async fn negotiate(&self, handles: &mut SessionHandles) -> Result<(), BridgeError> {
        let session_id = handles.session_id.clone();

        let track = self.audio.acquire().await?;
        handles.track = Some(Arc::clone(&track));
        self.ensure_current(&session_id)?;

        let sink = PeerEventSink::new(session_id.clone(), self.events.clone());
        let peer = self.backend.create_peer(sink).await?;
        handles.peer = Some(Arc::clone(&peer));
        self.ensure_current(&session_id)?;

        peer.add_track(track).await?;
        let channel = peer
            .create_control_channel(&self.config.control_channel_label)
            .await?;
        handles.channel = Some(channel);

        let offer = peer.create_offer().await?;
        self.ensure_current(&session_id)?;

        let credential = self.signaling.fetch_credential().await?;
        self.ensure_current(&session_id)?;

        let answer = self.signaling.exchange(&credential, &offer).await?;
        self.ensure_current(&session_id)?;

        peer.apply_answer(answer).await?;
        self.ensure_current(&session_id)
    }

    fn ensure_current(&self, session_id: &SessionId) -> Result<(), BridgeError> {
        if self.is_current(session_id) {
            Ok(())
        } else {
            Err(superseded_error(session_id))
        }
    }

    fn abort(&self, session_id: &SessionId) {
        let mut inner = self.inner.lock();
        if inner.current.as_ref() == Some(session_id) {
            inner.current = None;
            inner.state = PeerState::Idle;
        }
    }

    // ── channel open ────────────────────────────────────────────────

    /// Record that `session_id`'s control channel opened.
    ///
    /// Returns `true` exactly once per session, on the
    /// `negotiating → active` transition.
    pub fn mark_channel_open(&self, session_id: &SessionId) -> bool {
        let mut inner = self.inner.lock();
        if inner.current.as_ref() == Some(session_id) && inner.state == PeerState::Negotiating {
            inner.state = PeerState::Active;
            info!(session_id = %session_id, "control channel open, session active");
            true
        } else {
            false
        }
    }

    // ── send ────────────────────────────────────────────────────────

    /// Send `event` on the control channel.
    ///
    /// Assigns an `event_id` if missing. Returns the event as sent, or `None`
    /// (with a warning) when the channel is unavailable or the send fails.
    pub async fn send(&self, mut event: ControlEvent) -> Option<ControlEvent> {
        let channel = {
            let inner = self.inner.lock();
            inner.handles.as_ref().and_then(|h| h.channel.clone())
        };

        let Some(channel) = channel else {
            warn!(event_type = %event.event_type, "no control channel available, dropping event");
            return None;
        };
        if !channel.is_open() {
            warn!(
                event_type = %event.event_type,
                label = channel.label(),
                "control channel not open, dropping event"
            );
            return None;
        }

        let _ = event.ensure_event_id();
        let frame = match serde_json::to_string(&event) {
            Ok(frame) => frame,
            Err(err) => {
                warn!(event_type = %event.event_type, error = %err, "failed to serialize control event");
                return None;
            }
        };

        if let Err(err) = channel.send_text(frame).await {
            warn!(event_type = %event.event_type, error = %err, "failed to send control event");
            return None;
        }

        debug!(
            event_type = %event.event_type,
            event_id = ?event.event_id,
            "control event sent"
        );
        Some(event)
    }

    // ── stop ────────────────────────────────────────────────────────

    /// Tear down the current session. Safe to call repeatedly.
    pub async fn stop(&self) {
        self.close_session(None).await;
    }

    /// Tear down `session_id` after a transport failure, if still current.
    pub async fn abandon(&self, session_id: &SessionId) {
        self.close_session(Some(session_id)).await;
    }

    async fn close_session(&self, only: Option<&SessionId>) {
        let (session_id, handles) = {
            let mut inner = self.inner.lock();
            let Some(current) = inner.current.as_ref() else {
                debug!("no peer session to stop");
                return;
            };
            if only.is_some_and(|id| id != current) {
                debug!("ignoring teardown request for a stale session");
                return;
            }
            let session_id = current.clone();
            inner.current = None;
            inner.state = PeerState::Closed;
            (session_id, inner.handles.take())
        };

        info!(session_id = %session_id, "stopping peer session");
        match handles {
            Some(handles) => handles.teardown().await,
            // Negotiation still in flight; it tears down its own handles.
            None => debug!(session_id = %session_id, "session stopped during negotiation"),
        }
    }
}

fn superseded_error(session_id: &SessionId) -> BridgeError {
    BridgeError::Superseded {
        session_id: session_id.to_string(),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
