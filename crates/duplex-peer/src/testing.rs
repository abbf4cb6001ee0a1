//! In-memory fakes of the transport traits.
//!
//! Every fake appends the operations it performs to a shared [`Journal`] so
//! tests can assert on call order across the peer, its channel and the
//! capture track.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use duplex_core::{BridgeError, SessionId};
use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::events::PeerEventSink;
use crate::signaling::{Credential, Signaling};
use crate::transport::{AudioFrame, AudioSource, ControlChannel, LocalTrack, PeerBackend, PeerLink};

/// Shared, ordered record of fake operations.
pub type Journal = Arc<Mutex<Vec<String>>>;

/// Answer SDP returned by [`FakeSignaling`].
pub const FAKE_ANSWER: &str = "v=0\r\no=- 0 0 IN IP4 127.0.0.1\r\ns=fake\r\n";

fn record(journal: &Journal, op: impl Into<String>) {
    journal.lock().push(op.into());
}

// ── Audio ───────────────────────────────────────────────────────────────────

/// Capture track counting `stop` calls.
pub struct FakeTrack {
    id: String,
    journal: Journal,
    stops: AtomicUsize,
}

impl FakeTrack {
    /// How many times `stop` ran.
    pub fn stop_count(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LocalTrack for FakeTrack {
    fn id(&self) -> &str {
        &self.id
    }

    async fn next_frame(&self) -> Option<AudioFrame> {
        (!self.is_stopped()).then(|| AudioFrame {
            data: Bytes::from_static(&[0xF8, 0xFF, 0xFE]),
            duration: Duration::from_millis(20),
        })
    }

    fn stop(&self) {
        let _ = self.stops.fetch_add(1, Ordering::SeqCst);
        record(&self.journal, "track.stop");
    }

    fn is_stopped(&self) -> bool {
        self.stop_count() > 0
    }
}

/// Audio source handing out [`FakeTrack`]s, or failing.
#[derive(Default)]
pub struct FakeAudio {
    fail: bool,
    journal: Mutex<Journal>,
    tracks: Mutex<Vec<Arc<FakeTrack>>>,
}

impl FakeAudio {
    /// A source that always succeeds.
    pub fn new() -> Self {
        Self::default()
    }

    /// A source whose device is unavailable.
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    /// Record track operations into `journal` from now on.
    pub fn use_journal(&self, journal: Journal) {
        *self.journal.lock() = journal;
    }

    /// Most recently acquired track.
    pub fn last_track(&self) -> Option<Arc<FakeTrack>> {
        self.tracks.lock().last().cloned()
    }
}

#[async_trait]
impl AudioSource for FakeAudio {
    async fn acquire(&self) -> Result<Arc<dyn LocalTrack>, BridgeError> {
        if self.fail {
            return Err(BridgeError::MediaAcquisition {
                reason: "no capture device".into(),
            });
        }
        let track = Arc::new(FakeTrack {
            id: format!("fake-track-{}", self.tracks.lock().len()),
            journal: self.journal.lock().clone(),
            stops: AtomicUsize::new(0),
        });
        self.tracks.lock().push(Arc::clone(&track));
        Ok(track)
    }
}

// ── Channel ─────────────────────────────────────────────────────────────────

/// Control channel capturing sent frames.
pub struct FakeChannel {
    label: String,
    sink: PeerEventSink,
    journal: Journal,
    open: AtomicBool,
    fail_send: AtomicBool,
    fail_close: AtomicBool,
    sent: Mutex<Vec<String>>,
}

impl FakeChannel {
    /// Frames sent so far.
    pub fn sent(&self) -> Vec<String> {
        self.sent.lock().clone()
    }

    /// Make every later send fail.
    pub fn fail_sends(&self) {
        self.fail_send.store(true, Ordering::SeqCst);
    }

    /// Make `close` report an error (after closing).
    pub fn fail_close(&self) {
        self.fail_close.store(true, Ordering::SeqCst);
    }

    /// Simulate the remote side closing the channel.
    pub fn close_from_remote(&self) {
        self.open.store(false, Ordering::SeqCst);
        self.sink.channel_closed();
    }
}

#[async_trait]
impl ControlChannel for FakeChannel {
    fn label(&self) -> &str {
        &self.label
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    async fn send_text(&self, text: String) -> Result<(), BridgeError> {
        if self.fail_send.load(Ordering::SeqCst) || !self.is_open() {
            return Err(BridgeError::ChannelUnavailable {
                reason: "fake channel refused the frame".into(),
            });
        }
        self.sent.lock().push(text);
        Ok(())
    }

    async fn close(&self) -> Result<(), BridgeError> {
        record(&self.journal, "channel.close");
        self.open.store(false, Ordering::SeqCst);
        self.sink.channel_closed();
        if self.fail_close.load(Ordering::SeqCst) {
            return Err(BridgeError::ChannelUnavailable {
                reason: "fake close failure".into(),
            });
        }
        Ok(())
    }
}

// ── Peer ────────────────────────────────────────────────────────────────────

/// Peer connection driven by the test.
pub struct FakePeer {
    sink: PeerEventSink,
    journal: Journal,
    channel: Mutex<Option<Arc<FakeChannel>>>,
    fail_stop_senders: AtomicBool,
}

impl FakePeer {
    /// Session the peer was created for.
    pub fn session_id(&self) -> &SessionId {
        self.sink.session_id()
    }

    /// The control channel, once created.
    pub fn channel(&self) -> Option<Arc<FakeChannel>> {
        self.channel.lock().clone()
    }

    /// Open the control channel and publish the open event.
    pub fn open_channel(&self) {
        if let Some(channel) = self.channel() {
            channel.open.store(true, Ordering::SeqCst);
        }
        self.sink.channel_open();
    }

    /// Deliver an inbound control frame.
    pub fn receive(&self, frame: &str) {
        self.sink.control_message(frame.to_owned());
    }

    /// Deliver a remote audio track.
    pub fn add_remote_track(&self, track_id: &str) {
        self.sink.remote_track(track_id.to_owned(), "audio".into());
    }

    /// Report a connection failure.
    pub fn fail_connection(&self, reason: &str) {
        self.sink.connection_failed(reason);
    }

    /// Make `stop_senders` report an error.
    pub fn fail_stop_senders(&self) {
        self.fail_stop_senders.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl PeerLink for FakePeer {
    async fn add_track(&self, _track: Arc<dyn LocalTrack>) -> Result<(), BridgeError> {
        record(&self.journal, "peer.add_track");
        Ok(())
    }

    async fn create_control_channel(
        &self,
        label: &str,
    ) -> Result<Arc<dyn ControlChannel>, BridgeError> {
        record(&self.journal, format!("channel.create:{label}"));
        let channel = Arc::new(FakeChannel {
            label: label.to_owned(),
            sink: self.sink.clone(),
            journal: Arc::clone(&self.journal),
            open: AtomicBool::new(false),
            fail_send: AtomicBool::new(false),
            fail_close: AtomicBool::new(false),
            sent: Mutex::new(Vec::new()),
        });
        *self.channel.lock() = Some(Arc::clone(&channel));
        Ok(channel)
    }

    async fn create_offer(&self) -> Result<String, BridgeError> {
        record(&self.journal, "peer.offer");
        Ok("v=0\r\no=- 0 0 IN IP4 127.0.0.1\r\ns=offer\r\n".into())
    }

    async fn apply_answer(&self, _sdp: String) -> Result<(), BridgeError> {
        record(&self.journal, "peer.answer");
        Ok(())
    }

    async fn stop_senders(&self) -> Result<(), BridgeError> {
        record(&self.journal, "peer.stop_senders");
        if self.fail_stop_senders.load(Ordering::SeqCst) {
            return Err(BridgeError::negotiation("fake sender stop failure"));
        }
        Ok(())
    }

    async fn close(&self) -> Result<(), BridgeError> {
        record(&self.journal, "peer.close");
        Ok(())
    }
}

/// Backend producing [`FakePeer`]s.
#[derive(Default)]
pub struct FakeBackend {
    journal: Journal,
    peers: Mutex<Vec<Arc<FakePeer>>>,
}

impl FakeBackend {
    /// Empty backend with a fresh journal.
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the journal.
    pub fn journal(&self) -> Vec<String> {
        self.journal.lock().clone()
    }

    /// Shared journal handle.
    pub fn journal_handle(&self) -> Journal {
        Arc::clone(&self.journal)
    }

    /// Forget recorded operations.
    pub fn clear_journal(&self) {
        self.journal.lock().clear();
    }

    /// Most recently created peer.
    pub fn last_peer(&self) -> Option<Arc<FakePeer>> {
        self.peers.lock().last().cloned()
    }

    /// Number of peers created.
    pub fn peer_count(&self) -> usize {
        self.peers.lock().len()
    }
}

#[async_trait]
impl PeerBackend for FakeBackend {
    async fn create_peer(&self, sink: PeerEventSink) -> Result<Arc<dyn PeerLink>, BridgeError> {
        record(&self.journal, "peer.create");
        let peer = Arc::new(FakePeer {
            sink,
            journal: Arc::clone(&self.journal),
            channel: Mutex::new(None),
            fail_stop_senders: AtomicBool::new(false),
        });
        self.peers.lock().push(Arc::clone(&peer));
        Ok(peer)
    }
}

// ── Signaling ───────────────────────────────────────────────────────────────

enum SignalingMode {
    Answer,
    Reject(u16),
    Gated,
}

/// Signaling stand-in: answers, rejects, or waits for the test.
pub struct FakeSignaling {
    mode: SignalingMode,
    exchanges: AtomicUsize,
    entered: Notify,
    release: Arc<Notify>,
}

impl FakeSignaling {
    fn with_mode(mode: SignalingMode) -> Self {
        Self {
            mode,
            exchanges: AtomicUsize::new(0),
            entered: Notify::new(),
            release: Arc::new(Notify::new()),
        }
    }

    /// Always returns [`FAKE_ANSWER`].
    pub fn answering() -> Self {
        Self::with_mode(SignalingMode::Answer)
    }

    /// Fails the exchange with an HTTP `status`.
    pub fn rejecting(status: u16) -> Self {
        Self::with_mode(SignalingMode::Reject(status))
    }

    /// Blocks the exchange until [`release_handle`](Self::release_handle) is notified.
    pub fn gated() -> Self {
        Self::with_mode(SignalingMode::Gated)
    }

    /// Handle that unblocks a gated exchange.
    pub fn release_handle(&self) -> Arc<Notify> {
        Arc::clone(&self.release)
    }

    /// Resolve once an exchange has started.
    pub async fn wait_for_exchange(&self) {
        self.entered.notified().await;
    }

    /// Number of exchanges attempted.
    pub fn exchanges(&self) -> usize {
        self.exchanges.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Signaling for FakeSignaling {
    async fn fetch_credential(&self) -> Result<Credential, BridgeError> {
        Ok(Credential::new("ek_fake"))
    }

    async fn exchange(
        &self,
        _credential: &Credential,
        _offer_sdp: &str,
    ) -> Result<String, BridgeError> {
        let _ = self.exchanges.fetch_add(1, Ordering::SeqCst);
        self.entered.notify_one();
        match self.mode {
            SignalingMode::Answer => Ok(FAKE_ANSWER.into()),
            SignalingMode::Reject(status) => Err(BridgeError::Negotiation {
                reason: format!("fake signaling rejected with {status}"),
                status: Some(status),
            }),
            SignalingMode::Gated => {
                self.release.notified().await;
                Ok(FAKE_ANSWER.into())
            }
        }
    }
}
