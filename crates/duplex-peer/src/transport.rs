//! Trait seams between [`PeerSessionManager`](crate::PeerSessionManager) and
//! the media stack.
//!
//! The manager only sequences calls and owns handles; everything that
//! touches sockets, codecs or devices sits behind these traits.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use duplex_core::BridgeError;

use crate::events::PeerEventSink;

/// One encoded audio frame from a capture source.
#[derive(Clone, Debug)]
pub struct AudioFrame {
    /// Encoded payload (Opus).
    pub data: Bytes,
    /// Playout duration of the frame.
    pub duration: Duration,
}

/// A local capture track.
#[async_trait]
pub trait LocalTrack: Send + Sync {
    /// Track id.
    fn id(&self) -> &str;

    /// Next frame, or `None` once the track is stopped.
    async fn next_frame(&self) -> Option<AudioFrame>;

    /// Release the capture device. Called exactly once per session.
    fn stop(&self);

    /// Whether [`stop`](Self::stop) has run.
    fn is_stopped(&self) -> bool;
}

/// Where local audio comes from.
#[async_trait]
pub trait AudioSource: Send + Sync {
    /// Open a capture track.
    ///
    /// Failures must be [`BridgeError::MediaAcquisition`].
    async fn acquire(&self) -> Result<Arc<dyn LocalTrack>, BridgeError>;
}

/// Factory for peer connections.
#[async_trait]
pub trait PeerBackend: Send + Sync {
    /// Build a new peer connection whose callbacks publish into `sink`.
    async fn create_peer(&self, sink: PeerEventSink) -> Result<Arc<dyn PeerLink>, BridgeError>;
}

/// One live peer connection.
#[async_trait]
pub trait PeerLink: Send + Sync {
    /// Send `track`'s frames to the remote side.
    async fn add_track(&self, track: Arc<dyn LocalTrack>) -> Result<(), BridgeError>;

    /// Open the ordered control data channel.
    async fn create_control_channel(
        &self,
        label: &str,
    ) -> Result<Arc<dyn ControlChannel>, BridgeError>;

    /// Produce the local offer SDP, applied as the local description.
    async fn create_offer(&self) -> Result<String, BridgeError>;

    /// Apply the remote answer SDP.
    async fn apply_answer(&self, sdp: String) -> Result<(), BridgeError>;

    /// Stop every outbound media sender.
    async fn stop_senders(&self) -> Result<(), BridgeError>;

    /// Close the connection.
    async fn close(&self) -> Result<(), BridgeError>;
}

/// The ordered, reliable control data channel.
#[async_trait]
pub trait ControlChannel: Send + Sync {
    /// Channel label.
    fn label(&self) -> &str;

    /// Whether the channel is open for sending.
    fn is_open(&self) -> bool;

    /// Send one text frame.
    async fn send_text(&self, text: String) -> Result<(), BridgeError>;

    /// Close the channel.
    async fn close(&self) -> Result<(), BridgeError>;
}
