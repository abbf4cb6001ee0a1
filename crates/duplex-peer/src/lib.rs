//! # duplex-peer
//!
//! Owns the peer session: one audio track out, one remote track in, and one
//! ordered control data channel.
//!
//! - [`PeerSessionManager`]: `start` / `send` / `stop` with the
//!   `idle → negotiating → active → closed` state machine
//! - [`transport`]: trait seams between the manager and the media stack
//! - [`rtc`]: the `webrtc` implementation of those traits
//! - [`signaling`]: credential fetch and SDP offer/answer over HTTP
//! - [`audio`]: a paced Opus silence source for headless runs
//!
//! Transport callbacks are turned into [`PeerEvent`]s on an unbounded channel
//! owned by whoever built the manager.

#![deny(unsafe_code)]

pub mod audio;
pub mod events;
pub mod manager;
pub mod rtc;
pub mod signaling;
pub mod transport;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use events::{PeerEvent, PeerEventSink};
pub use manager::{PeerConfig, PeerSessionManager, PeerState};
pub use signaling::{Credential, HttpSignaling, HttpSignalingConfig, Signaling};
pub use transport::{AudioFrame, AudioSource, ControlChannel, LocalTrack, PeerBackend, PeerLink};
