//! `webrtc` implementation of the transport traits.
//!
//! One Opus send track fed from a [`LocalTrack`], one ordered data channel,
//! and full ICE gathering before the offer is handed to signaling (no
//! trickle).

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use duplex_core::BridgeError;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::{MIME_TYPE_OPUS, MediaEngine};
use webrtc::api::{API, APIBuilder};
use webrtc::data_channel::RTCDataChannel;
use webrtc::data_channel::data_channel_message::DataChannelMessage;
use webrtc::data_channel::data_channel_state::RTCDataChannelState;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::media::Sample;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;

use crate::events::PeerEventSink;
use crate::transport::{ControlChannel, LocalTrack, PeerBackend, PeerLink};

const ICE_GATHER_TIMEOUT: Duration = Duration::from_secs(15);
const OPUS_CLOCK_RATE: u32 = 48_000;
const OPUS_CHANNELS: u16 = 2;
const RTCP_BUFFER: usize = 1500;

fn rtc_error(context: &str, err: &webrtc::Error) -> BridgeError {
    BridgeError::negotiation(format!("{context}: {err}"))
}

/// Peer backend built on `webrtc`.
pub struct RtcBackend {
    api: API,
    ice_servers: Vec<String>,
}

impl RtcBackend {
    /// Register default codecs and interceptors.
    pub fn new(ice_servers: Vec<String>) -> Result<Self, BridgeError> {
        let mut media = MediaEngine::default();
        media
            .register_default_codecs()
            .map_err(|e| rtc_error("register codecs", &e))?;
        let registry = register_default_interceptors(Registry::new(), &mut media)
            .map_err(|e| rtc_error("register interceptors", &e))?;
        let api = APIBuilder::new()
            .with_media_engine(media)
            .with_interceptor_registry(registry)
            .build();
        Ok(Self { api, ice_servers })
    }

    fn configuration(&self) -> RTCConfiguration {
        let ice_servers = if self.ice_servers.is_empty() {
            Vec::new()
        } else {
            vec![RTCIceServer {
                urls: self.ice_servers.clone(),
                ..Default::default()
            }]
        };
        RTCConfiguration {
            ice_servers,
            ..Default::default()
        }
    }
}

#[async_trait]
impl PeerBackend for RtcBackend {
    async fn create_peer(&self, sink: PeerEventSink) -> Result<Arc<dyn PeerLink>, BridgeError> {
        let pc = Arc::new(
            self.api
                .new_peer_connection(self.configuration())
                .await
                .map_err(|e| rtc_error("create peer connection", &e))?,
        );

        let track_sink = sink.clone();
        pc.on_track(Box::new(move |track, _receiver, _transceiver| {
            let sink = track_sink.clone();
            Box::pin(async move {
                sink.remote_track(track.id(), track.kind().to_string());
            })
        }));

        let state_sink = sink.clone();
        pc.on_peer_connection_state_change(Box::new(move |state| {
            let sink = state_sink.clone();
            Box::pin(async move {
                debug!(session_id = %sink.session_id(), %state, "peer connection state changed");
                if state == RTCPeerConnectionState::Failed {
                    sink.connection_failed("peer connection failed");
                }
            })
        }));

        Ok(Arc::new(RtcPeer {
            pc,
            sink,
            tasks: Mutex::new(Vec::new()),
        }))
    }
}

/// A live `RTCPeerConnection`.
pub struct RtcPeer {
    pc: Arc<RTCPeerConnection>,
    sink: PeerEventSink,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl RtcPeer {
    fn spawn(&self, task: impl Future<Output = ()> + Send + 'static) {
        self.tasks.lock().push(tokio::spawn(task));
    }
}

#[async_trait]
impl PeerLink for RtcPeer {
    async fn add_track(&self, capture: Arc<dyn LocalTrack>) -> Result<(), BridgeError> {
        let local = Arc::new(TrackLocalStaticSample::new(
            RTCRtpCodecCapability {
                mime_type: MIME_TYPE_OPUS.to_owned(),
                clock_rate: OPUS_CLOCK_RATE,
                channels: OPUS_CHANNELS,
                ..Default::default()
            },
            capture.id().to_owned(),
            "duplex".to_owned(),
        ));

        let sender = self
            .pc
            .add_track(Arc::clone(&local) as Arc<dyn TrackLocal + Send + Sync>)
            .await
            .map_err(|e| rtc_error("add track", &e))?;

        // RTCP must be drained for interceptors to run.
        self.spawn(async move {
            let mut buf = vec![0u8; RTCP_BUFFER];
            while sender.read(&mut buf).await.is_ok() {}
        });

        self.spawn(async move {
            while let Some(frame) = capture.next_frame().await {
                let sample = Sample {
                    data: frame.data,
                    duration: frame.duration,
                    ..Default::default()
                };
                if let Err(err) = local.write_sample(&sample).await {
                    debug!(error = %err, "audio pump stopped");
                    break;
                }
            }
        });

        Ok(())
    }

    async fn create_control_channel(
        &self,
        label: &str,
    ) -> Result<Arc<dyn ControlChannel>, BridgeError> {
        let dc = self
            .pc
            .create_data_channel(label, None)
            .await
            .map_err(|e| rtc_error("create data channel", &e))?;

        let open_sink = self.sink.clone();
        dc.on_open(Box::new(move || {
            Box::pin(async move {
                open_sink.channel_open();
            })
        }));

        let message_sink = self.sink.clone();
        dc.on_message(Box::new(move |msg: DataChannelMessage| {
            let sink = message_sink.clone();
            Box::pin(async move {
                match String::from_utf8(msg.data.to_vec()) {
                    Ok(frame) => sink.control_message(frame),
                    Err(err) => warn!(error = %err, "dropping non-UTF-8 control frame"),
                }
            })
        }));

        let close_sink = self.sink.clone();
        dc.on_close(Box::new(move || {
            let sink = close_sink.clone();
            Box::pin(async move {
                sink.channel_closed();
            })
        }));

        Ok(Arc::new(RtcChannel {
            label: label.to_owned(),
            dc,
        }))
    }

    async fn create_offer(&self) -> Result<String, BridgeError> {
        let offer = self
            .pc
            .create_offer(None)
            .await
            .map_err(|e| rtc_error("create offer", &e))?;
        let mut gathered = self.pc.gathering_complete_promise().await;
        self.pc
            .set_local_description(offer)
            .await
            .map_err(|e| rtc_error("set local description", &e))?;

        if timeout(ICE_GATHER_TIMEOUT, gathered.recv()).await.is_err() {
            warn!("ICE gathering timed out, sending partial candidates");
        }

        self.pc
            .local_description()
            .await
            .map(|desc| desc.sdp)
            .ok_or_else(|| BridgeError::negotiation("no local description after ICE gathering"))
    }

    async fn apply_answer(&self, sdp: String) -> Result<(), BridgeError> {
        let answer =
            RTCSessionDescription::answer(sdp).map_err(|e| rtc_error("parse answer", &e))?;
        self.pc
            .set_remote_description(answer)
            .await
            .map_err(|e| rtc_error("set remote description", &e))
    }

    async fn stop_senders(&self) -> Result<(), BridgeError> {
        let mut first_error = None;
        for sender in self.pc.get_senders().await {
            if let Err(err) = sender.stop().await {
                warn!(error = %err, "failed to stop sender");
                first_error.get_or_insert(rtc_error("stop sender", &err));
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    async fn close(&self) -> Result<(), BridgeError> {
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
        self.pc
            .close()
            .await
            .map_err(|e| rtc_error("close peer connection", &e))
    }
}

/// An `RTCDataChannel` used as the control channel.
pub struct RtcChannel {
    label: String,
    dc: Arc<RTCDataChannel>,
}

#[async_trait]
impl ControlChannel for RtcChannel {
    fn label(&self) -> &str {
        &self.label
    }

    fn is_open(&self) -> bool {
        self.dc.ready_state() == RTCDataChannelState::Open
    }

    async fn send_text(&self, text: String) -> Result<(), BridgeError> {
        self.dc
            .send_text(text)
            .await
            .map(|_| ())
            .map_err(|e| BridgeError::ChannelUnavailable {
                reason: e.to_string(),
            })
    }

    async fn close(&self) -> Result<(), BridgeError> {
        self.dc
            .close()
            .await
            .map_err(|e| BridgeError::ChannelUnavailable {
                reason: e.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use duplex_core::SessionId;
    use tokio::sync::mpsc;

    #[test]
    fn empty_ice_list_yields_host_only_configuration() {
        let backend = RtcBackend::new(Vec::new()).unwrap();
        assert!(backend.configuration().ice_servers.is_empty());
    }

    #[test]
    fn ice_urls_are_grouped_into_one_server() {
        let backend = RtcBackend::new(vec![
            "stun:stun.l.google.com:19302".into(),
            "stun:stun1.l.google.com:19302".into(),
        ])
        .unwrap();
        let config = backend.configuration();
        assert_eq!(config.ice_servers.len(), 1);
        assert_eq!(config.ice_servers[0].urls.len(), 2);
    }

    #[tokio::test]
    async fn offer_contains_audio_and_data_sections() {
        let backend = RtcBackend::new(Vec::new()).unwrap();
        let (tx, _rx) = mpsc::unbounded_channel();
        let peer = backend
            .create_peer(PeerEventSink::new(SessionId::new(), tx))
            .await
            .unwrap();

        let track = crate::audio::SilenceTrack::new();
        peer.add_track(Arc::new(track)).await.unwrap();
        let channel = peer.create_control_channel("oai-events").await.unwrap();
        assert_eq!(channel.label(), "oai-events");
        assert!(!channel.is_open());

        let offer = peer.create_offer().await.unwrap();
        assert!(offer.starts_with("v=0"));
        assert!(offer.contains("m=audio"));
        assert!(offer.contains("m=application"));

        peer.close().await.unwrap();
    }
}
