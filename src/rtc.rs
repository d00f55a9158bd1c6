//! Production transport on the `webrtc` crate.
//!
//! Implements the [`crate::transport`] seams with a real peer connection:
//! an Opus local track, a negotiated data channel for the structured-event
//! stream, and an offer that waits for ICE gathering to complete so the
//! remote endpoint receives a self-contained session description.
//!
//! Audio capture and encoding are the embedder's concern: the embedder
//! feeds encoded samples through [`RtcAudioTrack::write_sample`], which
//! honors the mute flag.

use crate::error::SessionError;
use crate::transport::{
    AudioTrack, EventChannel, MessageHandler, OpenHandler, PeerTransport, RemoteTrackHandler,
    RemoteTrackInfo, TransportFactory,
};
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{debug, info};
use webrtc::api::APIBuilder;
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::{MIME_TYPE_OPUS, MediaEngine};
use webrtc::data_channel::RTCDataChannel;
use webrtc::data_channel::data_channel_state::RTCDataChannelState;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::media::Sample;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;

fn rtc_err(e: webrtc::Error) -> SessionError {
    SessionError::Negotiation(anyhow::anyhow!(e))
}

/// ICE configuration for the peer connection.
#[derive(Debug, Clone)]
pub struct RtcConfig {
    /// ICE servers for NAT traversal.
    pub ice_servers: Vec<String>,
}

impl Default for RtcConfig {
    fn default() -> Self {
        Self {
            ice_servers: vec![
                "stun:stun.l.google.com:19302".to_string(),
                "stun:stun1.l.google.com:19302".to_string(),
            ],
        }
    }
}

/// The local Opus track attached to the peer connection.
///
/// `set_enabled(false)` is a soft mute: the track stays attached but
/// [`write_sample`](Self::write_sample) drops media until re-enabled.
/// `stop` releases the track for good.
pub struct RtcAudioTrack {
    inner: Arc<TrackLocalStaticSample>,
    enabled: AtomicBool,
    stopped: AtomicBool,
}

impl RtcAudioTrack {
    fn new() -> Self {
        let inner = Arc::new(TrackLocalStaticSample::new(
            RTCRtpCodecCapability {
                mime_type: MIME_TYPE_OPUS.to_string(),
                clock_rate: 48000,
                channels: 2,
                ..Default::default()
            },
            "audio".to_string(),
            "vocalis-mic".to_string(),
        ));
        Self {
            inner,
            enabled: AtomicBool::new(true),
            stopped: AtomicBool::new(false),
        }
    }

    /// Writes one encoded audio sample to the wire. Dropped silently while
    /// the track is muted or after it has been stopped.
    pub async fn write_sample(&self, data: Bytes, duration: Duration) -> anyhow::Result<()> {
        if self.stopped.load(Ordering::SeqCst) || !self.enabled.load(Ordering::SeqCst) {
            return Ok(());
        }
        self.inner
            .write_sample(&Sample {
                data,
                duration,
                ..Default::default()
            })
            .await?;
        Ok(())
    }
}

impl AudioTrack for RtcAudioTrack {
    fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
    }

    fn enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }

    fn stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
}

/// The structured-event data channel.
pub struct RtcEventChannel {
    inner: Arc<RTCDataChannel>,
}

#[async_trait]
impl EventChannel for RtcEventChannel {
    fn is_open(&self) -> bool {
        self.inner.ready_state() == RTCDataChannelState::Open
    }

    fn on_open(&self, handler: OpenHandler) {
        self.inner.on_open(Box::new(move || {
            handler();
            Box::pin(async {})
        }));
    }

    fn on_message(&self, handler: MessageHandler) {
        self.inner.on_message(Box::new(move |msg| {
            let raw = String::from_utf8_lossy(&msg.data).to_string();
            handler(raw);
            Box::pin(async {})
        }));
    }

    async fn send_text(&self, payload: String) -> anyhow::Result<()> {
        self.inner.send_text(payload).await?;
        Ok(())
    }

    async fn close(&self) -> anyhow::Result<()> {
        if self.inner.ready_state() == RTCDataChannelState::Closed {
            return Ok(());
        }
        self.inner.close().await?;
        Ok(())
    }
}

/// One peer connection with the local track attached.
pub struct RtcTransport {
    pc: Arc<RTCPeerConnection>,
}

#[async_trait]
impl PeerTransport for RtcTransport {
    async fn create_event_channel(
        &self,
        label: &str,
    ) -> Result<Arc<dyn EventChannel>, SessionError> {
        let dc = self
            .pc
            .create_data_channel(label, None)
            .await
            .map_err(rtc_err)?;
        debug!(label = %label, "event data channel created");
        Ok(Arc::new(RtcEventChannel { inner: dc }))
    }

    fn on_remote_track(&self, handler: RemoteTrackHandler) {
        self.pc.on_track(Box::new(move |track, _receiver, _transceiver| {
            let info = RemoteTrackInfo {
                kind: track.kind().to_string(),
                codec: track.codec().capability.mime_type.clone(),
            };
            handler(info);
            Box::pin(async {})
        }));
    }

    async fn create_offer(&self) -> Result<String, SessionError> {
        let offer = self.pc.create_offer(None).await.map_err(rtc_err)?;

        // Wait for ICE gathering so the offer carries every candidate;
        // the remote endpoint performs no trickle signaling.
        let mut gather_complete = self.pc.gathering_complete_promise().await;
        self.pc.set_local_description(offer).await.map_err(rtc_err)?;
        let _ = gather_complete.recv().await;

        let local = self.pc.local_description().await.ok_or_else(|| {
            SessionError::Negotiation(anyhow::anyhow!(
                "local description missing after ICE gathering"
            ))
        })?;
        Ok(local.sdp)
    }

    async fn apply_answer(&self, sdp: &str) -> Result<(), SessionError> {
        let answer = RTCSessionDescription::answer(sdp.to_string()).map_err(rtc_err)?;
        self.pc.set_remote_description(answer).await.map_err(rtc_err)
    }

    async fn close(&self) -> Result<(), SessionError> {
        self.pc.close().await.map_err(rtc_err)
    }
}

/// Builds real tracks and peer connections.
#[derive(Default)]
pub struct RtcFactory {
    config: RtcConfig,
}

impl RtcFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: RtcConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl TransportFactory for RtcFactory {
    type Track = RtcAudioTrack;
    type Transport = RtcTransport;

    async fn acquire_audio(&self) -> Result<Arc<RtcAudioTrack>, SessionError> {
        Ok(Arc::new(RtcAudioTrack::new()))
    }

    async fn create(
        &self,
        track: Arc<RtcAudioTrack>,
    ) -> Result<Arc<RtcTransport>, SessionError> {
        let mut media_engine = MediaEngine::default();
        media_engine.register_default_codecs().map_err(rtc_err)?;

        let mut registry = Registry::new();
        registry =
            register_default_interceptors(registry, &mut media_engine).map_err(rtc_err)?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        let ice_servers = self
            .config
            .ice_servers
            .iter()
            .map(|url| RTCIceServer {
                urls: vec![url.clone()],
                ..Default::default()
            })
            .collect();
        let rtc_config = RTCConfiguration {
            ice_servers,
            ..Default::default()
        };

        let pc = Arc::new(api.new_peer_connection(rtc_config).await.map_err(rtc_err)?);

        pc.on_peer_connection_state_change(Box::new(move |state| {
            info!(state = ?state, "peer connection state changed");
            Box::pin(async {})
        }));
        pc.on_ice_connection_state_change(Box::new(move |state| {
            debug!(ice_state = ?state, "ICE connection state changed");
            Box::pin(async {})
        }));

        pc.add_track(track.inner.clone() as Arc<dyn TrackLocal + Send + Sync>)
            .await
            .map_err(|e| SessionError::MediaAccess(e.to_string()))?;

        Ok(Arc::new(RtcTransport { pc }))
    }
}
