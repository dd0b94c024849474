//! webrtc-rs transport engine
//!
//! The RTCPeerConnection is created when the first offer arrives, since ICE
//! servers and transport policy come with it.

use super::{
    EngineEvent, EngineEventSink, EngineFactory, EngineSpec, IceConnectionState, RemoteDescription,
    TransportEngine,
};
use crate::error::EngineError;
use crate::signaling::{AudioCodec, OfferConfiguration, Role, VideoCodec};
use async_trait::async_trait;
use log::{debug, info, warn};
use parking_lot::Mutex;
use std::sync::Arc;
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::APIBuilder;
use webrtc::ice_transport::ice_candidate::RTCIceCandidateInit;
use webrtc::ice_transport::ice_connection_state::RTCIceConnectionState;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::policy::ice_transport_policy::RTCIceTransportPolicy;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::signaling_state::RTCSignalingState;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::track::track_local::track_local_static_rtp::TrackLocalStaticRTP;
use webrtc::track::track_local::TrackLocal;

const H264_FMTP: &str = "level-asymmetry-allowed=1;packetization-mode=1;profile-level-id=42e01f";

/// Creates one [`WebRtcEngine`] per session.
#[derive(Debug, Default, Clone, Copy)]
pub struct WebRtcEngineFactory;

impl EngineFactory for WebRtcEngineFactory {
    fn create(
        &self,
        spec: EngineSpec,
        events: EngineEventSink,
    ) -> Result<Arc<dyn TransportEngine>, EngineError> {
        Ok(Arc::new(WebRtcEngine::new(spec, events)))
    }
}

pub struct WebRtcEngine {
    spec: EngineSpec,
    events: EngineEventSink,
    peer_connection: Mutex<Option<Arc<RTCPeerConnection>>>,
    local_tracks: Mutex<Vec<Arc<TrackLocalStaticRTP>>>,
}

impl WebRtcEngine {
    pub fn new(spec: EngineSpec, events: EngineEventSink) -> Self {
        Self {
            spec,
            events,
            peer_connection: Mutex::new(None),
            local_tracks: Mutex::new(Vec::new()),
        }
    }

    fn current(&self) -> Option<Arc<RTCPeerConnection>> {
        self.peer_connection.lock().clone()
    }

    async fn peer_connection(
        &self,
        configuration: Option<&OfferConfiguration>,
    ) -> Result<Arc<RTCPeerConnection>, EngineError> {
        if let Some(pc) = self.current() {
            return Ok(pc);
        }

        let pc = self.create_peer_connection(configuration).await?;
        self.setup_callbacks(&pc);

        let tracks = self.local_tracks.lock().clone();
        for track in tracks {
            pc.add_track(track as Arc<dyn TrackLocal + Send + Sync>)
                .await
                .map_err(|e| EngineError::new(format!("Failed to add track: {}", e)))?;
        }

        *self.peer_connection.lock() = Some(pc.clone());
        Ok(pc)
    }

    async fn create_peer_connection(
        &self,
        configuration: Option<&OfferConfiguration>,
    ) -> Result<Arc<RTCPeerConnection>, EngineError> {
        let mut media_engine = MediaEngine::default();
        media_engine
            .register_default_codecs()
            .map_err(|e| EngineError::new(format!("Failed to register codecs: {}", e)))?;

        let mut registry = Registry::new();
        registry = register_default_interceptors(registry, &mut media_engine)
            .map_err(|e| EngineError::new(format!("Failed to register interceptors: {}", e)))?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        let rtc_config = rtc_configuration(configuration);
        let peer_connection = api
            .new_peer_connection(rtc_config)
            .await
            .map_err(|e| EngineError::new(format!("Failed to create peer connection: {}", e)))?;

        info!("Created {} peer connection", self.spec.role);
        Ok(Arc::new(peer_connection))
    }

    fn setup_callbacks(&self, pc: &Arc<RTCPeerConnection>) {
        let events = self.events.clone();
        pc.on_ice_candidate(Box::new(move |candidate| {
            let events = events.clone();
            Box::pin(async move {
                // None marks the end of gathering
                let Some(candidate) = candidate else { return };
                match candidate.to_json() {
                    Ok(init) => events.send(EngineEvent::IceCandidate(init.candidate)),
                    Err(e) => warn!("Failed to serialize ICE candidate: {}", e),
                }
            })
        }));

        let events = self.events.clone();
        pc.on_ice_connection_state_change(Box::new(move |state| {
            debug!("ICE connection state: {}", state);
            events.send(EngineEvent::IceConnectionState(ice_state(state)));
            Box::pin(async {})
        }));

        let events = self.events.clone();
        pc.on_signaling_state_change(Box::new(move |state| {
            if state == RTCSignalingState::Closed {
                events.send(EngineEvent::SignalingClosed);
            }
            Box::pin(async {})
        }));

        let events = self.events.clone();
        pc.on_track(Box::new(move |track, _receiver, _transceiver| {
            let stream_id = track.stream_id();
            debug!("Remote track {} on stream {}", track.id(), stream_id);
            events.send(EngineEvent::StreamAdded(stream_id));
            Box::pin(async {})
        }));
    }
}

#[async_trait]
impl TransportEngine for WebRtcEngine {
    fn start_capture(&self, stream_id: &str) -> Result<(), EngineError> {
        if self.spec.role != Role::Upstream {
            return Err(EngineError::new("Capture is only available to upstream sessions"));
        }

        let options = &self.spec.options;
        let mut tracks = Vec::new();
        if options.video_enabled {
            tracks.push(video_track(options.video_codec.unwrap_or(VideoCodec::VP8), stream_id));
        }
        if options.audio_enabled {
            tracks.push(audio_track(options.audio_codec.unwrap_or(AudioCodec::Opus), stream_id));
        }
        if tracks.is_empty() {
            return Err(EngineError::new("Neither audio nor video is enabled"));
        }

        info!("Capturing {} local track(s) for stream {}", tracks.len(), stream_id);
        self.local_tracks.lock().extend(tracks.into_iter().map(Arc::new));
        Ok(())
    }

    async fn create_answer(&self, remote: &RemoteDescription) -> Result<String, EngineError> {
        let pc = self.peer_connection(remote.configuration.as_ref()).await?;

        let offer = RTCSessionDescription::offer(remote.sdp.clone())
            .map_err(|e| EngineError::new(format!("Invalid SDP offer: {}", e)))?;
        pc.set_remote_description(offer)
            .await
            .map_err(|e| EngineError::new(format!("Failed to set remote description: {}", e)))?;

        let answer = pc
            .create_answer(None)
            .await
            .map_err(|e| EngineError::new(format!("Failed to create answer: {}", e)))?;
        pc.set_local_description(answer.clone())
            .await
            .map_err(|e| EngineError::new(format!("Failed to set local description: {}", e)))?;

        // Candidates trickle through on_ice_candidate
        match pc.local_description().await {
            Some(local) => Ok(local.sdp),
            None => Ok(answer.sdp),
        }
    }

    async fn add_ice_candidate(&self, candidate: &str) -> Result<(), EngineError> {
        let pc = self
            .current()
            .ok_or_else(|| EngineError::new("Peer connection is not ready"))?;

        let init = RTCIceCandidateInit {
            candidate: candidate.to_string(),
            ..Default::default()
        };
        pc.add_ice_candidate(init)
            .await
            .map_err(|e| EngineError::new(format!("Failed to add ICE candidate: {}", e)))
    }

    async fn close(&self) -> Result<(), EngineError> {
        self.local_tracks.lock().clear();
        let pc = self.peer_connection.lock().take();
        if let Some(pc) = pc {
            pc.close()
                .await
                .map_err(|e| EngineError::new(format!("Failed to close connection: {}", e)))?;
            info!("Closed {} peer connection", self.spec.role);
        }
        Ok(())
    }
}

fn rtc_configuration(configuration: Option<&OfferConfiguration>) -> RTCConfiguration {
    let Some(configuration) = configuration else {
        return RTCConfiguration::default();
    };

    let ice_servers = configuration
        .ice_servers
        .iter()
        .map(|server| RTCIceServer {
            urls: server.urls.clone(),
            username: server.username.clone().unwrap_or_default(),
            credential: server.credential.clone().unwrap_or_default(),
            ..Default::default()
        })
        .collect();

    let ice_transport_policy = configuration
        .ice_transport_policy
        .as_deref()
        .map(RTCIceTransportPolicy::from)
        .unwrap_or_default();

    RTCConfiguration {
        ice_servers,
        ice_transport_policy,
        ..Default::default()
    }
}

fn ice_state(state: RTCIceConnectionState) -> IceConnectionState {
    match state {
        RTCIceConnectionState::Checking => IceConnectionState::Checking,
        RTCIceConnectionState::Connected => IceConnectionState::Connected,
        RTCIceConnectionState::Completed => IceConnectionState::Completed,
        RTCIceConnectionState::Disconnected => IceConnectionState::Disconnected,
        RTCIceConnectionState::Failed => IceConnectionState::Failed,
        RTCIceConnectionState::Closed => IceConnectionState::Closed,
        _ => IceConnectionState::New,
    }
}

fn video_track(codec: VideoCodec, stream_id: &str) -> TrackLocalStaticRTP {
    let fmtp = match codec {
        VideoCodec::H264 => H264_FMTP,
        VideoCodec::VP8 => "",
        VideoCodec::VP9 => "profile-id=0",
    };
    TrackLocalStaticRTP::new(
        RTCRtpCodecCapability {
            mime_type: codec.mime_type().to_string(),
            clock_rate: 90000,
            channels: 0,
            sdp_fmtp_line: fmtp.to_string(),
            rtcp_feedback: vec![],
        },
        format!("video-{}", uuid::Uuid::new_v4()),
        stream_id.to_string(),
    )
}

fn audio_track(codec: AudioCodec, stream_id: &str) -> TrackLocalStaticRTP {
    let (clock_rate, channels, fmtp) = match codec {
        AudioCodec::Opus => (48000, 2, "minptime=10;useinbandfec=1"),
        AudioCodec::Pcmu => (8000, 1, ""),
    };
    TrackLocalStaticRTP::new(
        RTCRtpCodecCapability {
            mime_type: codec.mime_type().to_string(),
            clock_rate,
            channels,
            sdp_fmtp_line: fmtp.to_string(),
            rtcp_feedback: vec![],
        },
        format!("audio-{}", uuid::Uuid::new_v4()),
        stream_id.to_string(),
    )
}
