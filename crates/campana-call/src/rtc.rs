//! webrtc-rs implementation of the peer-connection seam.
//!
//! Platform callbacks (candidate discovery, ICE state, arriving tracks,
//! data-channel traffic) are bridged onto the transport event stream so
//! the session loop stays the single place where call state changes.
//!
//! Local media is carried on [`TrackLocalStaticSample`] tracks; the
//! embedding shell obtains the sample sink via [`RtcPeerTransport::sample_track`]
//! and pumps encoded frames into it (writing silence/blank frames while
//! the corresponding [`MediaTrack`] is disabled).

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, warn};

use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::{MediaEngine, MIME_TYPE_OPUS, MIME_TYPE_VP8};
use webrtc::api::APIBuilder;
use webrtc::data_channel::data_channel_init::RTCDataChannelInit;
use webrtc::data_channel::data_channel_message::DataChannelMessage;
use webrtc::data_channel::RTCDataChannel;
use webrtc::ice_transport::ice_candidate::RTCIceCandidateInit;
use webrtc::ice_transport::ice_connection_state::RTCIceConnectionState;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::{RTCRtpCodecCapability, RTPCodecType};
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_local::TrackLocal;

use campana_shared::protocol::{CandidatePayload, SdpPayload};
use campana_shared::types::{IcePhase, TrackKind};

use crate::config::IceConfig;
use crate::media::MediaTrack;
use crate::transport::{
    CallRole, DataMessage, PeerTransport, PeerTransportFactory, RemoteTrack, SdpKind,
    TransportError, TransportEvent, TransportEvents,
};

const DATA_CHANNEL_LABEL: &str = "campana-data";

/// Builds one webrtc-rs peer connection per call.
pub struct RtcTransportFactory;

#[async_trait]
impl PeerTransportFactory for RtcTransportFactory {
    async fn create(
        &self,
        ice: &IceConfig,
        role: CallRole,
    ) -> Result<(Arc<dyn PeerTransport>, TransportEvents), TransportError> {
        let (transport, events) = RtcPeerTransport::connect(ice, role).await?;
        Ok((transport as Arc<dyn PeerTransport>, events))
    }
}

pub struct RtcPeerTransport {
    pc: Arc<RTCPeerConnection>,
    data_channel: Arc<Mutex<Option<Arc<RTCDataChannel>>>>,
    /// Local sample tracks by `MediaTrack` id, so a camera track can be
    /// restored on the same sender after a screen share.
    sample_tracks: Mutex<HashMap<String, Arc<TrackLocalStaticSample>>>,
    closed: AtomicBool,
}

impl RtcPeerTransport {
    pub async fn connect(
        ice: &IceConfig,
        role: CallRole,
    ) -> Result<(Arc<Self>, TransportEvents), TransportError> {
        let mut media_engine = MediaEngine::default();
        media_engine.register_default_codecs().map_err(backend)?;
        let mut registry = Registry::new();
        registry = register_default_interceptors(registry, &mut media_engine).map_err(backend)?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        let config = RTCConfiguration {
            ice_servers: ice_servers(ice),
            ..Default::default()
        };
        let pc = Arc::new(api.new_peer_connection(config).await.map_err(backend)?);

        let (events_tx, events_rx) = mpsc::unbounded_channel::<TransportEvent>();

        // Discovered candidates are relayed immediately; `None` marks the
        // end of gathering.
        let tx = events_tx.clone();
        pc.on_ice_candidate(Box::new(move |candidate| {
            let tx = tx.clone();
            Box::pin(async move {
                let Some(candidate) = candidate else {
                    debug!("ICE gathering complete");
                    return;
                };
                match candidate.to_json() {
                    Ok(init) => {
                        let _ = tx.send(TransportEvent::LocalCandidate(CandidatePayload {
                            candidate: init.candidate,
                            sdp_mid: init.sdp_mid,
                            sdp_mline_index: init.sdp_mline_index,
                        }));
                    }
                    Err(e) => warn!(error = %e, "Failed to serialize local candidate"),
                }
            })
        }));

        let tx = events_tx.clone();
        pc.on_ice_connection_state_change(Box::new(move |state: RTCIceConnectionState| {
            let tx = tx.clone();
            Box::pin(async move {
                debug!(state = ?state, "ICE connection state changed");
                if let Some(phase) = ice_phase(state) {
                    let _ = tx.send(TransportEvent::IcePhase(phase));
                }
            })
        }));

        let tx = events_tx.clone();
        pc.on_track(Box::new(move |track, _receiver, _transceiver| {
            let tx = tx.clone();
            Box::pin(async move {
                let kind = if track.kind() == RTPCodecType::Video {
                    TrackKind::Video
                } else {
                    TrackKind::Audio
                };
                let _ = tx.send(TransportEvent::RemoteTrack(RemoteTrack {
                    id: track.id(),
                    kind,
                }));
            })
        }));

        // The offerer opens the reliable-ordered data channel; the
        // answerer receives it alongside the media.
        let data_channel = Arc::new(Mutex::new(None::<Arc<RTCDataChannel>>));
        match role {
            CallRole::Offerer => {
                let init = RTCDataChannelInit {
                    ordered: Some(true),
                    ..Default::default()
                };
                let dc = pc
                    .create_data_channel(DATA_CHANNEL_LABEL, Some(init))
                    .await
                    .map_err(backend)?;
                wire_data_channel(&dc, &events_tx);
                *data_channel.lock().await = Some(dc);
            }
            CallRole::Answerer => {
                let slot = data_channel.clone();
                let tx = events_tx.clone();
                pc.on_data_channel(Box::new(move |dc: Arc<RTCDataChannel>| {
                    let slot = slot.clone();
                    let tx = tx.clone();
                    Box::pin(async move {
                        debug!(label = %dc.label(), "Data channel received");
                        wire_data_channel(&dc, &tx);
                        *slot.lock().await = Some(dc);
                    })
                }));
            }
        }

        let transport = Arc::new(Self {
            pc,
            data_channel,
            sample_tracks: Mutex::new(HashMap::new()),
            closed: AtomicBool::new(false),
        });
        Ok((transport, events_rx))
    }

    /// The sample sink backing a local track. The capture pump writes
    /// encoded frames here; it is not part of the call engine.
    pub async fn sample_track(&self, track_id: &str) -> Option<Arc<TrackLocalStaticSample>> {
        self.sample_tracks.lock().await.get(track_id).cloned()
    }

    async fn sample_track_for(&self, track: &MediaTrack) -> Arc<TrackLocalStaticSample> {
        let mut tracks = self.sample_tracks.lock().await;
        tracks
            .entry(track.id().to_string())
            .or_insert_with(|| {
                Arc::new(TrackLocalStaticSample::new(
                    codec_for(track.kind()),
                    track.id().to_string(),
                    "campana".to_string(),
                ))
            })
            .clone()
    }
}

#[async_trait]
impl PeerTransport for RtcPeerTransport {
    async fn create_offer(&self) -> Result<SdpPayload, TransportError> {
        let offer = self.pc.create_offer(None).await.map_err(backend)?;
        Ok(SdpPayload { sdp: offer.sdp })
    }

    async fn create_answer(&self) -> Result<SdpPayload, TransportError> {
        let answer = self.pc.create_answer(None).await.map_err(backend)?;
        Ok(SdpPayload { sdp: answer.sdp })
    }

    async fn set_local_description(
        &self,
        kind: SdpKind,
        sdp: SdpPayload,
    ) -> Result<(), TransportError> {
        let description = session_description(kind, sdp.sdp)?;
        self.pc
            .set_local_description(description)
            .await
            .map_err(backend)
    }

    async fn set_remote_description(
        &self,
        kind: SdpKind,
        sdp: SdpPayload,
    ) -> Result<(), TransportError> {
        let description = session_description(kind, sdp.sdp)?;
        self.pc
            .set_remote_description(description)
            .await
            .map_err(backend)
    }

    async fn add_ice_candidate(&self, candidate: CandidatePayload) -> Result<(), TransportError> {
        // webrtc-rs rejects candidates ahead of the remote description;
        // surface that as the typed error the negotiator queues on.
        if self.pc.remote_description().await.is_none() {
            return Err(TransportError::NoRemoteDescription);
        }

        let init = RTCIceCandidateInit {
            candidate: candidate.candidate,
            sdp_mid: candidate.sdp_mid,
            sdp_mline_index: candidate.sdp_mline_index,
            ..Default::default()
        };
        self.pc.add_ice_candidate(init).await.map_err(backend)
    }

    async fn add_local_track(&self, track: &MediaTrack) -> Result<(), TransportError> {
        let sample = self.sample_track_for(track).await;
        self.pc
            .add_track(sample as Arc<dyn TrackLocal + Send + Sync>)
            .await
            .map_err(backend)?;
        debug!(track = %track.id(), kind = ?track.kind(), "Local track attached");
        Ok(())
    }

    async fn replace_video_track(&self, track: &MediaTrack) -> Result<(), TransportError> {
        for sender in self.pc.get_senders().await {
            let is_video = match sender.track().await {
                Some(current) => current.kind() == RTPCodecType::Video,
                None => false,
            };
            if !is_video {
                continue;
            }

            let sample = self.sample_track_for(track).await;
            sender
                .replace_track(Some(sample as Arc<dyn TrackLocal + Send + Sync>))
                .await
                .map_err(backend)?;
            debug!(track = %track.id(), "Outgoing video track replaced in place");
            return Ok(());
        }

        Err(TransportError::NoVideoSender)
    }

    async fn send_data(&self, message: DataMessage) -> Result<(), TransportError> {
        let channel = self.data_channel.lock().await.clone();
        let Some(channel) = channel else {
            return Err(TransportError::DataChannelClosed);
        };

        match message {
            DataMessage::Text(text) => channel.send_text(text).await.map_err(backend)?,
            DataMessage::Binary(bytes) => channel.send(&bytes).await.map_err(backend)?,
        };
        Ok(())
    }

    async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Err(e) = self.pc.close().await {
            debug!(error = %e, "Peer connection close reported an error");
        }
    }
}

fn wire_data_channel(dc: &Arc<RTCDataChannel>, events_tx: &mpsc::UnboundedSender<TransportEvent>) {
    let tx = events_tx.clone();
    dc.on_open(Box::new(move || {
        let tx = tx.clone();
        Box::pin(async move {
            let _ = tx.send(TransportEvent::DataChannelOpen);
        })
    }));

    let tx = events_tx.clone();
    dc.on_message(Box::new(move |msg: DataChannelMessage| {
        let tx = tx.clone();
        Box::pin(async move {
            let event = if msg.is_string {
                match String::from_utf8(msg.data.to_vec()) {
                    Ok(text) => TransportEvent::Data(DataMessage::Text(text)),
                    Err(_) => {
                        warn!("Dropping non-UTF-8 text frame");
                        return;
                    }
                }
            } else {
                TransportEvent::Data(DataMessage::Binary(msg.data))
            };
            let _ = tx.send(event);
        })
    }));
}

fn backend<E: std::fmt::Display>(err: E) -> TransportError {
    TransportError::Backend(err.to_string())
}

fn session_description(
    kind: SdpKind,
    sdp: String,
) -> Result<RTCSessionDescription, TransportError> {
    match kind {
        SdpKind::Offer => RTCSessionDescription::offer(sdp).map_err(backend),
        SdpKind::Answer => RTCSessionDescription::answer(sdp).map_err(backend),
    }
}

fn ice_servers(ice: &IceConfig) -> Vec<RTCIceServer> {
    let mut servers = vec![RTCIceServer {
        urls: ice.stun_urls.clone(),
        ..Default::default()
    }];
    if let Some(turn) = &ice.turn {
        servers.push(RTCIceServer {
            urls: vec![turn.url.clone()],
            username: turn.username.clone(),
            credential: turn.credential.clone(),
            ..Default::default()
        });
    }
    servers
}

fn ice_phase(state: RTCIceConnectionState) -> Option<IcePhase> {
    match state {
        RTCIceConnectionState::New => Some(IcePhase::New),
        RTCIceConnectionState::Checking => Some(IcePhase::Checking),
        RTCIceConnectionState::Connected | RTCIceConnectionState::Completed => {
            Some(IcePhase::Connected)
        }
        RTCIceConnectionState::Disconnected => Some(IcePhase::Disconnected),
        RTCIceConnectionState::Failed => Some(IcePhase::Failed),
        RTCIceConnectionState::Closed => Some(IcePhase::Closed),
        _ => None,
    }
}

fn codec_for(kind: TrackKind) -> RTCRtpCodecCapability {
    let mime_type = match kind {
        TrackKind::Audio => MIME_TYPE_OPUS,
        TrackKind::Video => MIME_TYPE_VP8,
    };
    RTCRtpCodecCapability {
        mime_type: mime_type.to_string(),
        ..Default::default()
    }
}
