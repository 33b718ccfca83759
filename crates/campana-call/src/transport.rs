//! The underlying peer-connection platform, as a seam.
//!
//! Everything above this trait is protocol and state-machine logic; the
//! production implementation in [`crate::rtc`] wraps webrtc-rs. Platform
//! events (discovered candidates, arriving remote tracks, ICE phase
//! changes, data-channel traffic) are delivered as messages on a single
//! event stream, so all call state is mutated from one event loop.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;
use tokio::sync::mpsc;

use campana_shared::protocol::{CandidatePayload, SdpPayload};
use campana_shared::types::{IcePhase, TrackKind};

use crate::config::IceConfig;
use crate::media::MediaTrack;

#[derive(Error, Debug)]
pub enum TransportError {
    /// `add_ice_candidate` before the remote description is applied.
    /// Callers queue the candidate and retry; see the negotiator.
    #[error("Remote description not set")]
    NoRemoteDescription,

    #[error("Data channel not open")]
    DataChannelClosed,

    #[error("No outgoing video sender")]
    NoVideoSender,

    #[error("Transport closed")]
    Closed,

    #[error("Transport error: {0}")]
    Backend(String),
}

/// Which side of the fixed-role exchange this connection plays. The call
/// creator is always the offerer; glare is avoided by never switching.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallRole {
    Offerer,
    Answerer,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SdpKind {
    Offer,
    Answer,
}

/// One media track arriving from the remote peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteTrack {
    pub id: String,
    pub kind: TrackKind,
}

#[derive(Debug, Clone)]
pub enum DataMessage {
    Text(String),
    Binary(Bytes),
}

#[derive(Debug)]
pub enum TransportEvent {
    /// A local network candidate was discovered; relay it immediately.
    LocalCandidate(CandidatePayload),
    /// A remote media track arrived.
    RemoteTrack(RemoteTrack),
    /// The ICE connectivity phase changed.
    IcePhase(IcePhase),
    /// The reliable-ordered data channel is open in both directions.
    DataChannelOpen,
    /// An inbound data-channel frame.
    Data(DataMessage),
}

pub type TransportEvents = mpsc::UnboundedReceiver<TransportEvent>;

#[async_trait]
pub trait PeerTransport: Send + Sync {
    async fn create_offer(&self) -> Result<SdpPayload, TransportError>;
    async fn create_answer(&self) -> Result<SdpPayload, TransportError>;
    async fn set_local_description(
        &self,
        kind: SdpKind,
        sdp: SdpPayload,
    ) -> Result<(), TransportError>;
    async fn set_remote_description(
        &self,
        kind: SdpKind,
        sdp: SdpPayload,
    ) -> Result<(), TransportError>;

    /// Apply a remote candidate. Fails with
    /// [`TransportError::NoRemoteDescription`] until the remote
    /// description is applied.
    async fn add_ice_candidate(&self, candidate: CandidatePayload) -> Result<(), TransportError>;

    /// Attach a local capture track before negotiation.
    async fn add_local_track(&self, track: &MediaTrack) -> Result<(), TransportError>;

    /// In-place replacement of the outgoing video track on the existing
    /// sender. No renegotiation: the sender/receiver pairing is
    /// unchanged, only the content changes.
    async fn replace_video_track(&self, track: &MediaTrack) -> Result<(), TransportError>;

    async fn send_data(&self, message: DataMessage) -> Result<(), TransportError>;

    /// Close the connection and release its resources. Idempotent.
    async fn close(&self);
}

#[async_trait]
pub trait PeerTransportFactory: Send + Sync {
    async fn create(
        &self,
        ice: &IceConfig,
        role: CallRole,
    ) -> Result<(Arc<dyn PeerTransport>, TransportEvents), TransportError>;
}
