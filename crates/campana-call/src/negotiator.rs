//! Offer/answer/candidate negotiation for one peer connection.
//!
//! Roles are fixed for the lifetime of a call: the call creator is the
//! offerer, the invited party answers and never emits an offer. At most
//! one offer is outstanding at a time. Candidates received before the
//! remote description is applied are queued and replayed afterwards --
//! the relay gives no ordering guarantee between description and
//! candidate envelopes, so this buffering is required for correctness,
//! not an optimization.

use std::sync::Arc;

use tracing::{debug, info, warn};

use campana_shared::protocol::{CandidatePayload, SdpPayload};
use campana_shared::types::IcePhase;

use crate::media::MediaTrack;
use crate::transport::{CallRole, PeerTransport, RemoteTrack, SdpKind, TransportError};

/// Per-call connection state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NegotiationPhase {
    Idle,
    CapturingMedia,
    Negotiating,
    Connected,
    Reconnecting,
    Closed,
}

/// Result of feeding an ICE phase change into the negotiator.
#[derive(Debug, PartialEq, Eq)]
pub enum IceOutcome {
    Unchanged,
    Phase(NegotiationPhase),
    /// ICE reached `failed`. Surfaced upward as a non-fatal event; the
    /// session controller decides whether to tear down and renegotiate.
    Failed,
}

/// The remote peer's media stream. Created exactly once per negotiated
/// connection, on the first remote track; later tracks from the same
/// negotiation are appended, never replace it.
#[derive(Debug, Default, Clone)]
pub struct RemoteStream {
    tracks: Vec<RemoteTrack>,
}

impl RemoteStream {
    pub fn tracks(&self) -> &[RemoteTrack] {
        &self.tracks
    }
}

pub struct Negotiator {
    role: CallRole,
    transport: Arc<dyn PeerTransport>,
    phase: NegotiationPhase,
    local_tracks: Vec<MediaTrack>,
    remote_stream: Option<RemoteStream>,
    pending_candidates: Vec<CandidatePayload>,
    remote_description_set: bool,
    offer_outstanding: bool,
    closed: bool,
}

impl Negotiator {
    /// Attach the captured local tracks and enter `Negotiating`.
    pub async fn new(
        transport: Arc<dyn PeerTransport>,
        role: CallRole,
        local_tracks: Vec<MediaTrack>,
    ) -> Result<Self, TransportError> {
        for track in &local_tracks {
            transport.add_local_track(track).await?;
        }

        Ok(Self {
            role,
            transport,
            phase: NegotiationPhase::Negotiating,
            local_tracks,
            remote_stream: None,
            pending_candidates: Vec::new(),
            remote_description_set: false,
            offer_outstanding: false,
            closed: false,
        })
    }

    pub fn role(&self) -> CallRole {
        self.role
    }

    pub fn phase(&self) -> NegotiationPhase {
        self.phase
    }

    pub fn transport(&self) -> &Arc<dyn PeerTransport> {
        &self.transport
    }

    pub fn local_tracks(&self) -> &[MediaTrack] {
        &self.local_tracks
    }

    pub fn remote_stream(&self) -> Option<&RemoteStream> {
        self.remote_stream.as_ref()
    }

    /// Create and store the local offer, if this side may offer right
    /// now. Returns `None` when no offer should be emitted: wrong role,
    /// an offer already outstanding, negotiation already answered, or
    /// connection closed. Safe to call again when a peer joins late.
    pub async fn start_offer(&mut self) -> Result<Option<SdpPayload>, TransportError> {
        if self.role != CallRole::Offerer {
            warn!("Answerer asked to emit an offer, refusing");
            return Ok(None);
        }
        if self.closed || self.offer_outstanding || self.remote_description_set {
            return Ok(None);
        }

        let offer = self.transport.create_offer().await?;
        self.transport
            .set_local_description(SdpKind::Offer, offer.clone())
            .await?;
        self.offer_outstanding = true;

        debug!("Local offer created");
        Ok(Some(offer))
    }

    /// Apply a remote offer and produce the answer. This is the only
    /// point at which the answerer emits a description.
    pub async fn handle_offer(
        &mut self,
        offer: SdpPayload,
    ) -> Result<Option<SdpPayload>, TransportError> {
        if self.role != CallRole::Answerer {
            warn!("Offerer received an offer, ignoring");
            return Ok(None);
        }
        if self.closed {
            return Ok(None);
        }

        self.transport
            .set_remote_description(SdpKind::Offer, offer)
            .await?;
        self.remote_description_set = true;
        self.flush_pending_candidates().await;

        let answer = self.transport.create_answer().await?;
        self.transport
            .set_local_description(SdpKind::Answer, answer.clone())
            .await?;

        debug!("Remote offer applied, local answer created");
        Ok(Some(answer))
    }

    /// Apply the remote answer to our outstanding offer.
    pub async fn handle_answer(&mut self, answer: SdpPayload) -> Result<(), TransportError> {
        if self.role != CallRole::Offerer {
            warn!("Answerer received an answer, ignoring");
            return Ok(());
        }
        if self.closed || !self.offer_outstanding {
            warn!("Answer without an outstanding offer, ignoring");
            return Ok(());
        }

        self.transport
            .set_remote_description(SdpKind::Answer, answer)
            .await?;
        self.offer_outstanding = false;
        self.remote_description_set = true;
        self.flush_pending_candidates().await;

        debug!("Remote answer applied");
        Ok(())
    }

    /// Apply a remote candidate, or queue it until the remote
    /// description lands.
    pub async fn handle_candidate(&mut self, candidate: CandidatePayload) {
        if self.closed {
            return;
        }
        if !self.remote_description_set {
            debug!("Queueing candidate ahead of remote description");
            self.pending_candidates.push(candidate);
            return;
        }

        match self.transport.add_ice_candidate(candidate.clone()).await {
            Ok(()) => {}
            Err(TransportError::NoRemoteDescription) => {
                debug!("Transport not ready for candidate, re-queueing");
                self.pending_candidates.push(candidate);
            }
            Err(e) => warn!(error = %e, "Failed to add remote candidate"),
        }
    }

    async fn flush_pending_candidates(&mut self) {
        if self.pending_candidates.is_empty() {
            return;
        }

        let pending = std::mem::take(&mut self.pending_candidates);
        let total = pending.len();
        for candidate in pending {
            match self.transport.add_ice_candidate(candidate.clone()).await {
                Ok(()) => {}
                Err(TransportError::NoRemoteDescription) => {
                    self.pending_candidates.push(candidate);
                }
                Err(e) => warn!(error = %e, "Failed to apply buffered candidate"),
            }
        }

        debug!(
            total,
            requeued = self.pending_candidates.len(),
            "Applied buffered candidates"
        );
    }

    /// Record an arriving remote track. Returns `true` when this was the
    /// first track, i.e. the transition into `Connected`.
    pub fn on_remote_track(&mut self, track: RemoteTrack) -> bool {
        match &mut self.remote_stream {
            Some(stream) => {
                stream.tracks.push(track);
                false
            }
            None => {
                self.remote_stream = Some(RemoteStream {
                    tracks: vec![track],
                });
                self.phase = NegotiationPhase::Connected;
                info!("First remote track arrived, connection established");
                true
            }
        }
    }

    /// Feed an ICE connectivity phase change from the transport.
    pub fn on_ice_phase(&mut self, ice: IcePhase) -> IceOutcome {
        match ice {
            IcePhase::Failed => IceOutcome::Failed,
            IcePhase::Disconnected if self.phase == NegotiationPhase::Connected => {
                self.phase = NegotiationPhase::Reconnecting;
                IceOutcome::Phase(self.phase)
            }
            IcePhase::Connected if self.phase == NegotiationPhase::Reconnecting => {
                self.phase = NegotiationPhase::Connected;
                IceOutcome::Phase(self.phase)
            }
            _ => IceOutcome::Unchanged,
        }
    }

    /// Stop local capture and close the connection. Idempotent.
    pub async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.phase = NegotiationPhase::Closed;

        for track in &self.local_tracks {
            track.stop();
        }
        self.transport.close().await;
        info!("Peer connection closed");
    }
}
