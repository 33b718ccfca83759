//! In-memory doubles for the transport and signaling seams, shared by
//! the unit tests in this crate.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};

use async_trait::async_trait;
use tokio::sync::mpsc;

use campana_shared::protocol::{CandidatePayload, ClientEvent, SdpPayload, ServerEvent, SignalKind};
use campana_shared::types::{CallId, IcePhase, ParticipantId, TrackKind};

use crate::config::IceConfig;
use crate::media::MediaTrack;
use crate::signaling::{SignalingConnection, SignalingError, SignalingEvent, SignalingEvents};
use crate::transport::{
    CallRole, DataMessage, PeerTransport, PeerTransportFactory, RemoteTrack, SdpKind,
    TransportError, TransportEvent, TransportEvents,
};

// ---------------------------------------------------------------------------
// Mock peer transport
// ---------------------------------------------------------------------------

#[derive(Default)]
struct MockInner {
    local_description: Option<(SdpKind, String)>,
    remote_description: Option<(SdpKind, String)>,
    applied_candidates: Vec<CandidatePayload>,
    offers_created: usize,
    answers_created: usize,
    local_tracks: Vec<MediaTrack>,
    video_track_id: Option<String>,
    replace_calls: usize,
    sent: Vec<DataMessage>,
    close_calls: usize,
    closed: bool,
    connected_fired: bool,
}

/// Scripted in-memory peer transport. Two instances can be linked into a
/// pair: once a side has both descriptions applied it reports
/// connectivity and delivers its local tracks to the peer as remote
/// tracks; data frames are forwarded to the peer's event stream.
pub(crate) struct MockTransport {
    inner: Mutex<MockInner>,
    events_tx: mpsc::UnboundedSender<TransportEvent>,
    peer: Mutex<Option<Weak<MockTransport>>>,
}

impl MockTransport {
    pub fn create() -> (Arc<Self>, TransportEvents) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let transport = Arc::new(Self {
            inner: Mutex::new(MockInner::default()),
            events_tx,
            peer: Mutex::new(None),
        });
        (transport, events_rx)
    }

    /// Create two linked transports, as if one peer connection on each
    /// side of a call.
    pub fn pair() -> ((Arc<Self>, TransportEvents), (Arc<Self>, TransportEvents)) {
        let (a, a_events) = Self::create();
        let (b, b_events) = Self::create();
        *a.peer.lock().unwrap() = Some(Arc::downgrade(&b));
        *b.peer.lock().unwrap() = Some(Arc::downgrade(&a));
        ((a, a_events), (b, b_events))
    }

    pub fn emit(&self, event: TransportEvent) {
        let _ = self.events_tx.send(event);
    }

    pub fn offers_created(&self) -> usize {
        self.inner.lock().unwrap().offers_created
    }

    pub fn answers_created(&self) -> usize {
        self.inner.lock().unwrap().answers_created
    }

    pub fn applied_candidates(&self) -> Vec<CandidatePayload> {
        self.inner.lock().unwrap().applied_candidates.clone()
    }

    pub fn video_track_id(&self) -> Option<String> {
        self.inner.lock().unwrap().video_track_id.clone()
    }

    pub fn replace_calls(&self) -> usize {
        self.inner.lock().unwrap().replace_calls
    }

    pub fn close_calls(&self) -> usize {
        self.inner.lock().unwrap().close_calls
    }

    pub fn sent_frames(&self) -> Vec<DataMessage> {
        self.inner.lock().unwrap().sent.clone()
    }

    fn peer(&self) -> Option<Arc<MockTransport>> {
        self.peer.lock().unwrap().as_ref().and_then(Weak::upgrade)
    }

    /// Fire connectivity once both descriptions are in place.
    fn maybe_connect(&self) {
        let tracks: Vec<MediaTrack> = {
            let mut inner = self.inner.lock().unwrap();
            if inner.connected_fired
                || inner.local_description.is_none()
                || inner.remote_description.is_none()
            {
                return;
            }
            inner.connected_fired = true;
            inner.local_tracks.clone()
        };

        self.emit(TransportEvent::IcePhase(IcePhase::Checking));
        self.emit(TransportEvent::IcePhase(IcePhase::Connected));
        self.emit(TransportEvent::DataChannelOpen);

        if let Some(peer) = self.peer() {
            for track in tracks {
                peer.emit(TransportEvent::RemoteTrack(RemoteTrack {
                    id: track.id().to_string(),
                    kind: track.kind(),
                }));
            }
        }
    }
}

#[async_trait]
impl PeerTransport for MockTransport {
    async fn create_offer(&self) -> Result<SdpPayload, TransportError> {
        let mut inner = self.inner.lock().unwrap();
        inner.offers_created += 1;
        Ok(SdpPayload {
            sdp: format!("offer-{}", inner.offers_created),
        })
    }

    async fn create_answer(&self) -> Result<SdpPayload, TransportError> {
        let mut inner = self.inner.lock().unwrap();
        if inner.remote_description.is_none() {
            return Err(TransportError::Backend("no remote offer".to_string()));
        }
        inner.answers_created += 1;
        Ok(SdpPayload {
            sdp: format!("answer-{}", inner.answers_created),
        })
    }

    async fn set_local_description(
        &self,
        kind: SdpKind,
        sdp: SdpPayload,
    ) -> Result<(), TransportError> {
        self.inner.lock().unwrap().local_description = Some((kind, sdp.sdp));
        self.maybe_connect();
        Ok(())
    }

    async fn set_remote_description(
        &self,
        kind: SdpKind,
        sdp: SdpPayload,
    ) -> Result<(), TransportError> {
        self.inner.lock().unwrap().remote_description = Some((kind, sdp.sdp));
        self.maybe_connect();
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: CandidatePayload) -> Result<(), TransportError> {
        let mut inner = self.inner.lock().unwrap();
        if inner.remote_description.is_none() {
            return Err(TransportError::NoRemoteDescription);
        }
        inner.applied_candidates.push(candidate);
        Ok(())
    }

    async fn add_local_track(&self, track: &MediaTrack) -> Result<(), TransportError> {
        let mut inner = self.inner.lock().unwrap();
        if track.kind() == TrackKind::Video && inner.video_track_id.is_none() {
            inner.video_track_id = Some(track.id().to_string());
        }
        inner.local_tracks.push(track.clone());
        Ok(())
    }

    async fn replace_video_track(&self, track: &MediaTrack) -> Result<(), TransportError> {
        let mut inner = self.inner.lock().unwrap();
        if inner.video_track_id.is_none() {
            return Err(TransportError::NoVideoSender);
        }
        inner.video_track_id = Some(track.id().to_string());
        inner.replace_calls += 1;
        Ok(())
    }

    async fn send_data(&self, message: DataMessage) -> Result<(), TransportError> {
        {
            let mut inner = self.inner.lock().unwrap();
            if inner.closed {
                return Err(TransportError::Closed);
            }
            inner.sent.push(message.clone());
        }
        if let Some(peer) = self.peer() {
            peer.emit(TransportEvent::Data(message));
        }
        Ok(())
    }

    async fn close(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.close_calls += 1;
        inner.closed = true;
    }
}

/// Hands out one prepared transport; panics if asked twice.
pub(crate) struct MockTransportFactory {
    slot: Mutex<Option<(Arc<MockTransport>, TransportEvents)>>,
}

impl MockTransportFactory {
    pub fn new(transport: Arc<MockTransport>, events: TransportEvents) -> Self {
        Self {
            slot: Mutex::new(Some((transport, events))),
        }
    }
}

#[async_trait]
impl PeerTransportFactory for MockTransportFactory {
    async fn create(
        &self,
        _ice: &IceConfig,
        _role: CallRole,
    ) -> Result<(Arc<dyn PeerTransport>, TransportEvents), TransportError> {
        let (transport, events) = self
            .slot
            .lock()
            .unwrap()
            .take()
            .expect("mock factory already consumed");
        Ok((transport, events))
    }
}

// ---------------------------------------------------------------------------
// In-memory signaling hub
// ---------------------------------------------------------------------------

/// Loopback stand-in for the relay: per-call membership and envelope
/// forwarding with the same observable contract, plus a log of every
/// client event for protocol assertions.
pub(crate) struct SignalingHub {
    rooms: Mutex<HashMap<CallId, HashMap<ParticipantId, mpsc::Sender<SignalingEvent>>>>,
    log: Mutex<Vec<(ParticipantId, ClientEvent)>>,
}

impl SignalingHub {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            rooms: Mutex::new(HashMap::new()),
            log: Mutex::new(Vec::new()),
        })
    }

    pub fn connect(self: &Arc<Self>, name: &str) -> (Arc<HubConnection>, SignalingEvents) {
        let (tx, rx) = mpsc::channel(64);
        let connection = Arc::new(HubConnection {
            hub: self.clone(),
            me: ParticipantId::new(name),
            tx,
        });
        (connection, rx)
    }

    /// Offers that crossed the signaling channel, total and per sender.
    pub fn offers_relayed(&self) -> usize {
        self.log
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, event)| {
                matches!(
                    event,
                    ClientEvent::Signal {
                        kind: SignalKind::Offer,
                        ..
                    }
                )
            })
            .count()
    }

    pub fn offers_by(&self, name: &str) -> usize {
        let who = ParticipantId::new(name);
        self.log
            .lock()
            .unwrap()
            .iter()
            .filter(|(sender, event)| {
                *sender == who
                    && matches!(
                        event,
                        ClientEvent::Signal {
                            kind: SignalKind::Offer,
                            ..
                        }
                    )
            })
            .count()
    }
}

pub(crate) struct HubConnection {
    hub: Arc<SignalingHub>,
    me: ParticipantId,
    tx: mpsc::Sender<SignalingEvent>,
}

fn push(tx: &mpsc::Sender<SignalingEvent>, event: ServerEvent) {
    let _ = tx.try_send(SignalingEvent::Server(event));
}

#[async_trait]
impl SignalingConnection for HubConnection {
    async fn send(&self, event: ClientEvent) -> Result<(), SignalingError> {
        self.hub
            .log
            .lock()
            .unwrap()
            .push((self.me.clone(), event.clone()));

        match event {
            ClientEvent::JoinCall { call_id } => {
                let mut rooms = self.hub.rooms.lock().unwrap();
                let room = rooms.entry(call_id).or_default();
                let roster: Vec<ParticipantId> =
                    room.keys().filter(|p| **p != self.me).cloned().collect();
                for (member, tx) in room.iter() {
                    if *member != self.me {
                        push(
                            tx,
                            ServerEvent::PeerJoined {
                                participant: self.me.clone(),
                            },
                        );
                    }
                }
                room.insert(self.me.clone(), self.tx.clone());
                push(
                    &self.tx,
                    ServerEvent::Joined {
                        call_id,
                        participants: roster,
                    },
                );
            }
            ClientEvent::LeaveCall { call_id } => {
                let mut rooms = self.hub.rooms.lock().unwrap();
                if let Some(room) = rooms.get_mut(&call_id) {
                    room.remove(&self.me);
                    for tx in room.values() {
                        push(
                            tx,
                            ServerEvent::PeerLeft {
                                participant: self.me.clone(),
                            },
                        );
                    }
                }
            }
            ClientEvent::Signal {
                call_id,
                kind,
                data,
                to,
            } => {
                let rooms = self.hub.rooms.lock().unwrap();
                let Some(room) = rooms.get(&call_id) else {
                    return Ok(());
                };
                if !room.contains_key(&self.me) {
                    return Ok(());
                }
                let forwarded = ServerEvent::Signal {
                    kind,
                    data,
                    from: self.me.clone(),
                };
                match to {
                    Some(target) => {
                        if let Some(tx) = room.get(&target) {
                            push(tx, forwarded);
                        }
                    }
                    None => {
                        for (member, tx) in room.iter() {
                            if *member != self.me {
                                push(tx, forwarded.clone());
                            }
                        }
                    }
                }
            }
        }
        Ok(())
    }

    async fn close(&self) {
        let mut rooms = self.hub.rooms.lock().unwrap();
        for room in rooms.values_mut() {
            if room.remove(&self.me).is_some() {
                for tx in room.values() {
                    push(
                        tx,
                        ServerEvent::PeerLeft {
                            participant: self.me.clone(),
                        },
                    );
                }
            }
        }
    }
}
