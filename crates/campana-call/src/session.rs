//! Call session controller.
//!
//! The single entry point consumed by the presentation layer. One tokio
//! task per call owns every piece of mutable call state (negotiator,
//! screen-share switcher, file receiver, snapshot) and drives it from a
//! `select!` loop over commands, relay events, transport events and the
//! screen-capture end signal -- the message-passing equivalent of the
//! platform's callback soup, with a single logical thread of control.

use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, info, warn};

use campana_shared::protocol::{ClientEvent, DataFrame, SdpPayload, ServerEvent, SignalKind};
use campana_shared::types::{CallId, CallKind, ParticipantId, TrackKind};

use crate::config::IceConfig;
use crate::directory::CallDirectory;
use crate::error::CallError;
use crate::file_transfer::{self, FileReceiver, ReceivedFile};
use crate::media::MediaDevices;
use crate::negotiator::{IceOutcome, NegotiationPhase, Negotiator};
use crate::screen_share::ScreenShareSwitcher;
use crate::signaling::{SignalingConnection, SignalingEvent, SignalingEvents};
use crate::transport::{
    CallRole, DataMessage, PeerTransportFactory, RemoteTrack, TransportEvent, TransportEvents,
};

/// Collaborators wired in by the embedding application.
pub struct SessionDeps {
    pub signaling: Arc<dyn SignalingConnection>,
    pub signaling_events: SignalingEvents,
    pub devices: Arc<dyn MediaDevices>,
    pub transports: Arc<dyn PeerTransportFactory>,
    pub ice: IceConfig,
    /// Optional: when present, `Disconnect` ends the call record and
    /// `Invite` adds participants through the directory service.
    pub directory: Option<Arc<CallDirectory>>,
}

/// Commands sent *into* the session task.
#[derive(Debug)]
pub enum CallCommand {
    SetMuted(bool),
    SetVideoEnabled(bool),
    StartScreenShare,
    StopScreenShare,
    SendFile { name: String, data: Bytes },
    Invite(ParticipantId),
    Snapshot(oneshot::Sender<CallSnapshot>),
    Disconnect,
}

/// Notifications sent *from* the session task to the application.
#[derive(Debug)]
pub enum CallEvent {
    PhaseChanged(NegotiationPhase),
    RemoteTrackAdded(RemoteTrack),
    PeerJoined(ParticipantId),
    PeerLeft(ParticipantId),
    PeerStatusChanged(PeerMediaStatus),
    FileReceived(ReceivedFile),
    ScreenShareChanged(bool),
    /// A non-fatal fault: the call keeps running, only the named feature
    /// (or connectivity) is affected.
    Fault(CallError),
}

/// Latest mute/camera status announced by the remote peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeerMediaStatus {
    pub muted: bool,
    pub video_enabled: bool,
}

/// Aggregated read state for the presentation layer.
#[derive(Debug, Clone)]
pub struct CallSnapshot {
    pub phase: NegotiationPhase,
    pub muted: bool,
    pub video_enabled: bool,
    pub screen_sharing: bool,
    pub peers: Vec<ParticipantId>,
    pub peer_status: Option<PeerMediaStatus>,
    pub received_files: Vec<ReceivedFile>,
}

/// Handle to a running call session. Dropping it tears the call down.
#[derive(Debug)]
pub struct CallSessionHandle {
    cmd_tx: mpsc::Sender<CallCommand>,
    pub events: mpsc::Receiver<CallEvent>,
}

impl CallSessionHandle {
    pub async fn set_muted(&self, muted: bool) {
        let _ = self.cmd_tx.send(CallCommand::SetMuted(muted)).await;
    }

    pub async fn set_video_enabled(&self, enabled: bool) {
        let _ = self.cmd_tx.send(CallCommand::SetVideoEnabled(enabled)).await;
    }

    pub async fn start_screen_share(&self) {
        let _ = self.cmd_tx.send(CallCommand::StartScreenShare).await;
    }

    pub async fn stop_screen_share(&self) {
        let _ = self.cmd_tx.send(CallCommand::StopScreenShare).await;
    }

    pub async fn send_file(&self, name: impl Into<String>, data: Bytes) {
        let _ = self
            .cmd_tx
            .send(CallCommand::SendFile {
                name: name.into(),
                data,
            })
            .await;
    }

    pub async fn invite(&self, user: ParticipantId) {
        let _ = self.cmd_tx.send(CallCommand::Invite(user)).await;
    }

    /// Current aggregated state; `None` once the session has ended.
    pub async fn snapshot(&self) -> Option<CallSnapshot> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.cmd_tx
            .send(CallCommand::Snapshot(reply_tx))
            .await
            .ok()?;
        reply_rx.await.ok()
    }

    /// End the call. Safe to call at any state, any number of times.
    pub async fn disconnect(&self) {
        let _ = self.cmd_tx.send(CallCommand::Disconnect).await;
    }
}

/// Join the call channel, acquire media, wire the peer connection and
/// spawn the session event loop.
///
/// `as_initiator` fixes the negotiation role for the lifetime of the
/// call: the initiator is the offerer, the other side only ever answers.
pub async fn connect(
    mut deps: SessionDeps,
    call_id: CallId,
    kind: CallKind,
    as_initiator: bool,
) -> Result<CallSessionHandle, CallError> {
    let role = if as_initiator {
        CallRole::Offerer
    } else {
        CallRole::Answerer
    };

    deps.signaling
        .send(ClientEvent::JoinCall { call_id })
        .await
        .map_err(|e| CallError::SignalingUnavailable(e.to_string()))?;

    // Wait for the join acknowledgment and the roster it carries.
    let peers = loop {
        match deps.signaling_events.recv().await {
            Some(SignalingEvent::Server(ServerEvent::Joined { participants, .. })) => {
                break participants;
            }
            Some(SignalingEvent::Server(ServerEvent::Error { message })) => {
                return Err(CallError::SignalingUnavailable(message));
            }
            Some(SignalingEvent::Server(_)) => continue,
            Some(SignalingEvent::ConnectionLost(reason)) => {
                return Err(CallError::SignalingUnavailable(reason));
            }
            None => {
                return Err(CallError::SignalingUnavailable(
                    "signaling stream ended".to_string(),
                ));
            }
        }
    };

    info!(call = %call_id, role = ?role, peers = peers.len(), "Joined call channel");

    let (events_tx, events_rx) = mpsc::channel::<CallEvent>(256);
    let _ = events_tx
        .send(CallEvent::PhaseChanged(NegotiationPhase::CapturingMedia))
        .await;

    // Media acquisition failure is fatal for this side of the call.
    let local_tracks = match deps.devices.user_media(kind).await {
        Ok(tracks) => tracks,
        Err(e) => {
            let _ = deps.signaling.send(ClientEvent::LeaveCall { call_id }).await;
            return Err(CallError::MediaAcquisition(e));
        }
    };

    let (transport, transport_events) = deps
        .transports
        .create(&deps.ice, role)
        .await
        .map_err(|e| CallError::NegotiationFailed(e.to_string()))?;

    let negotiator = Negotiator::new(transport.clone(), role, local_tracks)
        .await
        .map_err(|e| CallError::NegotiationFailed(e.to_string()))?;
    let _ = events_tx
        .send(CallEvent::PhaseChanged(NegotiationPhase::Negotiating))
        .await;

    let camera = negotiator
        .local_tracks()
        .iter()
        .find(|t| t.kind() == TrackKind::Video)
        .cloned();
    let switcher = ScreenShareSwitcher::new(deps.devices.clone(), transport, camera);

    let (cmd_tx, cmd_rx) = mpsc::channel::<CallCommand>(64);

    let mut session = Session {
        call_id,
        negotiator,
        switcher,
        file_receiver: FileReceiver::new(),
        signaling: deps.signaling,
        signaling_events: deps.signaling_events,
        signaling_lost: false,
        transport_events,
        cmd_rx,
        events_tx,
        directory: deps.directory,
        share_ended: None,
        snapshot: CallSnapshot {
            phase: NegotiationPhase::Negotiating,
            muted: false,
            video_enabled: true,
            screen_sharing: false,
            peers,
            peer_status: None,
            received_files: Vec::new(),
        },
    };

    // The offerer starts as soon as somebody is there to answer; with an
    // empty roster it waits for the peer-joined acknowledgment instead.
    if !session.snapshot.peers.is_empty() {
        session.try_offer().await;
    }

    tokio::spawn(session.run());

    Ok(CallSessionHandle {
        cmd_tx,
        events: events_rx,
    })
}

struct Session {
    call_id: CallId,
    negotiator: Negotiator,
    switcher: ScreenShareSwitcher,
    file_receiver: FileReceiver,
    signaling: Arc<dyn SignalingConnection>,
    signaling_events: SignalingEvents,
    signaling_lost: bool,
    transport_events: TransportEvents,
    cmd_rx: mpsc::Receiver<CallCommand>,
    events_tx: mpsc::Sender<CallEvent>,
    directory: Option<Arc<CallDirectory>>,
    share_ended: Option<watch::Receiver<bool>>,
    snapshot: CallSnapshot,
}

impl Session {
    async fn run(mut self) {
        loop {
            let share_watched = self.share_ended.is_some();

            tokio::select! {
                cmd = self.cmd_rx.recv() => {
                    match cmd {
                        Some(CallCommand::Disconnect) | None => {
                            self.teardown().await;
                            break;
                        }
                        Some(cmd) => self.handle_command(cmd).await,
                    }
                }

                event = self.signaling_events.recv(), if !self.signaling_lost => {
                    match event {
                        Some(SignalingEvent::Server(event)) => {
                            self.handle_server_event(event).await;
                        }
                        Some(SignalingEvent::ConnectionLost(reason)) => {
                            // Media flows peer-to-peer; surface a
                            // retryable offline status and keep going.
                            self.signaling_lost = true;
                            self.emit(CallEvent::Fault(CallError::SignalingUnavailable(reason)))
                                .await;
                        }
                        None => {
                            self.signaling_lost = true;
                        }
                    }
                }

                event = self.transport_events.recv() => {
                    if let Some(event) = event {
                        self.handle_transport_event(event).await;
                    }
                }

                _ = share_ended(&mut self.share_ended), if share_watched => {
                    self.share_ended = None;
                    debug!("Display capture ended by user, reverting to camera");
                    match self.switcher.stop().await {
                        Ok(true) => {
                            self.snapshot.screen_sharing = false;
                            self.emit(CallEvent::ScreenShareChanged(false)).await;
                        }
                        Ok(false) => {}
                        Err(e) => self.emit(CallEvent::Fault(e)).await,
                    }
                }
            }
        }
    }

    async fn handle_command(&mut self, cmd: CallCommand) {
        match cmd {
            CallCommand::SetMuted(muted) => {
                for track in self.negotiator.local_tracks() {
                    if track.kind() == TrackKind::Audio {
                        track.set_enabled(!muted);
                    }
                }
                self.snapshot.muted = muted;
                self.send_status().await;
            }
            CallCommand::SetVideoEnabled(enabled) => {
                for track in self.negotiator.local_tracks() {
                    if track.kind() == TrackKind::Video {
                        track.set_enabled(enabled);
                    }
                }
                self.snapshot.video_enabled = enabled;
                self.send_status().await;
            }
            CallCommand::StartScreenShare => match self.switcher.start().await {
                Ok(true) => {
                    self.share_ended = self.switcher.ended_signal();
                    self.snapshot.screen_sharing = true;
                    self.emit(CallEvent::ScreenShareChanged(true)).await;
                }
                Ok(false) => {}
                Err(e) => self.emit(CallEvent::Fault(e)).await,
            },
            CallCommand::StopScreenShare => match self.switcher.stop().await {
                Ok(true) => {
                    self.share_ended = None;
                    self.snapshot.screen_sharing = false;
                    self.emit(CallEvent::ScreenShareChanged(false)).await;
                }
                Ok(false) => {}
                Err(e) => self.emit(CallEvent::Fault(e)).await,
            },
            CallCommand::SendFile { name, data } => {
                let transport = self.negotiator.transport().clone();
                if let Err(e) = file_transfer::send_file(transport.as_ref(), &name, &data).await {
                    self.emit(CallEvent::Fault(CallError::FileTransferAborted(
                        e.to_string(),
                    )))
                    .await;
                }
            }
            CallCommand::Invite(user) => {
                let Some(directory) = &self.directory else {
                    warn!("Invite requested without a directory client");
                    return;
                };
                if let Err(e) = directory.add_participant(self.call_id, &user).await {
                    warn!(error = %e, user = %user.short(), "Invite failed");
                }
            }
            CallCommand::Snapshot(reply) => {
                let _ = reply.send(self.snapshot.clone());
            }
            CallCommand::Disconnect => unreachable!("handled in run()"),
        }
    }

    async fn handle_server_event(&mut self, event: ServerEvent) {
        match event {
            ServerEvent::Joined { .. } => {}
            ServerEvent::PeerJoined { participant } => {
                if !self.snapshot.peers.contains(&participant) {
                    self.snapshot.peers.push(participant.clone());
                }
                self.emit(CallEvent::PeerJoined(participant)).await;
                // The session-joined acknowledgment doubles as the offer
                // retry signal: an unanswered offer means the peer had
                // not joined yet.
                self.try_offer().await;
            }
            ServerEvent::PeerLeft { participant } => {
                self.snapshot.peers.retain(|p| *p != participant);
                self.emit(CallEvent::PeerLeft(participant)).await;
            }
            ServerEvent::Signal { kind, data, from } => {
                self.handle_signal(kind, data, from).await;
            }
            ServerEvent::Error { message } => {
                self.emit(CallEvent::Fault(CallError::SignalingUnavailable(message)))
                    .await;
            }
        }
    }

    async fn handle_signal(
        &mut self,
        kind: SignalKind,
        data: serde_json::Value,
        from: ParticipantId,
    ) {
        match kind {
            SignalKind::Offer => {
                let Some(offer) = decode::<SdpPayload>(data, "offer") else {
                    return;
                };
                match self.negotiator.handle_offer(offer).await {
                    Ok(Some(answer)) => {
                        self.send_signal(
                            SignalKind::Answer,
                            serde_json::json!({ "sdp": answer.sdp }),
                            Some(from),
                        )
                        .await;
                    }
                    Ok(None) => {}
                    Err(e) => {
                        self.emit(CallEvent::Fault(CallError::NegotiationFailed(
                            e.to_string(),
                        )))
                        .await;
                    }
                }
            }
            SignalKind::Answer => {
                let Some(answer) = decode::<SdpPayload>(data, "answer") else {
                    return;
                };
                if let Err(e) = self.negotiator.handle_answer(answer).await {
                    self.emit(CallEvent::Fault(CallError::NegotiationFailed(
                        e.to_string(),
                    )))
                    .await;
                }
            }
            SignalKind::Candidate => {
                let Some(candidate) = decode(data, "candidate") else {
                    return;
                };
                self.negotiator.handle_candidate(candidate).await;
            }
        }
    }

    async fn handle_transport_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::LocalCandidate(candidate) => {
                let data = serde_json::to_value(&candidate).expect("candidate serializes");
                self.send_signal(SignalKind::Candidate, data, None).await;
            }
            TransportEvent::RemoteTrack(track) => {
                let first = self.negotiator.on_remote_track(track.clone());
                if first {
                    self.snapshot.phase = NegotiationPhase::Connected;
                    self.emit(CallEvent::PhaseChanged(NegotiationPhase::Connected))
                        .await;
                }
                self.emit(CallEvent::RemoteTrackAdded(track)).await;
            }
            TransportEvent::IcePhase(phase) => match self.negotiator.on_ice_phase(phase) {
                IceOutcome::Failed => {
                    // Not retried here: recovery is a caller-initiated
                    // full teardown and reconnect.
                    self.emit(CallEvent::Fault(CallError::NegotiationFailed(
                        "ice connectivity failed".to_string(),
                    )))
                    .await;
                }
                IceOutcome::Phase(phase) => {
                    self.snapshot.phase = phase;
                    self.emit(CallEvent::PhaseChanged(phase)).await;
                }
                IceOutcome::Unchanged => {}
            },
            TransportEvent::DataChannelOpen => {
                // Give the remote side a status baseline.
                self.send_status().await;
            }
            TransportEvent::Data(DataMessage::Text(text)) => match DataFrame::from_json(&text) {
                Ok(DataFrame::FileMeta { name, size }) => {
                    match self.file_receiver.on_metadata(name, size) {
                        Ok(Some(file)) => self.file_received(file).await,
                        Ok(None) => {}
                        Err(e) => self.emit(CallEvent::Fault(e)).await,
                    }
                }
                Ok(DataFrame::PeerStatus {
                    muted,
                    video_enabled,
                }) => {
                    let status = PeerMediaStatus {
                        muted,
                        video_enabled,
                    };
                    self.snapshot.peer_status = Some(status);
                    self.emit(CallEvent::PeerStatusChanged(status)).await;
                }
                Err(e) => {
                    warn!(error = %e, "Undecodable data-channel control frame, dropping");
                }
            },
            TransportEvent::Data(DataMessage::Binary(bytes)) => {
                if let Some(file) = self.file_receiver.on_chunk(bytes) {
                    self.file_received(file).await;
                }
            }
        }
    }

    async fn file_received(&mut self, file: ReceivedFile) {
        self.snapshot.received_files.push(file.clone());
        self.emit(CallEvent::FileReceived(file)).await;
    }

    async fn try_offer(&mut self) {
        match self.negotiator.start_offer().await {
            Ok(Some(offer)) => {
                self.send_signal(
                    SignalKind::Offer,
                    serde_json::json!({ "sdp": offer.sdp }),
                    None,
                )
                .await;
            }
            Ok(None) => {}
            Err(e) => {
                self.emit(CallEvent::Fault(CallError::NegotiationFailed(
                    e.to_string(),
                )))
                .await;
            }
        }
    }

    async fn send_signal(
        &mut self,
        kind: SignalKind,
        data: serde_json::Value,
        to: Option<ParticipantId>,
    ) {
        if self.signaling_lost {
            debug!("Signaling offline, dropping outbound envelope");
            return;
        }
        if let Err(e) = self
            .signaling
            .send(ClientEvent::Signal {
                call_id: self.call_id,
                kind,
                data,
                to,
            })
            .await
        {
            self.signaling_lost = true;
            self.emit(CallEvent::Fault(CallError::SignalingUnavailable(
                e.to_string(),
            )))
            .await;
        }
    }

    async fn send_status(&mut self) {
        let frame = DataFrame::PeerStatus {
            muted: self.snapshot.muted,
            video_enabled: self.snapshot.video_enabled,
        };
        let transport = self.negotiator.transport().clone();
        if let Err(e) = transport.send_data(DataMessage::Text(frame.to_json())).await {
            debug!(error = %e, "Status frame not delivered");
        }
    }

    /// Release everything exactly once; the loop breaks right after.
    async fn teardown(&mut self) {
        let _ = self.switcher.stop().await;
        self.share_ended = None;
        self.negotiator.close().await;

        let _ = self
            .signaling
            .send(ClientEvent::LeaveCall {
                call_id: self.call_id,
            })
            .await;
        self.signaling.close().await;

        if let Some(directory) = &self.directory {
            if let Err(e) = directory.end(self.call_id).await {
                warn!(error = %e, "Failed to end call record");
            }
        }

        self.snapshot.phase = NegotiationPhase::Closed;
        self.emit(CallEvent::PhaseChanged(NegotiationPhase::Closed))
            .await;
        info!(call = %self.call_id, "Call session ended");
    }

    async fn emit(&self, event: CallEvent) {
        let _ = self.events_tx.send(event).await;
    }
}

async fn share_ended(rx: &mut Option<watch::Receiver<bool>>) {
    match rx {
        // A dropped sender also means the capture is gone.
        Some(rx) => {
            let _ = rx.changed().await;
        }
        None => std::future::pending().await,
    }
}

fn decode<T: serde::de::DeserializeOwned>(data: serde_json::Value, what: &str) -> Option<T> {
    match serde_json::from_value(data) {
        Ok(value) => Some(value),
        Err(e) => {
            warn!(error = %e, "Undecodable {what} payload, ignoring");
            None
        }
    }
}
