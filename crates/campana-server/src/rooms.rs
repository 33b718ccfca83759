//! Per-call membership and envelope forwarding.
//!
//! The registry is the relay's only mutable state: a per-process table of
//! call channels, each mapping joined participants to their connection
//! outbox. It owns no call semantics -- only membership and delivery.
//! Fanning signaling across multiple relay instances would require an
//! external broker and is out of scope.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info, warn};

use campana_shared::protocol::{ServerEvent, SignalKind};
use campana_shared::types::{CallId, ParticipantId};

use crate::error::ServerError;

/// One call channel: participant -> connection outbox.
struct CallRoom {
    members: HashMap<ParticipantId, mpsc::Sender<ServerEvent>>,
}

impl CallRoom {
    fn new() -> Self {
        Self {
            members: HashMap::new(),
        }
    }

    /// Deliver an event to one member. Never blocks: slow consumers drop.
    fn deliver(&self, call_id: &CallId, target: &ParticipantId, event: ServerEvent) {
        if let Some(tx) = self.members.get(target) {
            if tx.try_send(event).is_err() {
                debug!(
                    call = %call_id,
                    target = %target.short(),
                    "Dropping event for slow call member"
                );
            }
        }
    }

    /// Deliver an event to every member except `from`.
    fn deliver_others(&self, call_id: &CallId, from: &ParticipantId, event: ServerEvent) {
        for member in self.members.keys() {
            if member != from {
                self.deliver(call_id, member, event.clone());
            }
        }
    }
}

/// Process-wide registry of call channels.
#[derive(Clone)]
pub struct RoomRegistry {
    max_members: usize,
    rooms: Arc<RwLock<HashMap<CallId, CallRoom>>>,
}

impl RoomRegistry {
    pub fn new(max_members: usize) -> Self {
        Self {
            max_members,
            rooms: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Add a participant to a call channel. Idempotent: re-joining
    /// replaces the member's outbox (reconnect support) without
    /// re-announcing it.
    ///
    /// The `Joined` acknowledgment (carrying the prior roster) is
    /// delivered to the joiner and `PeerJoined` to the other members
    /// under the same registry lock, so no envelope forwarded by a fast
    /// peer can overtake the acknowledgment in the joiner's outbox.
    pub async fn join(
        &self,
        call_id: CallId,
        participant: ParticipantId,
        outbox: mpsc::Sender<ServerEvent>,
    ) -> Result<(), ServerError> {
        let mut rooms = self.rooms.write().await;
        let room = rooms.entry(call_id).or_insert_with(CallRoom::new);

        let rejoin = room.members.contains_key(&participant);
        if !rejoin && room.members.len() >= self.max_members {
            return Err(ServerError::CallFull {
                max: self.max_members,
            });
        }

        let roster: Vec<ParticipantId> = room
            .members
            .keys()
            .filter(|m| **m != participant)
            .cloned()
            .collect();

        room.members.insert(participant.clone(), outbox);
        room.deliver(
            &call_id,
            &participant,
            ServerEvent::Joined {
                call_id,
                participants: roster,
            },
        );

        if !rejoin {
            room.deliver_others(
                &call_id,
                &participant,
                ServerEvent::PeerJoined {
                    participant: participant.clone(),
                },
            );
        }

        info!(
            call = %call_id,
            peer = %participant.short(),
            members = room.members.len(),
            rejoin,
            "Participant joined call channel"
        );

        Ok(())
    }

    /// Remove a participant. Idempotent: leaving a channel one is not a
    /// member of (or that does not exist) is a no-op. Empty channels are
    /// removed.
    pub async fn leave(&self, call_id: &CallId, participant: &ParticipantId) {
        let mut rooms = self.rooms.write().await;
        let Some(room) = rooms.get_mut(call_id) else {
            return;
        };

        if room.members.remove(participant).is_none() {
            return;
        }

        info!(
            call = %call_id,
            peer = %participant.short(),
            members = room.members.len(),
            "Participant left call channel"
        );

        room.deliver_others(
            call_id,
            participant,
            ServerEvent::PeerLeft {
                participant: participant.clone(),
            },
        );

        if room.members.is_empty() {
            rooms.remove(call_id);
            debug!(call = %call_id, "Removed empty call channel");
        }
    }

    /// Forward a signal envelope to its explicit target, or to every
    /// other member of the call. Silently no-ops when there is nobody to
    /// deliver to -- the sender treats the resulting silence as "peer not
    /// yet joined", not as an error.
    pub async fn relay(
        &self,
        call_id: &CallId,
        from: &ParticipantId,
        kind: SignalKind,
        data: serde_json::Value,
        to: Option<&ParticipantId>,
    ) {
        let rooms = self.rooms.read().await;
        let Some(room) = rooms.get(call_id) else {
            debug!(call = %call_id, "Signal for unknown call channel, dropping");
            return;
        };

        if !room.members.contains_key(from) {
            warn!(
                call = %call_id,
                peer = %from.short(),
                "Signal from non-member, dropping"
            );
            return;
        }

        let event = ServerEvent::Signal {
            kind,
            data,
            from: from.clone(),
        };

        match to {
            Some(target) => room.deliver(call_id, target, event),
            None => room.deliver_others(call_id, from, event),
        }
    }

    /// Whether a participant is currently a member of a call channel.
    pub async fn is_member(&self, call_id: &CallId, participant: &ParticipantId) -> bool {
        self.rooms
            .read()
            .await
            .get(call_id)
            .map(|room| room.members.contains_key(participant))
            .unwrap_or(false)
    }

    pub async fn member_count(&self, call_id: &CallId) -> usize {
        self.rooms
            .read()
            .await
            .get(call_id)
            .map(|room| room.members.len())
            .unwrap_or(0)
    }

    pub async fn call_count(&self) -> usize {
        self.rooms.read().await.len()
    }
}
