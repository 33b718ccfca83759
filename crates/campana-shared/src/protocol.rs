//! Wire protocol for the signaling relay and the peer data channel.
//!
//! Relay traffic is JSON text frames. The relay only ever inspects the
//! envelope (event name, call id, signal kind, optional target) -- the
//! `data` of a signal is an opaque JSON value it forwards verbatim.

use serde::{Deserialize, Serialize};

use crate::types::{CallId, ParticipantId};

/// Kind of a relayed signal envelope.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SignalKind {
    Offer,
    Answer,
    Candidate,
}

/// Events sent from a client to the relay.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(
    tag = "type",
    content = "payload",
    rename_all = "kebab-case",
    rename_all_fields = "camelCase"
)]
pub enum ClientEvent {
    JoinCall {
        call_id: CallId,
    },
    LeaveCall {
        call_id: CallId,
    },
    Signal {
        call_id: CallId,
        kind: SignalKind,
        /// SDP description or ICE candidate; opaque to the relay.
        data: serde_json::Value,
        /// Explicit target. Absent means "all other call members".
        #[serde(default, skip_serializing_if = "Option::is_none")]
        to: Option<ParticipantId>,
    },
}

/// Events sent from the relay to a client.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(
    tag = "type",
    content = "payload",
    rename_all = "kebab-case",
    rename_all_fields = "camelCase"
)]
pub enum ServerEvent {
    /// Acknowledges a join; `participants` is the roster at join time,
    /// excluding the joiner itself.
    Joined {
        call_id: CallId,
        participants: Vec<ParticipantId>,
    },
    /// Another participant joined the call channel.
    PeerJoined { participant: ParticipantId },
    /// Another participant left the call channel (or disconnected).
    PeerLeft { participant: ParticipantId },
    /// A forwarded signal envelope, call id and target stripped.
    Signal {
        kind: SignalKind,
        data: serde_json::Value,
        from: ParticipantId,
    },
    Error { message: String },
}

/// An SDP offer or answer as carried inside a signal envelope.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SdpPayload {
    pub sdp: String,
}

/// An ICE candidate as carried inside a signal envelope. Mirrors the
/// candidate-init shape of the underlying transport.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CandidatePayload {
    pub candidate: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdp_mid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdp_mline_index: Option<u16>,
}

/// Control frames exchanged peer-to-peer on the data channel as JSON
/// text. Binary frames on the same channel are raw file chunks.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum DataFrame {
    /// Announces a file transfer; the binary chunks follow in order with
    /// no end marker.
    FileMeta { name: String, size: u64 },
    /// Out-of-band mute / camera status so the remote UI can reflect it
    /// without inspecting raw media state.
    PeerStatus { muted: bool, video_enabled: bool },
}

impl DataFrame {
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).expect("data frame serializes")
    }

    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}
