// Client-side call engine: signaling, negotiation, screen share, file
// transfer, and the session controller consumed by the presentation
// layer.

pub mod config;
pub mod directory;
pub mod error;
pub mod file_transfer;
pub mod media;
pub mod negotiator;
pub mod rtc;
pub mod screen_share;
pub mod session;
pub mod signaling;
pub mod transport;

#[cfg(test)]
pub(crate) mod testutil;

pub use config::{CallConfig, IceConfig, TurnServer};
pub use directory::{CallDirectory, CallRecord, CreateCall};
pub use error::CallError;
pub use file_transfer::{FileReceiver, ReceivedFile};
pub use media::{MediaDevices, MediaTrack, SyntheticDevices};
pub use negotiator::{NegotiationPhase, Negotiator, RemoteStream};
pub use rtc::{RtcPeerTransport, RtcTransportFactory};
pub use screen_share::ScreenShareSwitcher;
pub use session::{
    connect, CallCommand, CallEvent, CallSessionHandle, CallSnapshot, PeerMediaStatus, SessionDeps,
};
pub use signaling::{SignalingConnection, SignalingEvent, WsSignaling};
pub use transport::{CallRole, PeerTransport, PeerTransportFactory, TransportEvent};
