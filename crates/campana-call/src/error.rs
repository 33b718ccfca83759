//! Client-facing error taxonomy.
//!
//! Errors originating in device or transport APIs are converted into
//! [`CallError`] at the component boundary; no raw platform error reaches
//! the session controller or its consumers.

use thiserror::Error;

use crate::media::MediaError;

#[derive(Error, Debug)]
pub enum CallError {
    /// Camera/microphone unavailable or permission denied. Fatal to this
    /// side's outgoing media; not retried automatically.
    #[error("Media acquisition failed: {0}")]
    MediaAcquisition(#[from] MediaError),

    /// The user cancelled the display-capture picker. Non-fatal; prior
    /// state is untouched.
    #[error("Screen share denied")]
    ScreenShareDenied,

    /// The relay connection dropped or failed to establish. Retryable
    /// "offline" status, not a call-fatal crash.
    #[error("Signaling unavailable: {0}")]
    SignalingUnavailable(String),

    /// ICE reached the failed phase, or the transport rejected an
    /// operation. Recovery is caller-initiated full renegotiation.
    #[error("Negotiation failed: {0}")]
    NegotiationFailed(String),

    /// Malformed transfer metadata or an inconsistent chunk stream. The
    /// offending transfer is dropped; the call keeps running.
    #[error("File transfer aborted: {0}")]
    FileTransferAborted(String),
}
