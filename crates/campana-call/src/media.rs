//! Local media capture handles.
//!
//! The call engine does not talk to devices directly -- the embedding
//! shell supplies a [`MediaDevices`] implementation and pumps captured
//! samples into the transport. What the engine owns is the *control*
//! side: which tracks exist, whether they are enabled (mute / camera
//! off), and when they are stopped.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::watch;
use tracing::debug;

use campana_shared::types::{CallKind, TrackKind};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MediaError {
    #[error("Capture permission denied")]
    PermissionDenied,

    #[error("No capture device available")]
    NoDevice,

    #[error("Capture error: {0}")]
    Capture(String),
}

/// Control handle for one local capture track.
///
/// Cloning shares the underlying flags: disabling a clone disables the
/// track everywhere it is referenced.
#[derive(Debug, Clone)]
pub struct MediaTrack {
    id: String,
    kind: TrackKind,
    label: String,
    enabled: Arc<AtomicBool>,
    stopped: Arc<AtomicBool>,
}

impl MediaTrack {
    pub fn new(kind: TrackKind, label: impl Into<String>) -> Self {
        Self {
            id: next_track_id(kind),
            kind,
            label: label.into(),
            enabled: Arc::new(AtomicBool::new(true)),
            stopped: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn kind(&self) -> TrackKind {
        self.kind
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Enable/disable without releasing the device. A disabled track
    /// keeps its sender alive; the capture pump substitutes silence or
    /// blank frames.
    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
        debug!(track = %self.id, enabled, "Track enabled state changed");
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    /// Stop capture permanently. Idempotent.
    pub fn stop(&self) {
        if !self.stopped.swap(true, Ordering::SeqCst) {
            debug!(track = %self.id, "Track stopped");
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Relaxed)
    }
}

/// A display capture plus the signal that fires when the user stops
/// sharing through OS/browser chrome rather than through the call UI.
pub struct DisplayCapture {
    pub track: MediaTrack,
    pub ended: watch::Receiver<bool>,
}

/// The platform's device layer, as seen by the call engine.
#[async_trait]
pub trait MediaDevices: Send + Sync {
    /// Acquire local capture for a call: audio for voice calls, audio
    /// plus camera video for video calls.
    async fn user_media(&self, kind: CallKind) -> Result<Vec<MediaTrack>, MediaError>;

    /// Acquire a display capture (video only). Cancelling the picker
    /// yields [`MediaError::PermissionDenied`].
    async fn display_media(&self) -> Result<DisplayCapture, MediaError>;
}

/// Synthetic capture sources: silent audio and blank video. Used for
/// headless operation and tests; real deployments plug in the shell's
/// device layer instead.
pub struct SyntheticDevices {
    deny_user_media: bool,
    deny_display: bool,
    displays: Mutex<Vec<watch::Sender<bool>>>,
}

impl SyntheticDevices {
    pub fn new() -> Self {
        Self {
            deny_user_media: false,
            deny_display: false,
            displays: Mutex::new(Vec::new()),
        }
    }

    /// A device layer where every permission prompt is declined.
    pub fn denying() -> Self {
        Self {
            deny_user_media: true,
            deny_display: true,
            displays: Mutex::new(Vec::new()),
        }
    }

    /// Decline only the display-capture picker.
    pub fn without_display() -> Self {
        Self {
            deny_display: true,
            ..Self::new()
        }
    }

    /// Simulate the user stopping every active share via OS chrome.
    pub fn end_displays(&self) {
        let mut displays = self.displays.lock().expect("displays lock");
        for sender in displays.drain(..) {
            let _ = sender.send(true);
        }
    }
}

impl Default for SyntheticDevices {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MediaDevices for SyntheticDevices {
    async fn user_media(&self, kind: CallKind) -> Result<Vec<MediaTrack>, MediaError> {
        if self.deny_user_media {
            return Err(MediaError::PermissionDenied);
        }

        let mut tracks = vec![MediaTrack::new(TrackKind::Audio, "synthetic-mic")];
        if kind == CallKind::Video {
            tracks.push(MediaTrack::new(TrackKind::Video, "synthetic-camera"));
        }
        Ok(tracks)
    }

    async fn display_media(&self) -> Result<DisplayCapture, MediaError> {
        if self.deny_display {
            return Err(MediaError::PermissionDenied);
        }

        let (tx, rx) = watch::channel(false);
        self.displays.lock().expect("displays lock").push(tx);

        Ok(DisplayCapture {
            track: MediaTrack::new(TrackKind::Video, "synthetic-display"),
            ended: rx,
        })
    }
}

/// Process-unique track ids, readable in logs.
fn next_track_id(kind: TrackKind) -> String {
    use std::sync::atomic::AtomicU64;

    static COUNTER: AtomicU64 = AtomicU64::new(0);

    let n = COUNTER.fetch_add(1, Ordering::Relaxed);
    let prefix = match kind {
        TrackKind::Audio => "audio",
        TrackKind::Video => "video",
    };
    format!("{prefix}-{n}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_user_media_tracks_match_call_kind() {
        let devices = SyntheticDevices::new();

        let voice = devices.user_media(CallKind::Voice).await.unwrap();
        assert_eq!(voice.len(), 1);
        assert_eq!(voice[0].kind(), TrackKind::Audio);

        let video = devices.user_media(CallKind::Video).await.unwrap();
        assert_eq!(video.len(), 2);
        assert!(video.iter().any(|t| t.kind() == TrackKind::Video));
    }

    #[tokio::test]
    async fn test_denied_user_media() {
        let devices = SyntheticDevices::denying();
        assert_eq!(
            devices.user_media(CallKind::Voice).await.unwrap_err(),
            MediaError::PermissionDenied
        );
    }

    #[tokio::test]
    async fn test_display_ended_signal() {
        let devices = SyntheticDevices::new();
        let mut capture = devices.display_media().await.unwrap();

        devices.end_displays();
        capture.ended.changed().await.unwrap();
        assert!(*capture.ended.borrow());
    }

    #[test]
    fn test_track_flags_shared_across_clones() {
        let track = MediaTrack::new(TrackKind::Audio, "mic");
        let clone = track.clone();

        track.set_enabled(false);
        assert!(!clone.is_enabled());

        clone.stop();
        clone.stop();
        assert!(track.is_stopped());
    }
}
