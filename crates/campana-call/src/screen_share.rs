//! Screen sharing by in-place track replacement.
//!
//! Substituting the outgoing video track on the already-negotiated
//! sender avoids a full offer/answer round trip; the remote side simply
//! starts receiving display frames over the same transport. The original
//! camera track is retained (never stopped) for the duration of a share
//! so it can be restored without re-requesting camera permission.

use std::sync::Arc;

use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::error::CallError;
use crate::media::{DisplayCapture, MediaDevices, MediaError, MediaTrack};
use crate::transport::{PeerTransport, TransportError};

struct ActiveShare {
    track: MediaTrack,
    ended: watch::Receiver<bool>,
}

pub struct ScreenShareSwitcher {
    devices: Arc<dyn MediaDevices>,
    transport: Arc<dyn PeerTransport>,
    /// The camera track originally attached to the video sender; `None`
    /// on voice calls, which have no outgoing video sender.
    camera: Option<MediaTrack>,
    active: Option<ActiveShare>,
}

impl ScreenShareSwitcher {
    pub fn new(
        devices: Arc<dyn MediaDevices>,
        transport: Arc<dyn PeerTransport>,
        camera: Option<MediaTrack>,
    ) -> Self {
        Self {
            devices,
            transport,
            camera,
            active: None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.active.is_some()
    }

    /// The end-of-capture signal of the current share, fired when the
    /// user stops sharing via OS/browser chrome. The session controller
    /// watches this and reverts automatically.
    pub fn ended_signal(&self) -> Option<watch::Receiver<bool>> {
        self.active.as_ref().map(|share| share.ended.clone())
    }

    /// Start sharing. Returns `false` when a share is already active --
    /// exactly one track is ever attached to the video sender, a second
    /// `start` neither duplicates nor restarts it.
    pub async fn start(&mut self) -> Result<bool, CallError> {
        if self.active.is_some() {
            debug!("Screen share already active, ignoring start");
            return Ok(false);
        }

        let DisplayCapture { track, ended } = match self.devices.display_media().await {
            Ok(capture) => capture,
            Err(MediaError::PermissionDenied) => {
                // Picker cancelled: still showing camera, nothing changed.
                info!("Display capture cancelled by user");
                return Err(CallError::ScreenShareDenied);
            }
            Err(e) => return Err(CallError::MediaAcquisition(e)),
        };

        if let Err(e) = self.transport.replace_video_track(&track).await {
            track.stop();
            return Err(replace_error(e));
        }

        info!(track = %track.id(), "Screen share started");
        self.active = Some(ActiveShare { track, ended });
        Ok(true)
    }

    /// Stop sharing and restore the camera track on the same sender.
    /// Idempotent: returns `false` when no share is active.
    pub async fn stop(&mut self) -> Result<bool, CallError> {
        let Some(share) = self.active.take() else {
            return Ok(false);
        };

        share.track.stop();

        if let Some(camera) = &self.camera {
            if let Err(e) = self.transport.replace_video_track(camera).await {
                warn!(error = %e, "Failed to restore camera track");
                return Err(replace_error(e));
            }
        }

        info!("Screen share stopped, camera restored");
        Ok(true)
    }
}

fn replace_error(e: TransportError) -> CallError {
    match e {
        TransportError::NoVideoSender => {
            CallError::NegotiationFailed("no outgoing video sender to replace".to_string())
        }
        other => CallError::NegotiationFailed(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::SyntheticDevices;
    use crate::testutil::MockTransport;
    use campana_shared::types::TrackKind;

    async fn transport_with_camera() -> (Arc<MockTransport>, MediaTrack) {
        let (transport, _events) = MockTransport::create();
        let camera = MediaTrack::new(TrackKind::Video, "camera");
        transport.add_local_track(&camera).await.unwrap();
        (transport, camera)
    }

    #[tokio::test]
    async fn test_start_replaces_video_in_place() {
        let (transport, camera) = transport_with_camera().await;
        let mut switcher = ScreenShareSwitcher::new(
            Arc::new(SyntheticDevices::new()),
            transport.clone(),
            Some(camera.clone()),
        );

        assert!(switcher.start().await.unwrap());
        assert_eq!(transport.replace_calls(), 1);
        assert_ne!(transport.video_track_id().unwrap(), camera.id());
        // The camera is retained, not stopped.
        assert!(!camera.is_stopped());
    }

    #[tokio::test]
    async fn test_double_start_keeps_single_track() {
        let (transport, camera) = transport_with_camera().await;
        let mut switcher = ScreenShareSwitcher::new(
            Arc::new(SyntheticDevices::new()),
            transport.clone(),
            Some(camera),
        );

        assert!(switcher.start().await.unwrap());
        assert!(!switcher.start().await.unwrap());
        assert_eq!(transport.replace_calls(), 1);
        assert!(switcher.is_active());
    }

    #[tokio::test]
    async fn test_denied_picker_leaves_state_unchanged() {
        let (transport, camera) = transport_with_camera().await;
        let mut switcher = ScreenShareSwitcher::new(
            Arc::new(SyntheticDevices::without_display()),
            transport.clone(),
            Some(camera.clone()),
        );

        let err = switcher.start().await.unwrap_err();
        assert!(matches!(err, CallError::ScreenShareDenied));
        assert!(!switcher.is_active());
        assert_eq!(transport.replace_calls(), 0);
        assert_eq!(transport.video_track_id().unwrap(), camera.id());
    }

    #[tokio::test]
    async fn test_stop_restores_camera_and_is_idempotent() {
        let (transport, camera) = transport_with_camera().await;
        let mut switcher = ScreenShareSwitcher::new(
            Arc::new(SyntheticDevices::new()),
            transport.clone(),
            Some(camera.clone()),
        );

        switcher.start().await.unwrap();
        let display_id = transport.video_track_id().unwrap();

        assert!(switcher.stop().await.unwrap());
        assert_eq!(transport.video_track_id().unwrap(), camera.id());
        assert_ne!(transport.video_track_id().unwrap(), display_id);

        assert!(!switcher.stop().await.unwrap());
        assert_eq!(transport.replace_calls(), 2);
    }

    #[tokio::test]
    async fn test_ended_signal_fires_on_chrome_stop() {
        let (transport, camera) = transport_with_camera().await;
        let devices = Arc::new(SyntheticDevices::new());
        let mut switcher =
            ScreenShareSwitcher::new(devices.clone(), transport, Some(camera));

        switcher.start().await.unwrap();
        let mut ended = switcher.ended_signal().unwrap();

        devices.end_displays();
        ended.changed().await.unwrap();
        assert!(*ended.borrow());

        // The controller reacts by calling stop().
        assert!(switcher.stop().await.unwrap());
        assert!(!switcher.is_active());
    }
}
